//! End-to-end round-state-machine scenarios, gated on a live Postgres
//! instance via `DATABASE_URL` (this repository does not bundle one).

use differential_privacy::{DpConfig, GaussianMechanism};
use federated_learning::executor::{ClientExecutor, ExecutorConfig, LocalClientTransport, LocalModel, ValidationMetrics};
use federated_learning::{ClientTransport, ExecutorError};
use metrics_writer::MetricsWriter;
use orchestrator::{Orchestrator, OrchestratorConfig, RoundOutcome};
use selective_he::HeContext;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tensor::{NamedTensorMap, Tensor};

struct StubModel {
    body: NamedTensorMap,
    head: NamedTensorMap,
    fails: bool,
}

impl StubModel {
    fn new(seed: f32, fails: bool) -> Self {
        let mut body = NamedTensorMap::new();
        body.insert("conv1.weight".to_string(), Tensor::new(vec![2], vec![seed, seed]).unwrap());
        let mut head = NamedTensorMap::new();
        head.insert("classifier.bias".to_string(), Tensor::new(vec![1], vec![seed]).unwrap());
        StubModel { body, head, fails }
    }
}

impl LocalModel for StubModel {
    fn body_state_dict(&self) -> NamedTensorMap {
        self.body.clone()
    }
    fn head_state_dict(&self) -> NamedTensorMap {
        self.head.clone()
    }
    fn load_body(&mut self, body: NamedTensorMap) {
        self.body = body;
    }
    fn load_head(&mut self, head: NamedTensorMap) {
        self.head = head;
    }
    fn num_samples(&self) -> u32 {
        if self.fails {
            0
        } else {
            100
        }
    }
    fn train_epoch(&mut self) -> Result<f32, ExecutorError> {
        if self.fails {
            Err(ExecutorError::Training("simulated client outage".to_string()))
        } else {
            Ok(0.3)
        }
    }
    fn validate(&self) -> ValidationMetrics {
        ValidationMetrics { loss: 0.2, auc: 0.75 }
    }
}

fn make_executor(seed: f32, fails: bool, he: HeContext) -> ClientExecutor<StubModel> {
    let dp = GaussianMechanism::new(DpConfig::default()).unwrap();
    ClientExecutor::new(ExecutorConfig::default(), StubModel::new(seed, fails), dp, he)
}

#[tokio::test]
async fn round_fails_when_replies_fall_below_quorum() {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set; skipping orchestrator integration test");
        return;
    };

    let he = HeContext::generate();
    let mut executors = HashMap::new();
    executors.insert("site-a".to_string(), make_executor(1.0, false, he.clone()));
    executors.insert("site-b".to_string(), make_executor(2.0, false, he.clone()));

    let abort = Arc::new(AtomicBool::new(false));
    let transport: Arc<dyn ClientTransport> =
        Arc::new(LocalClientTransport::new(executors, abort.clone()));

    let metrics = MetricsWriter::connect(&database_url).await.expect("connect to test database");

    let mut orchestrator = Orchestrator::new(
        OrchestratorConfig {
            num_rounds: 1,
            min_clients: 3,
            db_url: Some(database_url),
        },
        vec!["site-a".to_string(), "site-b".to_string()],
        transport,
        he,
        metrics,
        abort,
    );

    let outcome = orchestrator.run_round().await;
    match outcome {
        RoundOutcome::Failed { .. } => {}
        other => panic!("expected Failed outcome below quorum, got {other:?}"),
    }
}

#[tokio::test]
async fn round_completes_when_quorum_is_met() {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set; skipping orchestrator integration test");
        return;
    };

    let he = HeContext::generate();
    let mut executors = HashMap::new();
    executors.insert("site-a".to_string(), make_executor(1.0, false, he.clone()));
    executors.insert("site-b".to_string(), make_executor(2.0, false, he.clone()));
    executors.insert("site-c".to_string(), make_executor(3.0, false, he.clone()));

    let abort = Arc::new(AtomicBool::new(false));
    let transport: Arc<dyn ClientTransport> =
        Arc::new(LocalClientTransport::new(executors, abort.clone()));

    let metrics = MetricsWriter::connect(&database_url).await.expect("connect to test database");

    let mut orchestrator = Orchestrator::new(
        OrchestratorConfig {
            num_rounds: 1,
            min_clients: 3,
            db_url: Some(database_url),
        },
        vec!["site-a".to_string(), "site-b".to_string(), "site-c".to_string()],
        transport,
        he,
        metrics,
        abort,
    );

    let outcome = orchestrator.run_round().await;
    match outcome {
        RoundOutcome::Completed { poisoned_clients_detected, .. } => {
            assert_eq!(poisoned_clients_detected, 0);
        }
        other => panic!("expected Completed outcome at quorum, got {other:?}"),
    }
}
