//! Per-round local task handler (C6): receives global weights as a mixed
//! plain/cipher map, trains locally against an opaque [`LocalModel`],
//! applies DP to the body and HE to the head, and returns a mixed update
//! with metrics.

use crate::transport::{
    ClientTransport, MixedMap, MixedValue, ReturnCode, TaskKind, TaskMessage, TaskMeta, TaskOutcome,
};
use differential_privacy::GaussianMechanism;
use selective_he::HeContext;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tensor::{NamedTensorMap, Tensor};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error(transparent)]
    Tensor(#[from] tensor::TensorError),
    #[error(transparent)]
    He(#[from] selective_he::HeError),
    #[error("local training failed: {0}")]
    Training(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_local_epochs")]
    pub local_epochs: u32,
    #[serde(default = "default_lr")]
    pub lr: f32,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    pub data_root: Option<String>,
    #[serde(default = "default_head_prefix")]
    pub head_prefix: String,
}

fn default_local_epochs() -> u32 {
    1
}
fn default_lr() -> f32 {
    0.01
}
fn default_batch_size() -> u32 {
    32
}
fn default_head_prefix() -> String {
    "classifier.".to_string()
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            local_epochs: default_local_epochs(),
            lr: default_lr(),
            batch_size: default_batch_size(),
            data_root: None,
            head_prefix: default_head_prefix(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationMetrics {
    pub loss: f32,
    pub auc: f32,
}

/// The local model and dataset are opaque to this crate; this trait is the
/// seam the Client Executor trains and validates through, with a
/// production implementation supplied by the host application.
pub trait LocalModel: Send {
    fn body_state_dict(&self) -> NamedTensorMap;
    fn head_state_dict(&self) -> NamedTensorMap;
    fn load_body(&mut self, body: NamedTensorMap);
    fn load_head(&mut self, head: NamedTensorMap);
    fn num_samples(&self) -> u32;
    fn train_epoch(&mut self) -> Result<f32, ExecutorError>;
    fn validate(&self) -> ValidationMetrics;
}

/// Drives one client's `train` / `validate` / `submit_model` handlers.
pub struct ClientExecutor<M: LocalModel> {
    config: ExecutorConfig,
    model: M,
    dp: GaussianMechanism,
    he: HeContext,
}

impl<M: LocalModel> ClientExecutor<M> {
    pub fn new(config: ExecutorConfig, model: M, dp: GaussianMechanism, he: HeContext) -> Self {
        ClientExecutor { config, model, dp, he }
    }

    /// Split a mixed payload by key prefix into (body, head) sub-maps.
    fn partition_payload(&self, payload: &MixedMap) -> (MixedMap, MixedMap) {
        let mut body = MixedMap::new();
        let mut head = MixedMap::new();
        for (key, value) in payload {
            if key.starts_with(&self.config.head_prefix) {
                head.insert(key.clone(), value.clone());
            } else {
                body.insert(key.clone(), value.clone());
            }
        }
        (body, head)
    }

    /// If any head value is ciphertext, register shapes from the local
    /// model's current head template and decrypt the whole sub-map;
    /// otherwise pass plaintext entries through unchanged.
    fn resolve_head(&mut self, head_raw: MixedMap) -> Result<NamedTensorMap, ExecutorError> {
        let has_cipher = head_raw.values().any(|v| matches!(v, MixedValue::Cipher(_)));
        if !has_cipher {
            let mut out = NamedTensorMap::new();
            for (key, value) in head_raw {
                if let MixedValue::Plain(t) = value {
                    out.insert(key, t);
                }
            }
            return Ok(out);
        }

        self.he.register_shapes(&self.model.head_state_dict());
        let ciphers: std::collections::HashMap<String, selective_he::Ciphertext> = head_raw
            .into_iter()
            .filter_map(|(key, value)| match value {
                MixedValue::Cipher(bytes) => Some((key, selective_he::Ciphertext { bytes })),
                MixedValue::Plain(_) => None,
            })
            .collect();
        Ok(self.he.decrypt_head(&ciphers)?)
    }

    fn resolve_body(&self, body_raw: MixedMap) -> NamedTensorMap {
        let mut out = NamedTensorMap::new();
        for (key, value) in body_raw {
            if let MixedValue::Plain(t) = value {
                out.insert(key, t);
            }
        }
        out
    }

    fn mix_plain(map: NamedTensorMap) -> MixedMap {
        map.into_iter().map(|(k, t)| (k, MixedValue::Plain(t))).collect()
    }

    fn mix_cipher(ciphers: std::collections::HashMap<String, selective_he::Ciphertext>) -> MixedMap {
        ciphers
            .into_iter()
            .map(|(k, c)| (k, MixedValue::Cipher(c.bytes)))
            .collect()
    }

    /// `train`: partition, decrypt head if needed, load into the local
    /// model, train `local_epochs` passes (abort-checked between epochs),
    /// validate once, apply DP to the body and HE to the head, and return
    /// the combined update.
    #[tracing::instrument(skip(self, task, abort))]
    pub fn handle_train(&mut self, task: TaskMessage, abort: &AtomicBool) -> TaskOutcome {
        if self.model.num_samples() == 0 {
            tracing::warn!("client has no local data; returning zero-sample update");
            return TaskOutcome::ok(
                MixedMap::new(),
                TaskMeta {
                    local_loss: Some(0.0),
                    local_auc: Some(0.0),
                    num_samples: Some(0),
                    encryption_overhead_ms: Some(0),
                    encryption_status: Some("skipped".to_string()),
                    ..Default::default()
                },
            );
        }

        let (body_raw, head_raw) = self.partition_payload(&task.payload);
        let body = self.resolve_body(body_raw);
        let head = match self.resolve_head(head_raw) {
            Ok(h) => h,
            Err(err) => {
                tracing::error!(%err, "failed to resolve head for training");
                return TaskOutcome::execution_exception();
            }
        };

        if !body.is_empty() {
            self.model.load_body(body);
        }
        if !head.is_empty() {
            self.model.load_head(head);
        }

        let mut local_loss = 0.0f32;
        for _epoch in 0..self.config.local_epochs {
            if abort.load(Ordering::SeqCst) {
                return TaskOutcome::aborted();
            }
            local_loss = match self.model.train_epoch() {
                Ok(loss) => loss,
                Err(err) => {
                    tracing::error!(%err, "local training failed");
                    return TaskOutcome::execution_exception();
                }
            };
        }

        let validation = self.model.validate();

        let encrypt_start = std::time::Instant::now();
        let body_out = self.dp.apply(&self.model.body_state_dict());
        let head_ciphers = self
            .he
            .encrypt_head(&self.model.head_state_dict(), &self.config.head_prefix);
        let encryption_overhead_ms = encrypt_start.elapsed().as_millis() as u64;

        let mut reply = Self::mix_plain(body_out);
        reply.extend(Self::mix_cipher(head_ciphers));

        TaskOutcome::ok(
            reply,
            TaskMeta {
                local_loss: Some(local_loss),
                local_auc: Some(validation.auc),
                num_samples: Some(self.model.num_samples()),
                encryption_overhead_ms: Some(encryption_overhead_ms),
                encryption_status: Some("encrypted".to_string()),
                ..Default::default()
            },
        )
    }

    /// `validate`: load a broadcast global model (decrypting ciphered head
    /// entries using pre-registered shapes) and report validation metrics.
    pub fn handle_validate(&mut self, task: TaskMessage) -> TaskOutcome {
        let (body_raw, head_raw) = self.partition_payload(&task.payload);
        let body = self.resolve_body(body_raw);
        let head = match self.resolve_head(head_raw) {
            Ok(h) => h,
            Err(err) => {
                tracing::error!(%err, "failed to resolve head for validation");
                return TaskOutcome::execution_exception();
            }
        };

        if !body.is_empty() {
            self.model.load_body(body);
        }
        if !head.is_empty() {
            self.model.load_head(head);
        }

        let validation = self.model.validate();
        TaskOutcome::ok(
            MixedMap::new(),
            TaskMeta {
                val_loss: Some(validation.loss),
                val_auc: Some(validation.auc),
                ..Default::default()
            },
        )
    }

    /// `submit_model`: return the full local state, body plus head in
    /// plaintext (no DP/HE post-processing -- this handler reports the raw
    /// local state, not a round contribution).
    pub fn handle_submit_model(&self) -> TaskOutcome {
        let mut reply = Self::mix_plain(self.model.body_state_dict());
        reply.extend(Self::mix_plain(self.model.head_state_dict()));
        TaskOutcome::ok(
            reply,
            TaskMeta {
                num_samples: Some(self.model.num_samples()),
                ..Default::default()
            },
        )
    }

    pub fn dispatch(&mut self, task: TaskMessage, abort: &AtomicBool) -> TaskOutcome {
        match task.task {
            TaskKind::Train => self.handle_train(task, abort),
            TaskKind::Validate => self.handle_validate(task),
            TaskKind::SubmitModel => self.handle_submit_model(),
        }
    }
}

/// In-process [`ClientTransport`] that drives a map of named
/// [`ClientExecutor`]s directly, with no network hop. This is the test
/// double the orchestrator's own integration tests use in place of a real
/// FL-framework transport.
pub struct LocalClientTransport<M: LocalModel + Send + Sync + 'static> {
    executors: std::sync::Mutex<std::collections::HashMap<String, ClientExecutor<M>>>,
    abort: Arc<AtomicBool>,
}

impl<M: LocalModel + Send + Sync + 'static> LocalClientTransport<M> {
    pub fn new(
        executors: std::collections::HashMap<String, ClientExecutor<M>>,
        abort: Arc<AtomicBool>,
    ) -> Self {
        LocalClientTransport {
            executors: std::sync::Mutex::new(executors),
            abort,
        }
    }
}

#[async_trait::async_trait]
impl<M: LocalModel + Send + Sync + 'static> ClientTransport for LocalClientTransport<M> {
    async fn dispatch(&self, client: &str, task: TaskMessage) -> TaskOutcome {
        let mut executors = self.executors.lock().expect("executor map lock poisoned");
        match executors.get_mut(client) {
            Some(executor) => executor.dispatch(task, &self.abort),
            None => TaskOutcome {
                code: ReturnCode::TaskUnknown,
                reply: MixedMap::new(),
                meta: TaskMeta::default(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use differential_privacy::DpConfig;

    struct StubModel {
        body: NamedTensorMap,
        head: NamedTensorMap,
        samples: u32,
    }

    impl StubModel {
        fn new(samples: u32) -> Self {
            let mut body = NamedTensorMap::new();
            body.insert("conv1.weight".to_string(), Tensor::new(vec![2], vec![0.1, 0.2]).unwrap());
            let mut head = NamedTensorMap::new();
            head.insert(
                "classifier.bias".to_string(),
                Tensor::new(vec![2], vec![0.0, 0.0]).unwrap(),
            );
            StubModel { body, head, samples }
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
            self.samples
        }
        fn train_epoch(&mut self) -> Result<f32, ExecutorError> {
            Ok(0.42)
        }
        fn validate(&self) -> ValidationMetrics {
            ValidationMetrics { loss: 0.1, auc: 0.8 }
        }
    }

    fn executor(samples: u32) -> ClientExecutor<StubModel> {
        let dp = GaussianMechanism::new(DpConfig::default()).unwrap();
        let he = HeContext::generate();
        ClientExecutor::new(ExecutorConfig::default(), StubModel::new(samples), dp, he)
    }

    #[test]
    fn train_returns_ok_with_meta() {
        let mut exec = executor(10);
        let task = TaskMessage {
            task: TaskKind::Train,
            payload: MixedMap::new(),
            round_number: 1,
        };
        let abort = AtomicBool::new(false);
        let outcome = exec.handle_train(task, &abort);
        assert_eq!(outcome.code, ReturnCode::Ok);
        assert_eq!(outcome.meta.num_samples, Some(10));
        assert!(outcome.reply.contains_key("conv1.weight"));
        assert!(matches!(outcome.reply["classifier.bias"], MixedValue::Cipher(_)));
    }

    #[test]
    fn train_with_no_samples_returns_zero_sample_update() {
        let mut exec = executor(0);
        let task = TaskMessage {
            task: TaskKind::Train,
            payload: MixedMap::new(),
            round_number: 1,
        };
        let abort = AtomicBool::new(false);
        let outcome = exec.handle_train(task, &abort);
        assert_eq!(outcome.code, ReturnCode::Ok);
        assert_eq!(outcome.meta.num_samples, Some(0));
        assert!(outcome.reply.is_empty());
    }

    #[test]
    fn train_honors_abort_signal() {
        let mut exec = executor(10);
        let task = TaskMessage {
            task: TaskKind::Train,
            payload: MixedMap::new(),
            round_number: 1,
        };
        let abort = AtomicBool::new(true);
        let outcome = exec.handle_train(task, &abort);
        assert_eq!(outcome.code, ReturnCode::TaskAborted);
    }

    #[test]
    fn submit_model_returns_full_state() {
        let exec = executor(5);
        let outcome = exec.handle_submit_model();
        assert_eq!(outcome.code, ReturnCode::Ok);
        assert!(outcome.reply.contains_key("conv1.weight"));
        assert!(matches!(outcome.reply["classifier.bias"], MixedValue::Plain(_)));
    }
}
