//! Round Orchestrator (C7): the broadcast -> collect -> aggregate ->
//! persist state machine driving one privacy-preserving FL round at a
//! time, tolerating missing or Byzantine clients.

pub mod config;
pub mod error;
pub mod state;

pub use config::OrchestratorConfig;
pub use error::OrchestratorError;
pub use state::{OrchestratorState, RoundOutcome};

use chrono::Utc;
use federated_learning::{
    Aggregator, ClientTransport, MixedMap, MixedValue, ReturnCode, TaskKind, TaskMessage,
};
use metrics_writer::{ClientUpdateRow, MetricsWriter, RoundMetricRow, RoundStatus, RoundUpsert, TrustScoreRow};
use selective_he::{Ciphertext, HeContext};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tensor::{NamedTensorMap, Tensor};

/// Drives rounds against a [`ClientTransport`], decrypting and aggregating
/// body/head updates and persisting round artifacts via [`MetricsWriter`].
///
/// The orchestrator holds the CKKS-style secret key: the server decrypts
/// client heads before averaging them, which undermines the privacy
/// promise of selective HE, but the round cannot aggregate encrypted
/// heads without it.
pub struct Orchestrator {
    config: OrchestratorConfig,
    clients: Vec<String>,
    head_prefix: String,
    transport: Arc<dyn ClientTransport>,
    aggregator: Aggregator,
    he: HeContext,
    metrics: MetricsWriter,
    abort: Arc<AtomicBool>,
    state: OrchestratorState,
    round_number: u32,
    global_weights: NamedTensorMap,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        clients: Vec<String>,
        transport: Arc<dyn ClientTransport>,
        he: HeContext,
        metrics: MetricsWriter,
        abort: Arc<AtomicBool>,
    ) -> Self {
        Orchestrator {
            config,
            clients,
            head_prefix: "classifier.".to_string(),
            transport,
            aggregator: Aggregator::default(),
            he,
            metrics,
            abort,
            state: OrchestratorState::Idle,
            round_number: 1,
            global_weights: NamedTensorMap::new(),
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Run rounds until `num_rounds` have completed (successfully or not)
    /// or abort is signalled.
    pub async fn run(&mut self) -> Vec<RoundOutcome> {
        let mut outcomes = Vec::new();
        while self.round_number <= self.config.num_rounds {
            if self.abort.load(Ordering::SeqCst) {
                outcomes.push(RoundOutcome::Aborted {
                    round_number: self.round_number,
                });
                break;
            }
            outcomes.push(self.run_round().await);
            self.round_number += 1;
        }
        outcomes
    }

    /// Execute a single round: broadcast, collect, aggregate, persist.
    #[tracing::instrument(skip(self), fields(round = self.round_number))]
    pub async fn run_round(&mut self) -> RoundOutcome {
        if self.abort.load(Ordering::SeqCst) {
            self.state = OrchestratorState::Idle;
            return RoundOutcome::Aborted {
                round_number: self.round_number,
            };
        }

        self.state = OrchestratorState::Broadcasting;
        let round_id = self
            .metrics
            .write_round(RoundUpsert {
                round_number: self.round_number as i64,
                status: Some(RoundStatus::InProgress),
                started_at: Some(Utc::now()),
                ..Default::default()
            })
            .await;

        let payload: MixedMap = self
            .global_weights
            .iter()
            .map(|(k, t)| (k.clone(), MixedValue::Plain(t.clone())))
            .collect();

        let task = TaskMessage {
            task: TaskKind::Train,
            payload,
            round_number: self.round_number,
        };

        let (tx, mut rx) = tokio::sync::mpsc::channel(self.clients.len().max(1));
        for client in &self.clients {
            let transport = Arc::clone(&self.transport);
            let client_name = client.clone();
            let task = task.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let outcome = transport.dispatch(&client_name, task).await;
                let _ = tx.send((client_name, outcome)).await;
            });
        }
        drop(tx);

        let mut replies = Vec::with_capacity(self.clients.len());
        while let Some(reply) = rx.recv().await {
            if self.abort.load(Ordering::SeqCst) {
                self.state = OrchestratorState::Idle;
                return RoundOutcome::Aborted {
                    round_number: self.round_number,
                };
            }
            replies.push(reply);
        }

        let ok_replies: Vec<_> = replies
            .into_iter()
            .filter(|(_, outcome)| outcome.code == ReturnCode::Ok)
            .collect();

        if ok_replies.len() < self.config.min_clients as usize {
            self.state = OrchestratorState::Failed;
            self.metrics
                .write_round(RoundUpsert {
                    round_number: self.round_number as i64,
                    status: Some(RoundStatus::Failed),
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                })
                .await;
            let reason = OrchestratorError::InsufficientQuorum {
                round_number: self.round_number,
                got: ok_replies.len(),
                needed: self.config.min_clients as usize,
            }
            .to_string();
            return RoundOutcome::Failed {
                round_number: self.round_number,
                reason,
            };
        }

        self.state = OrchestratorState::Aggregating;
        let aggregation_start = std::time::Instant::now();

        let mut bodies = Vec::with_capacity(ok_replies.len());
        let mut head_ciphers_per_client = Vec::with_capacity(ok_replies.len());
        for (_, outcome) in &ok_replies {
            let mut body = NamedTensorMap::new();
            let mut head: HashMap<String, Ciphertext> = HashMap::new();
            for (key, value) in &outcome.reply {
                match value {
                    MixedValue::Plain(t) if !key.starts_with(&self.head_prefix) => {
                        body.insert(key.clone(), t.clone());
                    }
                    MixedValue::Cipher(bytes) if key.starts_with(&self.head_prefix) => {
                        head.insert(key.clone(), Ciphertext { bytes: bytes.clone() });
                    }
                    _ => {}
                }
            }
            bodies.push(body);
            head_ciphers_per_client.push(head);
        }

        let median_body = match self.aggregator.aggregate(&bodies) {
            Ok(m) => m,
            Err(err) => {
                let err = OrchestratorError::from(err);
                tracing::error!(%err, "aggregation failed");
                self.state = OrchestratorState::Failed;
                self.metrics
                    .write_round(RoundUpsert {
                        round_number: self.round_number as i64,
                        status: Some(RoundStatus::Failed),
                        completed_at: Some(Utc::now()),
                        ..Default::default()
                    })
                    .await;
                return RoundOutcome::Failed {
                    round_number: self.round_number,
                    reason: err.to_string(),
                };
            }
        };
        let distances = self
            .aggregator
            .compute_distances(&bodies, &median_body)
            .unwrap_or_default();

        let mut head_updates = Vec::new();
        for ciphers in &head_ciphers_per_client {
            if ciphers.is_empty() {
                continue;
            }
            match self.he.decrypt_head(ciphers) {
                Ok(decrypted) => head_updates.push(decrypted),
                Err(err) => tracing::warn!(%err, "failed to decrypt a client's head; excluding from mean"),
            }
        }
        let mean_head = mean_named_tensor_maps(&head_updates);

        self.global_weights = median_body.clone();
        for (key, tensor) in &mean_head {
            self.global_weights.insert(key.clone(), tensor.clone());
        }

        let aggregation_time_ms = aggregation_start.elapsed().as_millis() as i32;

        let local_losses: Vec<f32> = ok_replies
            .iter()
            .filter_map(|(_, o)| o.meta.local_loss)
            .collect();
        let local_aucs: Vec<f32> = ok_replies
            .iter()
            .filter_map(|(_, o)| o.meta.local_auc)
            .collect();
        let global_loss = mean(&local_losses);
        let global_auc = mean(&local_aucs);
        let encryption_overhead_ms: i32 = ok_replies
            .iter()
            .filter_map(|(_, o)| o.meta.encryption_overhead_ms)
            .sum::<u64>() as i32;

        let poisoned_clients_detected = distances.iter().filter(|&&d| d > 2.0).count() as u32;

        self.state = OrchestratorState::Persisting;
        self.metrics
            .write_round(RoundUpsert {
                round_number: self.round_number as i64,
                status: Some(RoundStatus::Completed),
                num_clients: Some(ok_replies.len() as i32),
                global_loss: Some(global_loss),
                global_auc: Some(global_auc),
                completed_at: Some(Utc::now()),
                ..Default::default()
            })
            .await;

        if let Some(round_id) = round_id {
            self.metrics
                .write_round_metric(RoundMetricRow {
                    round_id,
                    aggregation_method: "geometric_median".to_string(),
                    weiszfeld_iterations: self.aggregator.last_iterations().unwrap_or(0) as i32,
                    convergence_epsilon: federated_learning::aggregator::DEFAULT_EPS,
                    encryption_overhead_ms,
                    aggregation_time_ms,
                    poisoned_clients_detected: poisoned_clients_detected as i32,
                })
                .await;

            for ((client_name, outcome), distance) in ok_replies.iter().zip(distances.iter()) {
                self.metrics
                    .write_client_update(ClientUpdateRow {
                        round_id,
                        client_name: client_name.clone(),
                        local_loss: outcome.meta.local_loss.unwrap_or(0.0),
                        local_auc: outcome.meta.local_auc.unwrap_or(0.0),
                        num_samples: outcome.meta.num_samples.unwrap_or(0) as i32,
                        euclidean_distance: *distance,
                        encryption_status: outcome
                            .meta
                            .encryption_status
                            .clone()
                            .unwrap_or_else(|| "unknown".to_string()),
                    })
                    .await;

                let (score, is_flagged) = federated_learning::trust_score(*distance);
                self.metrics
                    .write_trust_score(TrustScoreRow {
                        client_name: client_name.clone(),
                        round_id,
                        score,
                        deviation_avg: *distance,
                        is_flagged,
                    })
                    .await;
            }
        } else {
            tracing::warn!("round row unavailable; skipping dependent metric/update/trust rows");
        }

        self.state = OrchestratorState::Completed;
        RoundOutcome::Completed {
            round_number: self.round_number,
            global_loss,
            global_auc,
            poisoned_clients_detected,
        }
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

/// Element-wise arithmetic mean across a set of named-tensor maps sharing
/// the same keys and shapes. Empty input yields an empty map.
fn mean_named_tensor_maps(maps: &[NamedTensorMap]) -> NamedTensorMap {
    let mut out = NamedTensorMap::new();
    let Some(reference) = maps.first() else {
        return out;
    };
    let n = maps.len() as f32;

    for key in reference.keys() {
        let shape = reference[key].shape.clone();
        let mut sum = vec![0.0f32; reference[key].numel()];
        for map in maps {
            if let Some(tensor) = map.get(key) {
                for (acc, v) in sum.iter_mut().zip(tensor.data.iter()) {
                    *acc += v;
                }
            }
        }
        for v in sum.iter_mut() {
            *v /= n;
        }
        out.insert(key.clone(), Tensor::new(shape, sum).expect("shape preserved"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_named_tensor_maps_averages_elementwise() {
        let mut a = NamedTensorMap::new();
        a.insert("w".to_string(), Tensor::new(vec![2], vec![1.0, 1.0]).unwrap());
        let mut b = NamedTensorMap::new();
        b.insert("w".to_string(), Tensor::new(vec![2], vec![3.0, 3.0]).unwrap());

        let result = mean_named_tensor_maps(&[a, b]);
        assert_eq!(result["w"].data, vec![2.0, 2.0]);
    }

    #[test]
    fn mean_of_empty_input_is_empty() {
        let result = mean_named_tensor_maps(&[]);
        assert!(result.is_empty());
    }
}
