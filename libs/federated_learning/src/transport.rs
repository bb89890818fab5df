//! The framework-transport contract (consumer side, inbound to the Client
//! Executor). The real FL-framework transport is out of scope; this module
//! defines the message shapes C6/C7 compile against, plus a
//! [`ClientTransport`] trait object the orchestrator dispatches through.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tensor::Tensor;

/// A map whose values are either plaintext dense tensors or opaque
/// ciphertext bytes -- a tagged variant in place of a dynamically-typed
/// payload.
pub type MixedMap = BTreeMap<String, MixedValue>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum MixedValue {
    Plain(Tensor),
    Cipher(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    Train,
    Validate,
    SubmitModel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task: TaskKind,
    pub payload: MixedMap,
    pub round_number: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnCode {
    Ok,
    TaskAborted,
    TaskUnknown,
    ExecutionException,
}

/// Per-task metadata returned alongside a reply payload. Fields are
/// optional because `train`, `validate`, and `submit_model` each populate a
/// different subset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskMeta {
    pub local_loss: Option<f32>,
    pub local_auc: Option<f32>,
    pub val_loss: Option<f32>,
    pub val_auc: Option<f32>,
    pub num_samples: Option<u32>,
    pub encryption_overhead_ms: Option<u64>,
    pub encryption_status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub code: ReturnCode,
    pub reply: MixedMap,
    pub meta: TaskMeta,
}

impl TaskOutcome {
    pub fn ok(reply: MixedMap, meta: TaskMeta) -> Self {
        TaskOutcome {
            code: ReturnCode::Ok,
            reply,
            meta,
        }
    }

    pub fn aborted() -> Self {
        TaskOutcome {
            code: ReturnCode::TaskAborted,
            reply: MixedMap::new(),
            meta: TaskMeta::default(),
        }
    }

    pub fn execution_exception() -> Self {
        TaskOutcome {
            code: ReturnCode::ExecutionException,
            reply: MixedMap::new(),
            meta: TaskMeta::default(),
        }
    }

    pub fn unknown_task() -> Self {
        TaskOutcome {
            code: ReturnCode::TaskUnknown,
            reply: MixedMap::new(),
            meta: TaskMeta::default(),
        }
    }
}

/// Dispatches a task to a named client and awaits its outcome. The real
/// implementation is an external FL-framework transport; `LocalClientTransport`
/// in [`crate::executor`] is the in-process test double used by the
/// orchestrator's own integration tests.
#[async_trait::async_trait]
pub trait ClientTransport: Send + Sync {
    async fn dispatch(&self, client: &str, task: TaskMessage) -> TaskOutcome;
}
