/// Orchestrator state machine:
///
/// ```text
///  IDLE ──start_round──▶ BROADCASTING
///  BROADCASTING ──min_clients collected──▶ AGGREGATING
///               ──insufficient before timeout──▶ FAILED
///  AGGREGATING  ──success──▶ PERSISTING ──▶ COMPLETED
///               ──exception──▶ FAILED
///  COMPLETED / FAILED ──(next round)──▶ IDLE
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Broadcasting,
    Aggregating,
    Persisting,
    Completed,
    Failed,
}

/// Outcome of a single `run_round` call, reported to the caller driving
/// the round loop.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundOutcome {
    Completed {
        round_number: u32,
        global_loss: f32,
        global_auc: f32,
        poisoned_clients_detected: u32,
    },
    Failed {
        round_number: u32,
        reason: String,
    },
    Aborted {
        round_number: u32,
    },
}
