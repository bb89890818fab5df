//! Aggregation-side federated learning core: the Weiszfeld geometric-median
//! engine (C2), the aggregator that drives it over client body updates
//! (C3), the per-client task executor (C6), and the mixed plain/cipher
//! transport contract those components share (§6).

pub mod aggregator;
pub mod executor;
pub mod transport;
pub mod weiszfeld;

pub use aggregator::{trust_score, Aggregator, AggregatorError};
pub use executor::{ClientExecutor, ExecutorConfig, ExecutorError, LocalClientTransport, LocalModel, ValidationMetrics};
pub use transport::{ClientTransport, MixedMap, MixedValue, ReturnCode, TaskKind, TaskMessage, TaskMeta, TaskOutcome};
pub use weiszfeld::{geometric_median, WeiszfeldResult};
