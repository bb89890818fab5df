//! Metrics Writer (C8): transactional persistence of rounds, per-client
//! updates, per-round metrics, and trust scores against a relational
//! schema, with a log-and-swallow error policy so metric persistence can
//! never block training progress.

mod registry;
mod status;
mod writer;

pub use registry::ClientRegistry;
pub use status::RoundStatus;
pub use writer::{ClientUpdateRow, MetricsWriter, RoundMetricRow, RoundUpsert, TrustScoreRow};
