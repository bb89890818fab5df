//! Read-only data-access facade over the core's persisted schema (§3): the
//! seam a dashboard REST layer would call into. No HTTP server, auth, or
//! routing lives here -- see `traits.rs`.

mod error;
mod model;
mod pg;
mod traits;
mod trust;

pub use error::FacadeError;
pub use model::{ClientRow, RoundRow, TrustScoreRow};
pub use pg::PgDashboardFacade;
pub use traits::{ClientReader, RoundReader, TrustScoreReader};
pub use trust::{compute_trust_score, TrustAssessment};
