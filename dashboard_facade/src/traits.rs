use crate::error::FacadeError;
use crate::model::{ClientRow, RoundRow, TrustScoreRow};

/// Read-only accessors over the core's persisted schema. The REST dashboard
/// that consumes these (authentication, routing, request handling) is out
/// of scope; this crate is the data-access seam it would call into.
#[async_trait::async_trait]
pub trait RoundReader: Send + Sync {
    async fn get_round(&self, round_number: i64) -> Result<Option<RoundRow>, FacadeError>;
    async fn list_rounds(&self, limit: i64) -> Result<Vec<RoundRow>, FacadeError>;
}

#[async_trait::async_trait]
pub trait ClientReader: Send + Sync {
    async fn get_client(&self, client_id: &str) -> Result<Option<ClientRow>, FacadeError>;
    async fn list_clients(&self) -> Result<Vec<ClientRow>, FacadeError>;

    /// The one permitted mutation: an admin may PATCH a client's status.
    async fn set_client_status(&self, client_id: &str, status: &str) -> Result<(), FacadeError>;
}

#[async_trait::async_trait]
pub trait TrustScoreReader: Send + Sync {
    async fn list_trust_scores_for_round(&self, round_id: i64) -> Result<Vec<TrustScoreRow>, FacadeError>;
}
