use crate::error::FacadeError;
use crate::model::{ClientRow, RoundRow, TrustScoreRow};
use crate::traits::{ClientReader, RoundReader, TrustScoreReader};
use sqlx::PgPool;

pub struct PgDashboardFacade {
    pool: PgPool,
}

impl PgDashboardFacade {
    pub fn new(pool: PgPool) -> Self {
        PgDashboardFacade { pool }
    }
}

#[async_trait::async_trait]
impl RoundReader for PgDashboardFacade {
    async fn get_round(&self, round_number: i64) -> Result<Option<RoundRow>, FacadeError> {
        let row = sqlx::query_as::<_, RoundRow>(
            "SELECT id, round_number, job_id, status, num_clients, global_loss, global_auc, started_at, completed_at \
             FROM training_rounds WHERE round_number = $1",
        )
        .bind(round_number)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_rounds(&self, limit: i64) -> Result<Vec<RoundRow>, FacadeError> {
        let rows = sqlx::query_as::<_, RoundRow>(
            "SELECT id, round_number, job_id, status, num_clients, global_loss, global_auc, started_at, completed_at \
             FROM training_rounds ORDER BY round_number DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait::async_trait]
impl ClientReader for PgDashboardFacade {
    async fn get_client(&self, client_id: &str) -> Result<Option<ClientRow>, FacadeError> {
        let row = sqlx::query_as::<_, ClientRow>(
            "SELECT id, client_id, name, description, data_profile, certificate_cn, status, last_heartbeat, created_at \
             FROM clients WHERE client_id = $1",
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_clients(&self) -> Result<Vec<ClientRow>, FacadeError> {
        let rows = sqlx::query_as::<_, ClientRow>(
            "SELECT id, client_id, name, description, data_profile, certificate_cn, status, last_heartbeat, created_at \
             FROM clients ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn set_client_status(&self, client_id: &str, status: &str) -> Result<(), FacadeError> {
        sqlx::query("UPDATE clients SET status = $2 WHERE client_id = $1")
            .bind(client_id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl TrustScoreReader for PgDashboardFacade {
    async fn list_trust_scores_for_round(&self, round_id: i64) -> Result<Vec<TrustScoreRow>, FacadeError> {
        let rows = sqlx::query_as::<_, TrustScoreRow>(
            "SELECT id, client_id, round_id, score, deviation_avg, is_flagged, created_at \
             FROM trust_scores WHERE round_id = $1",
        )
        .bind(round_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
