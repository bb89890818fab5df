//! Transactional upsert/insert operations over the persisted FL schema
//! (training_rounds, client_updates, round_metrics, trust_scores, clients).
//! Every public method opens its own session, commits or rolls back, and
//! swallows failures: persistence errors must never halt a training round.

use crate::status::RoundStatus;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, QueryBuilder};

#[derive(Debug, Clone, Default)]
pub struct RoundUpsert {
    pub round_number: i64,
    pub job_id: Option<String>,
    pub status: Option<RoundStatus>,
    pub num_clients: Option<i32>,
    pub global_loss: Option<f32>,
    pub global_auc: Option<f32>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ClientUpdateRow {
    pub round_id: i64,
    pub client_name: String,
    pub local_loss: f32,
    pub local_auc: f32,
    pub num_samples: i32,
    pub euclidean_distance: f32,
    pub encryption_status: String,
}

#[derive(Debug, Clone)]
pub struct RoundMetricRow {
    pub round_id: i64,
    pub aggregation_method: String,
    pub weiszfeld_iterations: i32,
    pub convergence_epsilon: f32,
    pub encryption_overhead_ms: i32,
    pub aggregation_time_ms: i32,
    pub poisoned_clients_detected: i32,
}

#[derive(Debug, Clone)]
pub struct TrustScoreRow {
    pub client_name: String,
    pub round_id: i64,
    pub score: f32,
    pub deviation_avg: f32,
    pub is_flagged: bool,
}

/// Owns a bounded Postgres connection pool. Construct once per process;
/// `close()` disposes the pool.
pub struct MetricsWriter {
    pool: PgPool,
}

impl MetricsWriter {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(MetricsWriter { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        MetricsWriter { pool }
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Resolve `clients.client_id` (string identifier) to the row's
    /// integer primary key. Returns `None`, logging a warning, if the
    /// client is not registered -- callers still insert the dependent row
    /// with a NULL client FK (a deliberate best-effort policy).
    async fn resolve_client_pk(&self, client_name: &str) -> Option<i64> {
        match sqlx::query_scalar::<_, i64>("SELECT id FROM clients WHERE client_id = $1")
            .bind(client_name)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(Some(id)) => Some(id),
            Ok(None) => {
                tracing::warn!(client_name, "unknown client; inserting row with NULL client FK");
                None
            }
            Err(err) => {
                tracing::error!(%err, client_name, "failed to resolve client primary key");
                None
            }
        }
    }

    /// SELECT by `round_number`; UPDATE the non-null fields if the row
    /// exists, else INSERT. Returns the row's primary key.
    #[tracing::instrument(skip(self, upsert), fields(round_number = upsert.round_number))]
    pub async fn write_round(&self, upsert: RoundUpsert) -> Option<i64> {
        let existing =
            sqlx::query_scalar::<_, i64>("SELECT id FROM training_rounds WHERE round_number = $1")
                .bind(upsert.round_number)
                .fetch_optional(&self.pool)
                .await;

        let existing_id = match existing {
            Ok(id) => id,
            Err(err) => {
                tracing::error!(%err, "write_round: select failed");
                return None;
            }
        };

        let result = if let Some(id) = existing_id {
            self.update_round(id, &upsert).await
        } else {
            self.insert_round(&upsert).await
        };

        match result {
            Ok(id) => Some(id),
            Err(err) => {
                tracing::error!(%err, "write_round failed");
                None
            }
        }
    }

    async fn update_round(&self, id: i64, upsert: &RoundUpsert) -> Result<i64, sqlx::Error> {
        let mut builder = QueryBuilder::new("UPDATE training_rounds SET ");
        let mut first = true;

        macro_rules! set_field {
            ($name:literal, $value:expr) => {
                if let Some(value) = $value {
                    if !first {
                        builder.push(", ");
                    }
                    builder.push($name).push(" = ");
                    builder.push_bind(value);
                    first = false;
                }
            };
        }

        set_field!("job_id", upsert.job_id.clone());
        set_field!("status", upsert.status.map(|s| s.as_str().to_string()));
        set_field!("num_clients", upsert.num_clients);
        set_field!("global_loss", upsert.global_loss);
        set_field!("global_auc", upsert.global_auc);
        set_field!("started_at", upsert.started_at);
        set_field!("completed_at", upsert.completed_at);

        if first {
            return Ok(id);
        }

        builder.push(" WHERE id = ").push_bind(id);
        builder.build().execute(&self.pool).await?;
        Ok(id)
    }

    async fn insert_round(&self, upsert: &RoundUpsert) -> Result<i64, sqlx::Error> {
        let status = upsert.status.unwrap_or(RoundStatus::Pending).as_str();
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO training_rounds \
                (round_number, job_id, status, num_clients, global_loss, global_auc, started_at, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING id",
        )
        .bind(upsert.round_number)
        .bind(&upsert.job_id)
        .bind(status)
        .bind(upsert.num_clients)
        .bind(upsert.global_loss)
        .bind(upsert.global_auc)
        .bind(upsert.started_at)
        .bind(upsert.completed_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn write_client_update(&self, row: ClientUpdateRow) -> Option<i64> {
        let client_pk = self.resolve_client_pk(&row.client_name).await;
        let result = sqlx::query_scalar::<_, i64>(
            "INSERT INTO client_updates \
                (round_id, client_id, local_loss, local_auc, num_samples, euclidean_distance, encryption_status, submitted_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, now()) \
             RETURNING id",
        )
        .bind(row.round_id)
        .bind(client_pk)
        .bind(row.local_loss)
        .bind(row.local_auc)
        .bind(row.num_samples)
        .bind(row.euclidean_distance)
        .bind(&row.encryption_status)
        .fetch_one(&self.pool)
        .await;

        result
            .map_err(|err| tracing::error!(%err, "write_client_update failed"))
            .ok()
    }

    pub async fn write_round_metric(&self, row: RoundMetricRow) -> Option<i64> {
        let result = sqlx::query_scalar::<_, i64>(
            "INSERT INTO round_metrics \
                (round_id, aggregation_method, weiszfeld_iterations, convergence_epsilon, \
                 encryption_overhead_ms, aggregation_time_ms, poisoned_clients_detected, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, now()) \
             RETURNING id",
        )
        .bind(row.round_id)
        .bind(&row.aggregation_method)
        .bind(row.weiszfeld_iterations)
        .bind(row.convergence_epsilon)
        .bind(row.encryption_overhead_ms)
        .bind(row.aggregation_time_ms)
        .bind(row.poisoned_clients_detected)
        .fetch_one(&self.pool)
        .await;

        result
            .map_err(|err| tracing::error!(%err, "write_round_metric failed"))
            .ok()
    }

    pub async fn write_trust_score(&self, row: TrustScoreRow) -> Option<i64> {
        let client_pk = self.resolve_client_pk(&row.client_name).await;
        let result = sqlx::query_scalar::<_, i64>(
            "INSERT INTO trust_scores (client_id, round_id, score, deviation_avg, is_flagged, created_at) \
             VALUES ($1, $2, $3, $4, $5, now()) \
             RETURNING id",
        )
        .bind(client_pk)
        .bind(row.round_id)
        .bind(row.score)
        .bind(row.deviation_avg)
        .bind(row.is_flagged)
        .fetch_one(&self.pool)
        .await;

        result
            .map_err(|err| tracing::error!(%err, "write_trust_score failed"))
            .ok()
    }

    pub async fn update_client_heartbeat(&self, client_id: &str, status: &str) {
        let result = sqlx::query(
            "UPDATE clients SET last_heartbeat = now(), status = $2 WHERE client_id = $1",
        )
        .bind(client_id)
        .bind(status)
        .execute(&self.pool)
        .await;

        if let Err(err) = result {
            tracing::error!(%err, client_id, "update_client_heartbeat failed");
        }
    }
}
