use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RoundRow {
    pub id: i64,
    pub round_number: i64,
    pub job_id: Option<String>,
    pub status: String,
    pub num_clients: Option<i32>,
    pub global_loss: Option<f32>,
    pub global_auc: Option<f32>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ClientRow {
    pub id: i64,
    pub client_id: String,
    pub name: String,
    pub description: Option<String>,
    pub data_profile: Option<String>,
    pub certificate_cn: Option<String>,
    pub status: String,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TrustScoreRow {
    pub id: i64,
    pub client_id: Option<i64>,
    pub round_id: i64,
    pub score: f32,
    pub deviation_avg: f32,
    pub is_flagged: bool,
    pub created_at: DateTime<Utc>,
}
