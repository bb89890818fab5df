use std::fmt;

/// Lifecycle status of a persisted training round. Stored as the column's
/// literal text value; mirrors the source's status strings verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundStatus {
    Pending,
    InProgress,
    Aggregating,
    Completed,
    Failed,
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RoundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundStatus::Pending => "pending",
            RoundStatus::InProgress => "in_progress",
            RoundStatus::Aggregating => "aggregating",
            RoundStatus::Completed => "completed",
            RoundStatus::Failed => "failed",
        }
    }
}
