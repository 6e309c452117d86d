use super::pipeline_models::RecordOutcome;
use crate::core::backend_error::BackendError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A persisted outcome, as read back from the history store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub run_id: String,
    pub outcome: RecordOutcome,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only log of per-record outcomes across runs.
#[async_trait]
pub trait OutcomeLog: Send + Sync {
    async fn record(&self, run_id: &str, outcome: &RecordOutcome) -> Result<(), BackendError>;

    /// Most recent entries first.
    async fn recent(&self, limit: usize) -> Result<Vec<HistoryEntry>, BackendError>;
}
