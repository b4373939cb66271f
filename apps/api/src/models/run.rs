//! Row types for persisted screening runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScreeningRunRow {
    pub id: Uuid,
    pub job_id: String,
    /// Snapshot of the `PipelineConfig` the run executed with.
    pub config: Value,
    pub partial: bool,
    pub result_count: i32,
    pub failure_count: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MatchResultRow {
    pub id: Uuid,
    pub run_id: Uuid,
    pub candidate_id: String,
    pub score: f64,
    pub rationale: Value,
    pub low_confidence: bool,
    /// Rank within the run, 0-based, matching the sorted result order.
    pub position: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RunFailureRow {
    pub id: Uuid,
    pub run_id: Uuid,
    pub candidate_id: String,
    pub error_kind: String,
    pub detail: String,
}
