//! Sync bookkeeping types
//!
//! One [`SyncWatermark`] row exists per synchronized entity class. The
//! watermark timestamp is the incremental-sync cursor: it only advances when
//! a run succeeds, so a failed run re-examines the same window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome status of a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    Success,
    Failed,
    InProgress,
}

crate::impl_status_conversions!(SyncRunStatus {
    Success => "success",
    Failed => "failed",
    InProgress => "in_progress",
});

/// What a sync run should cover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncScope {
    /// Catalog plus every pipeline's deals
    All,
    /// Pipelines and stages only
    Catalog,
    /// One pipeline's open deals
    Deals {
        /// CRM pipeline identifier
        pipeline_id: i64,
    },
}

impl std::fmt::Display for SyncScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Catalog => write!(f, "catalog"),
            Self::Deals { pipeline_id } => write!(f, "deals_{pipeline_id}"),
        }
    }
}

/// Per-entity-class sync cursor and last-run bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWatermark {
    /// Entity class key, e.g. `pipelines`, `stages`, `deals_5`
    pub entity: String,
    /// Last successful sync instant; `None` until the first success
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Records examined during the last completed run
    pub records_seen: i64,
    /// Duration of the last completed run
    pub duration_ms: i64,
    /// Status of the most recent run
    pub status: SyncRunStatus,
    /// Error message of the most recent failure, if any
    pub last_error: Option<String>,
    /// When this row was last written
    pub updated_at: DateTime<Utc>,
}

impl SyncWatermark {
    /// Watermark key for the pipeline catalog
    pub const PIPELINES: &'static str = "pipelines";
    /// Watermark key for the stage catalog
    pub const STAGES: &'static str = "stages";

    /// Watermark key for one pipeline's deals
    #[must_use]
    pub fn deals_key(pipeline_id: i64) -> String {
        format!("deals_{pipeline_id}")
    }
}

/// Summary of one completed sync run, returned by the executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Entity class the run covered
    pub entity: String,
    /// Records fetched from the CRM
    pub records_seen: usize,
    /// Records written to the cache
    pub records_upserted: usize,
    /// Records dropped for integrity violations
    pub records_skipped: usize,
    /// Wall-clock duration of the run
    pub duration_ms: i64,
}
