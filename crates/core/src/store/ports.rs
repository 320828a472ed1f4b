//! Port interfaces for the cache store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealflow_domain::{Deal, DealStatus, Note, Pipeline, Result, Stage, SyncWatermark};

/// Optional filters for deal search
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DealFilter {
    /// Restrict to one pipeline
    pub pipeline_id: Option<i64>,
    /// Restrict to a status; `None` means open deals only
    pub status: Option<DealStatus>,
}

/// Trait for managing the cached pipeline catalog
#[async_trait]
pub trait PipelineRepository: Send + Sync {
    /// Replace the whole catalog atomically
    async fn replace_pipelines(&self, pipelines: &[Pipeline]) -> Result<()>;

    /// List the catalog ordered by display order
    async fn list_pipelines(&self) -> Result<Vec<Pipeline>>;

    /// Get one pipeline by its CRM identifier
    async fn get_pipeline(&self, id: i64) -> Result<Option<Pipeline>>;
}

/// Trait for managing the cached stage catalog
#[async_trait]
pub trait StageRepository: Send + Sync {
    /// Replace the whole catalog atomically
    async fn replace_stages(&self, stages: &[Stage]) -> Result<()>;

    /// List stages, optionally scoped to a pipeline, ordered by display order
    async fn list_stages(&self, pipeline_id: Option<i64>) -> Result<Vec<Stage>>;

    /// Get one stage by its CRM identifier
    async fn get_stage(&self, id: i64) -> Result<Option<Stage>>;
}

/// Trait for managing cached deals
#[async_trait]
pub trait DealRepository: Send + Sync {
    /// Insert or overwrite one deal, keyed by its CRM identifier
    ///
    /// The write is atomic and last-writer-by-timestamp: a stored deal with a
    /// newer `update_time` is left untouched.
    async fn upsert_deal(&self, deal: &Deal) -> Result<()>;

    /// Get one deal by its CRM identifier
    async fn get_deal(&self, id: i64) -> Result<Option<Deal>>;

    /// Open deals for the given pipelines; empty slice means all pipelines
    async fn open_deals(&self, pipeline_ids: &[i64]) -> Result<Vec<Deal>>;

    /// Open deals whose last update predates `cutoff`, oldest first
    async fn overdue_deals(&self, pipeline_id: i64, cutoff: DateTime<Utc>) -> Result<Vec<Deal>>;

    /// Open deals whose stage entry (falling back to last update) predates
    /// `cutoff`, longest-stuck first
    async fn stuck_deals(&self, pipeline_id: i64, cutoff: DateTime<Utc>) -> Result<Vec<Deal>>;

    /// Open deals owned by `owner`, scoped to `pipeline_ids` when non-empty
    async fn deals_by_owner(&self, owner: &str, pipeline_ids: &[i64]) -> Result<Vec<Deal>>;

    /// Case-insensitive title/organization substring search
    async fn search_deals(&self, query: &str, filter: DealFilter) -> Result<Vec<Deal>>;
}

/// Trait for managing cached notes
#[async_trait]
pub trait NoteRepository: Send + Sync {
    /// Append notes, ignoring identifiers already present
    ///
    /// Returns the number of newly stored notes.
    async fn insert_notes(&self, notes: &[Note]) -> Result<usize>;

    /// Most recent notes for a deal, newest first
    async fn recent_notes(&self, deal_id: i64, limit: usize) -> Result<Vec<Note>>;
}

/// Trait for sync watermark bookkeeping
///
/// Transitions must preserve watermark monotonicity: only
/// [`mark_success`](SyncStateRepository::mark_success) may move
/// `last_synced_at`, and only forward to the run's start instant.
#[async_trait]
pub trait SyncStateRepository: Send + Sync {
    /// Get the watermark for an entity class
    async fn get_watermark(&self, entity: &str) -> Result<Option<SyncWatermark>>;

    /// List all watermarks, for status reporting
    async fn list_watermarks(&self) -> Result<Vec<SyncWatermark>>;

    /// Record that a run for `entity` is executing
    async fn mark_in_progress(&self, entity: &str) -> Result<()>;

    /// Record a successful run and advance the watermark to `started_at`
    async fn mark_success(
        &self,
        entity: &str,
        started_at: DateTime<Utc>,
        records_seen: i64,
        duration_ms: i64,
    ) -> Result<()>;

    /// Record a failed run; the watermark timestamp stays where it was
    async fn mark_failed(&self, entity: &str, error: &str, duration_ms: i64) -> Result<()>;
}
