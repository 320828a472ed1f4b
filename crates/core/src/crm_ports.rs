//! Port interface for the remote CRM
//!
//! The gateway hides pagination and wire-format conversion; implementations
//! return fully converted domain records in CRM order. Cross-record integrity
//! checks (stage → pipeline references, timestamp ordering) are the sync
//! executor's job, not the gateway's.

use async_trait::async_trait;
use dealflow_domain::{Deal, Note, Pipeline, Result, Stage};

/// Read-only access to the remote CRM
#[async_trait]
pub trait CrmGateway: Send + Sync {
    /// Fetch the complete pipeline catalog
    async fn fetch_pipelines(&self) -> Result<Vec<Pipeline>>;

    /// Fetch the complete stage catalog across all pipelines
    async fn fetch_stages(&self) -> Result<Vec<Stage>>;

    /// Fetch every open deal of one pipeline, fully paginated
    async fn fetch_open_deals(&self, pipeline_id: i64) -> Result<Vec<Deal>>;

    /// Fetch the most recent notes of one deal, newest first
    async fn fetch_notes(&self, deal_id: i64, limit: usize) -> Result<Vec<Note>>;
}
