//! Deal health service - read-only business-health queries

use std::sync::Arc;

use chrono::{Duration, Utc};
use dealflow_domain::{Deal, Note, Result};
use tracing::{debug, instrument};

use crate::store::ports::{DealFilter, DealRepository, NoteRepository};

/// Read-only query layer over the cache store
///
/// Overdue and stuck are deliberately distinct signals: overdue measures
/// silence (no CRM update), stuck measures stage dwell time. A deal can be
/// either without being the other.
pub struct DealHealthService {
    deals: Arc<dyn DealRepository>,
    notes: Arc<dyn NoteRepository>,
}

impl DealHealthService {
    /// Create a new health service
    pub fn new(deals: Arc<dyn DealRepository>, notes: Arc<dyn NoteRepository>) -> Self {
        Self { deals, notes }
    }

    /// Open deals of `pipeline_id` not updated for at least `min_days`,
    /// most overdue first
    #[instrument(skip(self))]
    pub async fn overdue_deals(&self, pipeline_id: i64, min_days: i64) -> Result<Vec<Deal>> {
        let cutoff = Utc::now() - Duration::days(min_days);
        let deals = self.deals.overdue_deals(pipeline_id, cutoff).await?;
        debug!(pipeline_id, min_days, count = deals.len(), "overdue query complete");
        Ok(deals)
    }

    /// Open deals of `pipeline_id` sitting in their current stage for at
    /// least `min_days`, longest-stuck first
    ///
    /// Uses the stage-entry timestamp and falls back to the last update for
    /// deals the CRM never reported a stage change for.
    #[instrument(skip(self))]
    pub async fn stuck_deals(&self, pipeline_id: i64, min_days: i64) -> Result<Vec<Deal>> {
        let cutoff = Utc::now() - Duration::days(min_days);
        let deals = self.deals.stuck_deals(pipeline_id, cutoff).await?;
        debug!(pipeline_id, min_days, count = deals.len(), "stuck query complete");
        Ok(deals)
    }

    /// Open deals owned by `owner`, optionally scoped to pipelines
    #[instrument(skip(self))]
    pub async fn deals_by_owner(&self, owner: &str, pipeline_ids: &[i64]) -> Result<Vec<Deal>> {
        self.deals.deals_by_owner(owner, pipeline_ids).await
    }

    /// Case-insensitive title/organization search
    #[instrument(skip(self))]
    pub async fn search_deals(&self, query: &str, filter: DealFilter) -> Result<Vec<Deal>> {
        self.deals.search_deals(query, filter).await
    }

    /// One deal together with its cached recent notes, newest first
    ///
    /// Reads the cache only; refreshing notes from the CRM is the note
    /// feed's concern and happens before this call.
    #[instrument(skip(self))]
    pub async fn deal_with_notes(
        &self,
        deal_id: i64,
        note_limit: usize,
    ) -> Result<Option<(Deal, Vec<Note>)>> {
        let Some(deal) = self.deals.get_deal(deal_id).await? else {
            return Ok(None);
        };
        let notes = self.notes.recent_notes(deal_id, note_limit).await?;
        Ok(Some((deal, notes)))
    }
}
