//! On-demand note feed with moka freshness tracking
//!
//! Notes are never part of the periodic batch sync; they are pulled when a
//! caller opens a deal's detail. A per-deal freshness marker with a TTL keeps
//! repeated views from re-hitting the CRM, and fetched notes are persisted
//! append-only so the store keeps serving them when the CRM is unreachable.

use std::sync::Arc;
use std::time::Duration;

use dealflow_core::{CrmGateway, NoteRepository};
use dealflow_domain::{Note, Result};
use moka::sync::Cache;
use tracing::{debug, warn};

/// Default freshness window for a deal's note feed (5 minutes)
///
/// Override via `DEALFLOW_NOTE_CACHE_TTL_SECS`.
pub const DEFAULT_NOTE_CACHE_TTL_SECS: u64 = 300;

/// Default max number of deals tracked as fresh
///
/// Override via `DEALFLOW_NOTE_CACHE_MAX_CAPACITY`.
pub const DEFAULT_NOTE_CACHE_MAX_CAPACITY: u64 = 1024;

/// How many notes one CRM fetch pulls, independent of the display limit
const NOTE_FETCH_LIMIT: usize = 50;

/// Note feed cache configuration
#[derive(Debug, Clone)]
pub struct NoteFeedConfig {
    /// Freshness window per deal
    pub ttl: Duration,
    /// Maximum number of tracked deals
    pub max_capacity: u64,
}

impl Default for NoteFeedConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(
                std::env::var("DEALFLOW_NOTE_CACHE_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_NOTE_CACHE_TTL_SECS),
            ),
            max_capacity: std::env::var("DEALFLOW_NOTE_CACHE_MAX_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_NOTE_CACHE_MAX_CAPACITY),
        }
    }
}

impl NoteFeedConfig {
    /// Config with a custom TTL (useful for testing)
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl, max_capacity: DEFAULT_NOTE_CACHE_MAX_CAPACITY }
    }
}

/// Lazily synced per-deal note feed
///
/// The store is the single source of truth for ordering; the CRM fetch only
/// tops it up. A fetch failure degrades to whatever the store already holds,
/// and the deal is not marked fresh so the next view retries the CRM.
pub struct NoteFeed {
    crm: Arc<dyn CrmGateway>,
    notes: Arc<dyn NoteRepository>,
    /// Deals whose notes were fetched within the TTL
    fresh: Cache<i64, ()>,
}

impl NoteFeed {
    pub fn new(
        crm: Arc<dyn CrmGateway>,
        notes: Arc<dyn NoteRepository>,
        config: NoteFeedConfig,
    ) -> Self {
        let fresh = Cache::builder()
            .time_to_live(config.ttl)
            .max_capacity(config.max_capacity)
            .build();
        Self { crm, notes, fresh }
    }

    /// Most recent notes for a deal, newest first, refreshed from the CRM
    /// when the freshness window has lapsed
    pub async fn recent_notes(&self, deal_id: i64, limit: usize) -> Result<Vec<Note>> {
        if self.fresh.get(&deal_id).is_some() {
            debug!(deal_id, "note feed fresh; serving from store");
            return self.notes.recent_notes(deal_id, limit).await;
        }

        match self.crm.fetch_notes(deal_id, NOTE_FETCH_LIMIT).await {
            Ok(fetched) => {
                let inserted = self.notes.insert_notes(&fetched).await?;
                debug!(deal_id, fetched = fetched.len(), inserted, "note feed refreshed");
                self.fresh.insert(deal_id, ());
            }
            Err(e) => {
                warn!(deal_id, error = %e, "note fetch failed; serving cached notes");
            }
        }

        self.notes.recent_notes(deal_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use dealflow_domain::{Deal, DealflowError, Pipeline, Stage};
    use tempfile::TempDir;

    use super::*;
    use crate::database::{DbManager, SqliteNoteRepository};

    struct ScriptedNotesCrm {
        notes: Vec<Note>,
        fail: bool,
        fetches: AtomicUsize,
    }

    impl ScriptedNotesCrm {
        fn new(notes: Vec<Note>) -> Self {
            Self { notes, fail: false, fetches: AtomicUsize::new(0) }
        }

        fn failing() -> Self {
            Self { notes: vec![], fail: true, fetches: AtomicUsize::new(0) }
        }

        fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CrmGateway for ScriptedNotesCrm {
        async fn fetch_pipelines(&self) -> Result<Vec<Pipeline>> {
            Ok(vec![])
        }

        async fn fetch_stages(&self) -> Result<Vec<Stage>> {
            Ok(vec![])
        }

        async fn fetch_open_deals(&self, _pipeline_id: i64) -> Result<Vec<Deal>> {
            Ok(vec![])
        }

        async fn fetch_notes(&self, _deal_id: i64, limit: usize) -> Result<Vec<Note>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DealflowError::Network("CRM unreachable".into()));
            }
            Ok(self.notes.iter().take(limit).cloned().collect())
        }
    }

    fn note(id: i64, deal_id: i64, day: u32) -> Note {
        Note {
            id,
            deal_id,
            author: Some("Dana".to_string()),
            content: format!("note {id}"),
            noted_at: Utc.with_ymd_and_hms(2025, 6, day, 12, 0, 0).single().unwrap(),
        }
    }

    fn store() -> (Arc<SqliteNoteRepository>, TempDir) {
        let dir = TempDir::new().expect("temp dir created");
        let manager =
            Arc::new(DbManager::new(dir.path().join("test.db"), 2).expect("manager created"));
        manager.run_migrations().expect("migrations run");
        (Arc::new(SqliteNoteRepository::new(manager)), dir)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn second_view_within_ttl_skips_the_crm() {
        let crm = Arc::new(ScriptedNotesCrm::new(vec![note(1, 7, 1)]));
        let (notes, _dir) = store();
        let feed = NoteFeed::new(
            Arc::clone(&crm) as _,
            notes,
            NoteFeedConfig::with_ttl(Duration::from_secs(60)),
        );

        let first = feed.recent_notes(7, 10).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(crm.fetch_count(), 1);

        let second = feed.recent_notes(7, 10).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(crm.fetch_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn refresh_persists_append_only() {
        let crm = Arc::new(ScriptedNotesCrm::new(vec![note(1, 7, 1), note(2, 7, 3)]));
        let (notes, _dir) = store();
        use dealflow_core::NoteRepository;
        notes.insert_notes(&[note(1, 7, 1)]).await.unwrap();

        let feed = NoteFeed::new(
            Arc::clone(&crm) as _,
            Arc::clone(&notes) as _,
            NoteFeedConfig::with_ttl(Duration::from_secs(60)),
        );

        let served = feed.recent_notes(7, 10).await.unwrap();
        assert_eq!(served.iter().map(|n| n.id).collect::<Vec<_>>(), vec![2, 1]);

        // The pre-existing note was not duplicated
        let stored = notes.recent_notes(7, 10).await.unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn crm_failure_serves_cached_and_retries_next_view() {
        let crm = Arc::new(ScriptedNotesCrm::failing());
        let (notes, _dir) = store();
        use dealflow_core::NoteRepository;
        notes.insert_notes(&[note(1, 7, 1)]).await.unwrap();

        let feed = NoteFeed::new(
            Arc::clone(&crm) as _,
            Arc::clone(&notes) as _,
            NoteFeedConfig::with_ttl(Duration::from_secs(60)),
        );

        let served = feed.recent_notes(7, 10).await.unwrap();
        assert_eq!(served.len(), 1);
        assert_eq!(crm.fetch_count(), 1);

        // Failure does not mark the deal fresh
        feed.recent_notes(7, 10).await.unwrap();
        assert_eq!(crm.fetch_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn lapsed_ttl_refetches() {
        let crm = Arc::new(ScriptedNotesCrm::new(vec![note(1, 7, 1)]));
        let (notes, _dir) = store();
        let feed = NoteFeed::new(
            Arc::clone(&crm) as _,
            notes,
            NoteFeedConfig::with_ttl(Duration::from_millis(100)),
        );

        feed.recent_notes(7, 10).await.unwrap();
        assert_eq!(crm.fetch_count(), 1);

        tokio::time::sleep(Duration::from_millis(250)).await;

        feed.recent_notes(7, 10).await.unwrap();
        assert_eq!(crm.fetch_count(), 2);
    }
}
