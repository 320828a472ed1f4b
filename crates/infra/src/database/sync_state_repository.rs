//! Sync watermark repository
//!
//! One row per entity class. The `last_synced_at` column is the incremental
//! cursor and only ever moves forward, enforced here with a MAX guard so a
//! late-finishing run can never rewind a newer run's watermark.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealflow_core::SyncStateRepository;
use dealflow_domain::{Result as DomainResult, SyncRunStatus, SyncWatermark};
use rusqlite::{params, OptionalExtension, Row};
use tokio::task;

use super::manager::DbManager;
use super::{map_join_error, map_sql_error};

const WATERMARK_COLUMNS: &str =
    "entity, last_synced_at, records_seen, duration_ms, status, last_error, updated_at";

/// SQLite implementation of [`SyncStateRepository`]
pub struct SqliteSyncStateRepository {
    db: Arc<DbManager>,
}

impl SqliteSyncStateRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SyncStateRepository for SqliteSyncStateRepository {
    async fn get_watermark(&self, entity: &str) -> DomainResult<Option<SyncWatermark>> {
        let db = Arc::clone(&self.db);
        let entity = entity.to_string();

        task::spawn_blocking(move || -> DomainResult<Option<SyncWatermark>> {
            let conn = db.get_connection()?;
            let sql = format!("SELECT {WATERMARK_COLUMNS} FROM sync_watermarks WHERE entity = ?1");
            conn.query_row(&sql, params![entity], map_watermark_row)
                .optional()
                .map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn list_watermarks(&self) -> DomainResult<Vec<SyncWatermark>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<Vec<SyncWatermark>> {
            let conn = db.get_connection()?;
            let sql = format!("SELECT {WATERMARK_COLUMNS} FROM sync_watermarks ORDER BY entity");
            let mut stmt = conn.prepare(&sql).map_err(map_sql_error)?;

            let watermarks = stmt
                .query_map([], map_watermark_row)
                .map_err(map_sql_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sql_error)?;

            Ok(watermarks)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn mark_in_progress(&self, entity: &str) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let entity = entity.to_string();

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            conn.execute(
                "INSERT INTO sync_watermarks (entity, status, updated_at)
                 VALUES (?1, 'in_progress', ?2)
                 ON CONFLICT(entity) DO UPDATE SET
                     status = 'in_progress',
                     updated_at = excluded.updated_at",
                params![entity, Utc::now().timestamp()],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn mark_success(
        &self,
        entity: &str,
        started_at: DateTime<Utc>,
        records_seen: i64,
        duration_ms: i64,
    ) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let entity = entity.to_string();

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            conn.execute(
                "INSERT INTO sync_watermarks
                     (entity, last_synced_at, records_seen, duration_ms, status, last_error, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'success', NULL, ?5)
                 ON CONFLICT(entity) DO UPDATE SET
                     last_synced_at = MAX(COALESCE(sync_watermarks.last_synced_at, 0),
                                          excluded.last_synced_at),
                     records_seen = excluded.records_seen,
                     duration_ms = excluded.duration_ms,
                     status = 'success',
                     last_error = NULL,
                     updated_at = excluded.updated_at",
                params![
                    entity,
                    started_at.timestamp(),
                    records_seen,
                    duration_ms,
                    Utc::now().timestamp()
                ],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn mark_failed(&self, entity: &str, error: &str, duration_ms: i64) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let entity = entity.to_string();
        let error = error.to_string();

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            conn.execute(
                "INSERT INTO sync_watermarks (entity, duration_ms, status, last_error, updated_at)
                 VALUES (?1, ?2, 'failed', ?3, ?4)
                 ON CONFLICT(entity) DO UPDATE SET
                     duration_ms = excluded.duration_ms,
                     status = 'failed',
                     last_error = excluded.last_error,
                     updated_at = excluded.updated_at",
                params![entity, duration_ms, error, Utc::now().timestamp()],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }
}

fn map_watermark_row(row: &Row<'_>) -> rusqlite::Result<SyncWatermark> {
    let status_str: String = row.get(4)?;
    let status = SyncRunStatus::from_str(&status_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })?;

    let last_synced_at = row
        .get::<_, Option<i64>>(1)?
        .and_then(|secs| DateTime::from_timestamp(secs, 0));
    let updated_at_secs: i64 = row.get(6)?;
    let updated_at = DateTime::from_timestamp(updated_at_secs, 0).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            rusqlite::types::Type::Integer,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("timestamp out of range: {updated_at_secs}"),
            )),
        )
    })?;

    Ok(SyncWatermark {
        entity: row.get(0)?,
        last_synced_at,
        records_seen: row.get(2)?,
        duration_ms: row.get(3)?,
        status,
        last_error: row.get(5)?,
        updated_at,
    })
}
