//! Deal repository
//!
//! Deals land here through the sync executor's upsert and are read by every
//! derivation. The upsert is guarded by `update_time` so a replayed page from
//! an earlier sync window can never clobber a fresher row.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealflow_core::{DealFilter, DealRepository};
use dealflow_domain::{Deal, DealStatus, Result as DomainResult};
use rusqlite::{params, OptionalExtension, Row, ToSql};
use tokio::task;

use super::manager::DbManager;
use super::{map_join_error, map_sql_error};

const DEAL_COLUMNS: &str = "id, title, pipeline_id, stage_id, owner_name, org_name, value,
                            currency, status, add_time, update_time, stage_change_time,
                            last_activity_time, raw_payload";

const UPSERT_DEAL_SQL: &str = "INSERT INTO deals (id, title, pipeline_id, stage_id, owner_name,
                                                  org_name, value, currency, status, add_time,
                                                  update_time, stage_change_time,
                                                  last_activity_time, raw_payload)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
     ON CONFLICT(id) DO UPDATE SET
         title = excluded.title,
         pipeline_id = excluded.pipeline_id,
         stage_id = excluded.stage_id,
         owner_name = excluded.owner_name,
         org_name = excluded.org_name,
         value = excluded.value,
         currency = excluded.currency,
         status = excluded.status,
         add_time = excluded.add_time,
         update_time = excluded.update_time,
         stage_change_time = excluded.stage_change_time,
         last_activity_time = excluded.last_activity_time,
         raw_payload = excluded.raw_payload
     WHERE excluded.update_time >= deals.update_time";

/// SQLite implementation of [`DealRepository`]
pub struct SqliteDealRepository {
    db: Arc<DbManager>,
}

impl SqliteDealRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DealRepository for SqliteDealRepository {
    async fn upsert_deal(&self, deal: &Deal) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let deal = deal.clone();

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            conn.execute(
                UPSERT_DEAL_SQL,
                params![
                    deal.id,
                    deal.title,
                    deal.pipeline_id,
                    deal.stage_id,
                    deal.owner_name,
                    deal.org_name,
                    deal.value,
                    deal.currency,
                    deal.status.to_string(),
                    deal.add_time.timestamp(),
                    deal.update_time.timestamp(),
                    deal.stage_change_time.map(|t| t.timestamp()),
                    deal.last_activity_time.map(|t| t.timestamp()),
                    deal.raw_payload,
                ],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn get_deal(&self, id: i64) -> DomainResult<Option<Deal>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<Option<Deal>> {
            let conn = db.get_connection()?;
            let sql = format!("SELECT {DEAL_COLUMNS} FROM deals WHERE id = ?1");
            conn.query_row(&sql, params![id], map_deal_row).optional().map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn open_deals(&self, pipeline_ids: &[i64]) -> DomainResult<Vec<Deal>> {
        let db = Arc::clone(&self.db);
        let pipeline_ids = pipeline_ids.to_vec();

        task::spawn_blocking(move || -> DomainResult<Vec<Deal>> {
            let conn = db.get_connection()?;

            let sql = if pipeline_ids.is_empty() {
                format!("SELECT {DEAL_COLUMNS} FROM deals WHERE status = 'open' ORDER BY id")
            } else {
                let placeholders = vec!["?"; pipeline_ids.len()].join(",");
                format!(
                    "SELECT {DEAL_COLUMNS} FROM deals
                     WHERE status = 'open' AND pipeline_id IN ({placeholders})
                     ORDER BY id"
                )
            };

            let mut stmt = conn.prepare(&sql).map_err(map_sql_error)?;
            let deals = stmt
                .query_map(rusqlite::params_from_iter(pipeline_ids), map_deal_row)
                .map_err(map_sql_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sql_error)?;

            Ok(deals)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn overdue_deals(
        &self,
        pipeline_id: i64,
        cutoff: DateTime<Utc>,
    ) -> DomainResult<Vec<Deal>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<Vec<Deal>> {
            let conn = db.get_connection()?;
            let sql = format!(
                "SELECT {DEAL_COLUMNS} FROM deals
                 WHERE status = 'open' AND pipeline_id = ?1 AND update_time <= ?2
                 ORDER BY update_time ASC"
            );

            let mut stmt = conn.prepare(&sql).map_err(map_sql_error)?;
            let deals = stmt
                .query_map(params![pipeline_id, cutoff.timestamp()], map_deal_row)
                .map_err(map_sql_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sql_error)?;

            Ok(deals)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn stuck_deals(
        &self,
        pipeline_id: i64,
        cutoff: DateTime<Utc>,
    ) -> DomainResult<Vec<Deal>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<Vec<Deal>> {
            let conn = db.get_connection()?;
            // Stage entry falls back to update_time for deals created directly
            // into their current stage, mirroring Deal::stage_entered_at
            let sql = format!(
                "SELECT {DEAL_COLUMNS} FROM deals
                 WHERE status = 'open' AND pipeline_id = ?1
                   AND COALESCE(stage_change_time, update_time) <= ?2
                 ORDER BY COALESCE(stage_change_time, update_time) ASC"
            );

            let mut stmt = conn.prepare(&sql).map_err(map_sql_error)?;
            let deals = stmt
                .query_map(params![pipeline_id, cutoff.timestamp()], map_deal_row)
                .map_err(map_sql_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sql_error)?;

            Ok(deals)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn deals_by_owner(&self, owner: &str, pipeline_ids: &[i64]) -> DomainResult<Vec<Deal>> {
        let db = Arc::clone(&self.db);
        let owner = owner.to_string();
        let pipeline_ids = pipeline_ids.to_vec();

        task::spawn_blocking(move || -> DomainResult<Vec<Deal>> {
            let conn = db.get_connection()?;

            let mut sql = format!(
                "SELECT {DEAL_COLUMNS} FROM deals WHERE status = 'open' AND owner_name = ?1"
            );
            let mut bind: Vec<Box<dyn ToSql>> = vec![Box::new(owner)];
            if !pipeline_ids.is_empty() {
                let placeholders = vec!["?"; pipeline_ids.len()].join(",");
                sql.push_str(&format!(" AND pipeline_id IN ({placeholders})"));
                bind.extend(pipeline_ids.into_iter().map(|id| Box::new(id) as Box<dyn ToSql>));
            }
            sql.push_str(" ORDER BY update_time DESC");

            let mut stmt = conn.prepare(&sql).map_err(map_sql_error)?;
            let deals = stmt
                .query_map(rusqlite::params_from_iter(bind), map_deal_row)
                .map_err(map_sql_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sql_error)?;

            Ok(deals)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn search_deals(&self, query: &str, filter: DealFilter) -> DomainResult<Vec<Deal>> {
        let db = Arc::clone(&self.db);
        let pattern = format!("%{}%", query.to_lowercase());

        task::spawn_blocking(move || -> DomainResult<Vec<Deal>> {
            let conn = db.get_connection()?;

            let mut sql = format!(
                "SELECT {DEAL_COLUMNS} FROM deals
                 WHERE (LOWER(title) LIKE ?1 OR LOWER(COALESCE(org_name, '')) LIKE ?1)"
            );
            let mut bind: Vec<Box<dyn ToSql>> = vec![Box::new(pattern)];

            match filter.status {
                Some(status) => {
                    sql.push_str(" AND status = ?");
                    bind.push(Box::new(status.to_string()));
                }
                None => sql.push_str(" AND status = 'open'"),
            }
            if let Some(pipeline_id) = filter.pipeline_id {
                sql.push_str(" AND pipeline_id = ?");
                bind.push(Box::new(pipeline_id));
            }
            sql.push_str(" ORDER BY update_time DESC");

            let mut stmt = conn.prepare(&sql).map_err(map_sql_error)?;
            let deals = stmt
                .query_map(rusqlite::params_from_iter(bind), map_deal_row)
                .map_err(map_sql_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sql_error)?;

            Ok(deals)
        })
        .await
        .map_err(map_join_error)?
    }
}

fn map_deal_row(row: &Row<'_>) -> rusqlite::Result<Deal> {
    let status_str: String = row.get(8)?;
    let status = DealStatus::from_str(&status_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            8,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })?;

    Ok(Deal {
        id: row.get(0)?,
        title: row.get(1)?,
        pipeline_id: row.get(2)?,
        stage_id: row.get(3)?,
        owner_name: row.get(4)?,
        org_name: row.get(5)?,
        value: row.get(6)?,
        currency: row.get(7)?,
        status,
        add_time: datetime_from_secs(9, row.get(9)?)?,
        update_time: datetime_from_secs(10, row.get(10)?)?,
        stage_change_time: row
            .get::<_, Option<i64>>(11)?
            .map(|s| datetime_from_secs(11, s))
            .transpose()?,
        last_activity_time: row
            .get::<_, Option<i64>>(12)?
            .map(|s| datetime_from_secs(12, s))
            .transpose()?,
        raw_payload: row.get(13)?,
    })
}

fn datetime_from_secs(idx: usize, secs: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Integer,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("timestamp out of range: {secs}"),
            )),
        )
    })
}
