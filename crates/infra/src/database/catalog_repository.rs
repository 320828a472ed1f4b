//! Catalog repository: pipelines and stages
//!
//! Both catalogs are small and change rarely, so every sync replaces the
//! whole table inside one transaction instead of diffing rows. Readers in
//! other pool connections keep seeing the previous catalog until the commit.

use std::sync::Arc;

use async_trait::async_trait;
use dealflow_core::{PipelineRepository, StageRepository};
use dealflow_domain::{Pipeline, Result as DomainResult, Stage};
use rusqlite::{params, OptionalExtension, Row};
use tokio::task;

use super::manager::DbManager;
use super::{map_join_error, map_sql_error};

/// SQLite implementation of [`PipelineRepository`] and [`StageRepository`]
pub struct SqliteCatalogRepository {
    db: Arc<DbManager>,
}

impl SqliteCatalogRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PipelineRepository for SqliteCatalogRepository {
    async fn replace_pipelines(&self, pipelines: &[Pipeline]) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let pipelines = pipelines.to_vec();

        task::spawn_blocking(move || -> DomainResult<()> {
            let mut conn = db.get_connection()?;
            let tx = conn.transaction().map_err(map_sql_error)?;
            tx.execute("DELETE FROM pipelines", []).map_err(map_sql_error)?;
            for pipeline in &pipelines {
                tx.execute(
                    "INSERT INTO pipelines (id, name, order_nr) VALUES (?1, ?2, ?3)",
                    params![pipeline.id, pipeline.name, pipeline.order_nr],
                )
                .map_err(map_sql_error)?;
            }
            tx.commit().map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn list_pipelines(&self) -> DomainResult<Vec<Pipeline>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<Vec<Pipeline>> {
            let conn = db.get_connection()?;
            let mut stmt = conn
                .prepare("SELECT id, name, order_nr FROM pipelines ORDER BY order_nr, id")
                .map_err(map_sql_error)?;

            let pipelines = stmt
                .query_map([], map_pipeline_row)
                .map_err(map_sql_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sql_error)?;

            Ok(pipelines)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn get_pipeline(&self, id: i64) -> DomainResult<Option<Pipeline>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<Option<Pipeline>> {
            let conn = db.get_connection()?;
            conn.query_row(
                "SELECT id, name, order_nr FROM pipelines WHERE id = ?1",
                params![id],
                map_pipeline_row,
            )
            .optional()
            .map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }
}

#[async_trait]
impl StageRepository for SqliteCatalogRepository {
    async fn replace_stages(&self, stages: &[Stage]) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let stages = stages.to_vec();

        task::spawn_blocking(move || -> DomainResult<()> {
            let mut conn = db.get_connection()?;
            let tx = conn.transaction().map_err(map_sql_error)?;
            tx.execute("DELETE FROM stages", []).map_err(map_sql_error)?;
            for stage in &stages {
                tx.execute(
                    "INSERT INTO stages (id, name, pipeline_id, order_nr, rot_days)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        stage.id,
                        stage.name,
                        stage.pipeline_id,
                        stage.order_nr,
                        stage.rot_days
                    ],
                )
                .map_err(map_sql_error)?;
            }
            tx.commit().map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn list_stages(&self, pipeline_id: Option<i64>) -> DomainResult<Vec<Stage>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<Vec<Stage>> {
            let conn = db.get_connection()?;

            let (sql, params_vec): (&str, Vec<i64>) = match pipeline_id {
                Some(id) => (
                    "SELECT id, name, pipeline_id, order_nr, rot_days FROM stages
                     WHERE pipeline_id = ?1 ORDER BY order_nr, id",
                    vec![id],
                ),
                None => (
                    "SELECT id, name, pipeline_id, order_nr, rot_days FROM stages
                     ORDER BY pipeline_id, order_nr, id",
                    Vec::new(),
                ),
            };

            let mut stmt = conn.prepare(sql).map_err(map_sql_error)?;
            let stages = stmt
                .query_map(rusqlite::params_from_iter(params_vec), map_stage_row)
                .map_err(map_sql_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sql_error)?;

            Ok(stages)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn get_stage(&self, id: i64) -> DomainResult<Option<Stage>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<Option<Stage>> {
            let conn = db.get_connection()?;
            conn.query_row(
                "SELECT id, name, pipeline_id, order_nr, rot_days FROM stages WHERE id = ?1",
                params![id],
                map_stage_row,
            )
            .optional()
            .map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }
}

fn map_pipeline_row(row: &Row<'_>) -> rusqlite::Result<Pipeline> {
    Ok(Pipeline { id: row.get(0)?, name: row.get(1)?, order_nr: row.get(2)? })
}

fn map_stage_row(row: &Row<'_>) -> rusqlite::Result<Stage> {
    Ok(Stage {
        id: row.get(0)?,
        name: row.get(1)?,
        pipeline_id: row.get(2)?,
        order_nr: row.get(3)?,
        rot_days: row.get(4)?,
    })
}
