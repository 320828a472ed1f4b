//! Sync executor
//!
//! Pulls CRM entities and reconciles them into the cache. Each entity class
//! (the pipeline catalog, the stage catalog, one pipeline's deals) is an
//! independent unit of work with its own watermark: a failure is recorded on
//! that watermark and never aborts the remaining classes.
//!
//! The CRM cannot filter deals server-side by modification time, so a deal
//! run always fetches the complete open collection and filters client-side
//! against the watermark before upserting.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dealflow_core::{
    CrmGateway, DealRepository, PipelineRepository, StageRepository, SyncStateRepository,
};
use dealflow_domain::{Result, SyncReport, SyncScope, SyncWatermark};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Reconciles CRM state into the cache store
pub struct SyncExecutor {
    crm: Arc<dyn CrmGateway>,
    pipelines: Arc<dyn PipelineRepository>,
    stages: Arc<dyn StageRepository>,
    deals: Arc<dyn DealRepository>,
    sync_state: Arc<dyn SyncStateRepository>,
}

impl SyncExecutor {
    pub fn new(
        crm: Arc<dyn CrmGateway>,
        pipelines: Arc<dyn PipelineRepository>,
        stages: Arc<dyn StageRepository>,
        deals: Arc<dyn DealRepository>,
        sync_state: Arc<dyn SyncStateRepository>,
    ) -> Self {
        Self { crm, pipelines, stages, deals, sync_state }
    }

    /// Run one sync pass covering `scope`
    ///
    /// Returns a report per entity class that completed. Failed classes are
    /// logged and recorded on their watermark instead of being returned.
    #[instrument(skip(self, scope), fields(run_id = %Uuid::now_v7(), scope = %scope))]
    pub async fn run(&self, scope: SyncScope) -> Vec<SyncReport> {
        let mut reports = Vec::new();

        match scope {
            SyncScope::All => {
                self.run_catalog(&mut reports).await;
                // Deal runs cover whatever catalog the cache now holds, so a
                // failed catalog refresh degrades to the previous catalog
                match self.pipelines.list_pipelines().await {
                    Ok(pipelines) => {
                        for pipeline in pipelines {
                            self.run_pipeline_deals(pipeline.id, &mut reports).await;
                        }
                    }
                    Err(e) => error!(error = %e, "cannot list pipelines for deal sync"),
                }
            }
            SyncScope::Catalog => self.run_catalog(&mut reports).await,
            SyncScope::Deals { pipeline_id } => {
                self.run_pipeline_deals(pipeline_id, &mut reports).await;
            }
        }

        info!(completed = reports.len(), "sync pass finished");
        reports
    }

    async fn run_catalog(&self, reports: &mut Vec<SyncReport>) {
        match self.sync_pipelines().await {
            Ok(report) => reports.push(report),
            Err(e) => warn!(error = %e, "pipeline catalog sync failed"),
        }
        match self.sync_stages().await {
            Ok(report) => reports.push(report),
            Err(e) => warn!(error = %e, "stage catalog sync failed"),
        }
    }

    async fn run_pipeline_deals(&self, pipeline_id: i64, reports: &mut Vec<SyncReport>) {
        match self.sync_deals(pipeline_id).await {
            Ok(report) => reports.push(report),
            Err(e) => warn!(pipeline_id, error = %e, "deal sync failed"),
        }
    }

    /// Full replace of the pipeline catalog
    async fn sync_pipelines(&self) -> Result<SyncReport> {
        let entity = SyncWatermark::PIPELINES;
        let started_at = Utc::now();
        self.sync_state.mark_in_progress(entity).await?;

        let outcome = async {
            let fetched = self.crm.fetch_pipelines().await?;
            self.pipelines.replace_pipelines(&fetched).await?;
            Ok(fetched.len())
        }
        .await;

        match outcome {
            Ok(seen) => {
                let duration_ms = elapsed_ms(started_at);
                self.sync_state.mark_success(entity, started_at, seen as i64, duration_ms).await?;
                info!(records = seen, duration_ms, "pipeline catalog replaced");
                Ok(SyncReport {
                    entity: entity.to_string(),
                    records_seen: seen,
                    records_upserted: seen,
                    records_skipped: 0,
                    duration_ms,
                })
            }
            Err(e) => self.record_failure(entity, started_at, e).await,
        }
    }

    /// Full replace of the stage catalog, dropping stages whose pipeline the
    /// cache does not know
    async fn sync_stages(&self) -> Result<SyncReport> {
        let entity = SyncWatermark::STAGES;
        let started_at = Utc::now();
        self.sync_state.mark_in_progress(entity).await?;

        let outcome = async {
            let fetched = self.crm.fetch_stages().await?;
            let known: HashSet<i64> =
                self.pipelines.list_pipelines().await?.iter().map(|p| p.id).collect();

            let mut valid = Vec::with_capacity(fetched.len());
            let mut skipped = 0usize;
            for stage in fetched {
                if known.contains(&stage.pipeline_id) {
                    valid.push(stage);
                } else {
                    warn!(
                        stage_id = stage.id,
                        pipeline_id = stage.pipeline_id,
                        "stage references unknown pipeline; skipping"
                    );
                    skipped += 1;
                }
            }

            self.stages.replace_stages(&valid).await?;
            Ok((valid.len() + skipped, valid.len(), skipped))
        }
        .await;

        match outcome {
            Ok((seen, upserted, skipped)) => {
                let duration_ms = elapsed_ms(started_at);
                self.sync_state.mark_success(entity, started_at, seen as i64, duration_ms).await?;
                info!(records = seen, skipped, duration_ms, "stage catalog replaced");
                Ok(SyncReport {
                    entity: entity.to_string(),
                    records_seen: seen,
                    records_upserted: upserted,
                    records_skipped: skipped,
                    duration_ms,
                })
            }
            Err(e) => self.record_failure(entity, started_at, e).await,
        }
    }

    /// Incremental sync of one pipeline's open deals
    async fn sync_deals(&self, pipeline_id: i64) -> Result<SyncReport> {
        let entity = SyncWatermark::deals_key(pipeline_id);
        let started_at = Utc::now();
        self.sync_state.mark_in_progress(&entity).await?;

        let watermark = match self.sync_state.get_watermark(&entity).await {
            Ok(wm) => wm.and_then(|w| w.last_synced_at),
            Err(e) => return self.record_failure(&entity, started_at, e).await,
        };

        let outcome = async {
            let fetched = self.crm.fetch_open_deals(pipeline_id).await?;
            let seen = fetched.len();

            let mut upserted = 0usize;
            let mut skipped = 0usize;
            for deal in &fetched {
                // Integrity: the stage-entry clock can never run ahead of the
                // CRM's own update clock
                if let Some(stage_change) = deal.stage_change_time {
                    if stage_change > deal.update_time {
                        warn!(
                            deal_id = deal.id,
                            "stage_change_time after update_time; skipping record"
                        );
                        skipped += 1;
                        continue;
                    }
                }

                // Incremental filter: only records strictly newer than the
                // cursor need a write; everything else is already current
                if let Some(cursor) = watermark {
                    if deal.update_time <= cursor {
                        continue;
                    }
                }

                self.deals.upsert_deal(deal).await?;
                upserted += 1;
            }

            Ok((seen, upserted, skipped))
        }
        .await;

        match outcome {
            Ok((seen, upserted, skipped)) => {
                let duration_ms = elapsed_ms(started_at);
                self.sync_state
                    .mark_success(&entity, started_at, seen as i64, duration_ms)
                    .await?;
                info!(pipeline_id, records = seen, upserted, skipped, duration_ms, "deals synced");
                Ok(SyncReport {
                    entity,
                    records_seen: seen,
                    records_upserted: upserted,
                    records_skipped: skipped,
                    duration_ms,
                })
            }
            Err(e) => self.record_failure(&entity, started_at, e).await,
        }
    }

    /// Record a failed run on the entity's watermark and hand the error back
    ///
    /// The watermark timestamp itself stays untouched so the next run
    /// re-examines the same window.
    async fn record_failure(
        &self,
        entity: &str,
        started_at: DateTime<Utc>,
        error: dealflow_domain::DealflowError,
    ) -> Result<SyncReport> {
        let duration_ms = elapsed_ms(started_at);
        if let Err(mark_err) =
            self.sync_state.mark_failed(entity, &error.to_string(), duration_ms).await
        {
            error!(entity, error = %mark_err, "failed to record sync failure");
        }
        Err(error)
    }
}

fn elapsed_ms(started_at: DateTime<Utc>) -> i64 {
    (Utc::now() - started_at).num_milliseconds()
}
