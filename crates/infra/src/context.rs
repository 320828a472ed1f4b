//! Engine context - dependency injection container
//!
//! Wires the SQLite cache store, the CRM and oracle clients, the background
//! sync scheduler and the query/forecast services into one embeddable handle.
//! Collaborator layers (REST, TUI, jobs) hold an `EngineContext` and call its
//! facade methods; they never touch the adapters directly.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dealflow_core::{
    CashflowService, CrmGateway, DealFilter, DealHealthService, DealRepository, ForecastOracle,
    NoteRepository, PipelineRepository, StageRepository, SyncStateRepository,
};
use dealflow_domain::constants::{DEFAULT_OVERDUE_MIN_DAYS, DEFAULT_STUCK_MIN_DAYS};
use dealflow_domain::{
    AssumptionReport, CashflowForecast, Config, Deal, DealPrediction, DealflowError,
    ForecastRequest, Note, Result, SyncScope, SyncWatermark,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::database::{
    DbManager, SqliteCatalogRepository, SqliteDealRepository, SqliteNoteRepository,
    SqliteSyncStateRepository,
};
use crate::http::HttpClient;
use crate::integrations::crm::{CrmClient, NoteFeed, NoteFeedConfig, SyncExecutor};
use crate::integrations::oracle::OracleClient;
use crate::scheduling::{SyncScheduler, SyncSchedulerConfig};

/// Overall health of the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub is_healthy: bool,
    /// Fraction of components reporting healthy, 0.0 to 1.0
    pub score: f64,
    pub components: Vec<ComponentHealth>,
    /// Unix timestamp when the check ran
    pub timestamp: i64,
}

impl HealthStatus {
    fn new() -> Self {
        Self {
            is_healthy: true,
            score: 1.0,
            components: Vec::new(),
            timestamp: Utc::now().timestamp(),
        }
    }

    fn add_component(mut self, component: ComponentHealth) -> Self {
        self.components.push(component);
        self
    }

    /// Score = healthy / total; the engine counts as healthy at >= 0.8
    fn calculate_score(&mut self) {
        if self.components.is_empty() {
            return;
        }
        let healthy = self.components.iter().filter(|c| c.is_healthy).count();
        self.score = healthy as f64 / self.components.len() as f64;
        self.is_healthy = self.score >= 0.8;
    }
}

/// Health of one engine component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub is_healthy: bool,
    pub message: Option<String>,
}

impl ComponentHealth {
    fn healthy(name: impl Into<String>) -> Self {
        Self { name: name.into(), is_healthy: true, message: None }
    }

    fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { name: name.into(), is_healthy: false, message: Some(message.into()) }
    }
}

/// Engine context - holds all services and dependencies
pub struct EngineContext {
    pub config: Config,
    pub db: Arc<DbManager>,
    pub sync_state: Arc<dyn SyncStateRepository>,
    pub health: Arc<DealHealthService>,
    pub cashflow: Arc<CashflowService>,
    pub note_feed: Arc<NoteFeed>,
    pub sync_scheduler: Arc<SyncScheduler>,
}

async fn create_sync_scheduler(
    executor: Arc<SyncExecutor>,
    config: &Config,
) -> Result<Arc<SyncScheduler>> {
    let mut scheduler = SyncScheduler::new(executor, SyncSchedulerConfig::from(&config.sync));

    // Start with a timeout (fail-fast initialization)
    let start_timeout = Duration::from_secs(10);
    tokio::time::timeout(start_timeout, scheduler.start())
        .await
        .map_err(|_| {
            error!(timeout_secs = 10, "sync scheduler start timed out");
            DealflowError::Internal("sync scheduler start timed out after 10s".into())
        })?
        .map_err(|err| {
            error!(error = %err, "failed to start sync scheduler");
            DealflowError::Internal(format!("failed to start sync scheduler: {err}"))
        })?;

    Ok(Arc::new(scheduler))
}

impl EngineContext {
    /// Create a context from the ambient configuration sources
    pub async fn new() -> Result<Self> {
        Self::new_with_config(crate::config::load()?).await
    }

    /// Create a context with an explicit configuration
    ///
    /// Tests use this to point the engine at a temporary database and mock
    /// servers instead of the configured endpoints.
    pub async fn new_with_config(config: Config) -> Result<Self> {
        let db = Arc::new(DbManager::new(&config.database.path, config.database.pool_size)?);
        db.run_migrations()?;

        let deals: Arc<dyn DealRepository> = Arc::new(SqliteDealRepository::new(Arc::clone(&db)));
        let notes: Arc<dyn NoteRepository> = Arc::new(SqliteNoteRepository::new(Arc::clone(&db)));
        let catalog = Arc::new(SqliteCatalogRepository::new(Arc::clone(&db)));
        let pipelines: Arc<dyn PipelineRepository> = Arc::clone(&catalog) as _;
        let stages: Arc<dyn StageRepository> = Arc::clone(&catalog) as _;
        let sync_state: Arc<dyn SyncStateRepository> =
            Arc::new(SqliteSyncStateRepository::new(Arc::clone(&db)));

        let http_client = HttpClient::new()?;
        let crm: Arc<dyn CrmGateway> = Arc::new(CrmClient::new(http_client.clone(), &config.crm));
        let oracle: Arc<dyn ForecastOracle> =
            Arc::new(OracleClient::new(&config.oracle, http_client));

        let executor = Arc::new(SyncExecutor::new(
            Arc::clone(&crm),
            Arc::clone(&pipelines),
            Arc::clone(&stages),
            Arc::clone(&deals),
            Arc::clone(&sync_state),
        ));

        // Started fail-fast so a broken runtime surfaces at construction,
        // not at the first tick
        let sync_scheduler = create_sync_scheduler(executor, &config).await?;

        let note_feed = Arc::new(NoteFeed::new(
            Arc::clone(&crm),
            Arc::clone(&notes),
            NoteFeedConfig::default(),
        ));
        let health = Arc::new(DealHealthService::new(Arc::clone(&deals), Arc::clone(&notes)));
        let cashflow = Arc::new(CashflowService::new(deals, notes, stages, oracle, &config));

        info!(db_path = %config.database.path, "engine context initialised");

        Ok(Self { config, db, sync_state, health, cashflow, note_feed, sync_scheduler })
    }

    /// Current watermark per synced entity class
    pub async fn sync_status(&self) -> Result<Vec<SyncWatermark>> {
        self.sync_state.list_watermarks().await
    }

    /// Enqueue a one-shot sync run for `scope` and return immediately
    ///
    /// The caller re-reads the cache after a short delay; completion is
    /// observable through `sync_status`.
    pub async fn trigger_sync(&self, scope: SyncScope) -> Result<()> {
        Ok(self.sync_scheduler.trigger_now(scope).await?)
    }

    /// Open deals of `pipeline_id` with no CRM update for at least
    /// `min_days` (default 14)
    pub async fn overdue_deals(
        &self,
        pipeline_id: i64,
        min_days: Option<i64>,
    ) -> Result<Vec<Deal>> {
        self.health.overdue_deals(pipeline_id, min_days.unwrap_or(DEFAULT_OVERDUE_MIN_DAYS)).await
    }

    /// Open deals of `pipeline_id` parked in their current stage for at
    /// least `min_days` (default 30)
    pub async fn stuck_deals(&self, pipeline_id: i64, min_days: Option<i64>) -> Result<Vec<Deal>> {
        self.health.stuck_deals(pipeline_id, min_days.unwrap_or(DEFAULT_STUCK_MIN_DAYS)).await
    }

    /// Open deals owned by `owner`, optionally scoped to pipelines
    pub async fn deals_by_owner(&self, owner: &str, pipeline_ids: &[i64]) -> Result<Vec<Deal>> {
        self.health.deals_by_owner(owner, pipeline_ids).await
    }

    /// Case-insensitive title/organization search over cached deals
    pub async fn search_deals(&self, query: &str, filter: DealFilter) -> Result<Vec<Deal>> {
        self.health.search_deals(query, filter).await
    }

    /// Deal detail view: the cached deal plus its most recent notes
    ///
    /// The note feed refreshes the cached notes from the CRM first, bounded
    /// by its TTL, so repeated views stay cheap while still surfacing recent
    /// activity.
    pub async fn deal_detail(
        &self,
        deal_id: i64,
        note_limit: usize,
    ) -> Result<Option<(Deal, Vec<Note>)>> {
        self.note_feed.recent_notes(deal_id, note_limit).await?;
        self.health.deal_with_notes(deal_id, note_limit).await
    }

    /// Run the cashflow prediction pipeline for `request`
    pub async fn predict_cashflow(&self, request: &ForecastRequest) -> Result<CashflowForecast> {
        self.cashflow.predict_cashflow(request).await
    }

    /// Explainability report over a set of predictions
    pub fn explain_assumptions(&self, predictions: &[DealPrediction]) -> AssumptionReport {
        self.cashflow.explain_assumptions(predictions)
    }

    /// Check health of the engine's components
    pub async fn health_check(&self) -> HealthStatus {
        let mut status = HealthStatus::new();

        status = status.add_component(self.check_database_health().await);

        let scheduler = if self.sync_scheduler.is_running() {
            ComponentHealth::healthy("sync_scheduler")
        } else {
            ComponentHealth::unhealthy("sync_scheduler", "background task not running")
        };
        status = status.add_component(scheduler);

        // The query and forecast services are stateless reads over the pool,
        // healthy whenever the database is
        status = status.add_component(ComponentHealth::healthy("query_service"));
        status = status.add_component(ComponentHealth::healthy("forecast_service"));

        status.calculate_score();
        status
    }

    /// Database liveness probe, run off the async runtime
    async fn check_database_health(&self) -> ComponentHealth {
        let db = Arc::clone(&self.db);
        match tokio::task::spawn_blocking(move || db.health_check()).await {
            Ok(Ok(())) => ComponentHealth::healthy("database"),
            Ok(Err(e)) => {
                warn!(error = %e, "database health check failed");
                ComponentHealth::unhealthy("database", format!("query failed: {e}"))
            }
            Err(e) => {
                error!(error = %e, "database health check task panicked");
                ComponentHealth::unhealthy("database", format!("task panic: {e}"))
            }
        }
    }

    /// Shut down the engine
    ///
    /// Intentionally a no-op beyond logging: the scheduler cancels its
    /// background task in `Drop` and the pool closes when the last handle
    /// drops, so dropping the context is a complete shutdown.
    pub async fn shutdown(&self) -> Result<()> {
        info!("engine context shutdown requested");
        Ok(())
    }
}
