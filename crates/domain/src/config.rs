//! Engine configuration
//!
//! One immutable [`Config`] value is assembled at startup (see the infra
//! config loader) and handed to each component's constructor. Nothing reads
//! configuration ambiently after that point.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_CRM_PAGE_SIZE, DEFAULT_DB_POOL_SIZE, DEFAULT_MAX_INVOICE_HORIZON_DAYS,
    DEFAULT_MIN_BUCKET_CONFIDENCE, DEFAULT_NOTE_CONTEXT_LIMIT, DEFAULT_ORACLE_BATCH_SIZE,
    DEFAULT_ORACLE_CONCURRENCY, DEFAULT_OVERRIDE_CONFIDENCE_THRESHOLD, DEFAULT_PAYMENT_TERMS_DAYS,
    DEFAULT_STUCK_STAGE_DAYS, DEFAULT_SYNC_INTERVAL_SECS, STUCK_DELAY_PENALTY_DAYS,
};

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Local cache database settings
    pub database: DatabaseConfig,
    /// Remote CRM connection settings
    pub crm: CrmConfig,
    /// Prediction oracle settings
    #[serde(default)]
    pub oracle: OracleConfig,
    /// Background sync settings
    #[serde(default)]
    pub sync: SyncConfig,
    /// Forecast rule thresholds
    #[serde(default)]
    pub forecast: ForecastConfig,
}

/// SQLite cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    pub path: String,
    /// Connection pool size
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

/// Remote CRM API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmConfig {
    /// Base URL of the CRM API, e.g. `https://api.example.com/v1`
    pub base_url: String,
    /// API token passed with every request
    pub api_token: String,
    /// Page size for paginated collection endpoints
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

/// Prediction oracle (LLM completion) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// API key for the completion endpoint
    #[serde(default)]
    pub api_key: String,
    /// Model identifier sent with each request
    #[serde(default = "default_oracle_model")]
    pub model: String,
    /// Deals per oracle request
    #[serde(default = "default_oracle_batch_size")]
    pub batch_size: usize,
    /// Maximum simultaneous oracle requests
    #[serde(default = "default_oracle_concurrency")]
    pub max_concurrency: usize,
    /// Bounded attempts per request, shared by transient and rate-limit retries
    #[serde(default = "default_oracle_attempts")]
    pub max_attempts: u32,
}

/// Background sync settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Seconds between periodic full-collection syncs
    #[serde(default = "default_sync_interval")]
    pub interval_seconds: u64,
    /// Whether the periodic scheduler runs at all
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Forecast rule thresholds
///
/// The defaults encode the rule engine described in the forecast module;
/// deployments tune them per sales process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastConfig {
    /// Run the deterministic precheck before calling the oracle
    #[serde(default = "default_true")]
    pub precheck_enabled: bool,
    /// Oracle confidence below this is replaced by the rule estimate
    #[serde(default = "default_override_threshold")]
    pub override_confidence_threshold: f32,
    /// Days in one stage after which a deal counts as stuck
    #[serde(default = "default_stuck_stage_days")]
    pub stuck_stage_days: i64,
    /// Delay penalty added to rule estimates for stuck deals
    #[serde(default = "default_stuck_penalty_days")]
    pub stuck_delay_penalty_days: i64,
    /// Sanity bound: invoice dates further out than this draw a warning
    #[serde(default = "default_invoice_horizon")]
    pub max_invoice_horizon_days: i64,
    /// Payment terms applied when a rule derives the payment date
    #[serde(default = "default_payment_terms")]
    pub payment_terms_days: i64,
    /// Recent notes attached per deal as oracle context
    #[serde(default = "default_note_limit")]
    pub note_context_limit: usize,
    /// Predictions below this confidence are left out of the buckets
    #[serde(default = "default_min_bucket_confidence")]
    pub min_bucket_confidence: f32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_oracle_model(),
            batch_size: DEFAULT_ORACLE_BATCH_SIZE,
            max_concurrency: DEFAULT_ORACLE_CONCURRENCY,
            max_attempts: default_oracle_attempts(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { interval_seconds: DEFAULT_SYNC_INTERVAL_SECS, enabled: true }
    }
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            precheck_enabled: true,
            override_confidence_threshold: DEFAULT_OVERRIDE_CONFIDENCE_THRESHOLD,
            stuck_stage_days: DEFAULT_STUCK_STAGE_DAYS,
            stuck_delay_penalty_days: STUCK_DELAY_PENALTY_DAYS,
            max_invoice_horizon_days: DEFAULT_MAX_INVOICE_HORIZON_DAYS,
            payment_terms_days: DEFAULT_PAYMENT_TERMS_DAYS,
            note_context_limit: DEFAULT_NOTE_CONTEXT_LIMIT,
            min_bucket_confidence: DEFAULT_MIN_BUCKET_CONFIDENCE,
        }
    }
}

fn default_pool_size() -> u32 {
    DEFAULT_DB_POOL_SIZE
}

fn default_page_size() -> u32 {
    DEFAULT_CRM_PAGE_SIZE
}

fn default_oracle_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_oracle_batch_size() -> usize {
    DEFAULT_ORACLE_BATCH_SIZE
}

fn default_oracle_concurrency() -> usize {
    DEFAULT_ORACLE_CONCURRENCY
}

fn default_oracle_attempts() -> u32 {
    3
}

fn default_sync_interval() -> u64 {
    DEFAULT_SYNC_INTERVAL_SECS
}

fn default_true() -> bool {
    true
}

fn default_override_threshold() -> f32 {
    DEFAULT_OVERRIDE_CONFIDENCE_THRESHOLD
}

fn default_stuck_stage_days() -> i64 {
    DEFAULT_STUCK_STAGE_DAYS
}

fn default_stuck_penalty_days() -> i64 {
    STUCK_DELAY_PENALTY_DAYS
}

fn default_invoice_horizon() -> i64 {
    DEFAULT_MAX_INVOICE_HORIZON_DAYS
}

fn default_payment_terms() -> i64 {
    DEFAULT_PAYMENT_TERMS_DAYS
}

fn default_note_limit() -> usize {
    DEFAULT_NOTE_CONTEXT_LIMIT
}

fn default_min_bucket_confidence() -> f32 {
    DEFAULT_MIN_BUCKET_CONFIDENCE
}
