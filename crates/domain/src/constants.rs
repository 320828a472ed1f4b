//! Engine-level constants
//!
//! Centralized location for the default thresholds and limits used across
//! sync and forecasting. Most of these are overridable through [`crate::Config`];
//! the constants are the single source for the defaults.

// Sync defaults
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 1800; // 30 minutes
pub const DEFAULT_CRM_PAGE_SIZE: u32 = 100;
pub const DEFAULT_DB_POOL_SIZE: u32 = 4;

// Forecast rule thresholds
pub const DEFAULT_OVERRIDE_CONFIDENCE_THRESHOLD: f32 = 0.4;
pub const RULE_CONFIDENCE: f32 = 0.5;
pub const DEFAULT_STUCK_STAGE_DAYS: i64 = 60;
pub const STUCK_DELAY_PENALTY_DAYS: i64 = 14;
pub const DEFAULT_MAX_INVOICE_HORIZON_DAYS: i64 = 365;
pub const DEFAULT_PAYMENT_TERMS_DAYS: i64 = 30;
pub const FALLBACK_STAGE_DAYS: i64 = 30; // stage name absent from the duration table

// Forecast orchestration
pub const DEFAULT_ORACLE_BATCH_SIZE: usize = 10;
pub const DEFAULT_ORACLE_CONCURRENCY: usize = 5;
pub const DEFAULT_NOTE_CONTEXT_LIMIT: usize = 5;
pub const DEFAULT_MIN_BUCKET_CONFIDENCE: f32 = 0.2;

// Confidence histogram bands
pub const CONFIDENCE_HIGH_BAND: f32 = 0.7;
pub const CONFIDENCE_MEDIUM_BAND: f32 = 0.4;

// Health query defaults
pub const DEFAULT_OVERDUE_MIN_DAYS: i64 = 14;
pub const DEFAULT_STUCK_MIN_DAYS: i64 = 30;
