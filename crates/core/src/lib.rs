//! # Dealflow Core
//!
//! Pure business logic layer - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port/adapter interfaces (traits) for the cache store, the CRM gateway
//!   and the forecast oracle
//! - The deal-health query service (overdue, stuck, owner and search views)
//! - The deterministic rule engine and the cashflow prediction orchestrator
//!
//! ## Architecture Principles
//! - Only depends on `dealflow-domain`
//! - No database, HTTP, or platform code
//! - All external dependencies via traits
//! - Pure, testable business logic

pub mod forecast;
pub mod health;
pub mod store;

// Infrastructure ports
pub mod crm_ports;
pub mod oracle_ports;

// Re-export specific items to avoid ambiguity
pub use crm_ports::CrmGateway;
pub use forecast::rules::{DealSizeBucket, StageDurationTable};
pub use forecast::CashflowService;
pub use health::DealHealthService;
pub use oracle_ports::{DealForecastContext, ForecastOracle, OracleOutcome};
pub use store::ports::{
    DealFilter, DealRepository, NoteRepository, PipelineRepository, StageRepository,
    SyncStateRepository,
};
