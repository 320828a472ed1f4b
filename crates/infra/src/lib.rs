//! # Dealflow Infrastructure
//!
//! Infrastructure implementations of the core ports.
//!
//! This crate contains:
//! - SQLite cache implementations of the repository ports
//! - The CRM HTTP client and the sync executor built on it
//! - The forecast oracle client (OpenAI-compatible chat completions)
//! - The periodic sync scheduler and the engine composition root
//!
//! ## Architecture
//! - Implements traits defined in `dealflow-core`
//! - Depends on `dealflow-domain` and `dealflow-core`
//! - Contains all "impure" code (database, HTTP, clocks, scheduling)

pub mod config;
pub mod context;
pub mod database;
pub mod errors;
pub mod http;
pub mod integrations;
pub mod scheduling;

// Re-export commonly used items
pub use context::{ComponentHealth, EngineContext, HealthStatus};
pub use database::{DbManager, DbPool};
pub use errors::InfraError;
pub use http::HttpClient;
