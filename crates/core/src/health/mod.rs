//! Deal health queries
//!
//! Read-only derivations over the cache store: overdue and stuck
//! classification, owner views and search. No network calls.

pub mod service;

pub use service::DealHealthService;
