//! CRM integration
//!
//! HTTP client for the CRM's collection endpoints, wire DTOs, the sync
//! executor that reconciles fetched records into the cache, and the
//! on-demand note feed.

pub mod client;
pub mod notes;
pub mod sync;
pub mod types;

pub use client::CrmClient;
pub use notes::{NoteFeed, NoteFeedConfig};
pub use sync::SyncExecutor;
