//! Domain data types
//!
//! Split by concern: CRM entities mirrored into the cache, sync bookkeeping,
//! and forecast outputs.

pub mod crm;
pub mod forecast;
pub mod sync;

pub use crm::*;
pub use forecast::*;
pub use sync::*;
