//! # Dealflow Domain
//!
//! Pure domain layer for the Dealflow engine: the CRM entities mirrored into
//! the local cache, the sync bookkeeping that tracks their freshness, and the
//! cashflow forecast model built on top of them.
//!
//! Everything in this crate is plain data plus derived accessors. Nothing here
//! performs IO, and the crate depends only on external libraries, never on the
//! other Dealflow crates.

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;

pub use config::*;
pub use errors::*;
pub use types::*;
