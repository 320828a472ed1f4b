//! Cashflow derivation
//!
//! Split into the pure rule engine ([`rules`]), the assumption report
//! builder ([`explain`]) and the orchestrating service ([`service`]).

pub mod explain;
pub mod rules;
pub mod service;

pub use rules::RuleEngine;
pub use service::CashflowService;
