//! Port interface for the prediction oracle
//!
//! The oracle receives compact per-deal contexts and must answer with one
//! prediction per deal. A malformed answer for one deal is reported as a
//! per-deal outcome so the rest of the batch survives.

use async_trait::async_trait;
use dealflow_domain::{DealPrediction, Result};
use serde::Serialize;

/// Context handed to the oracle for one deal
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DealForecastContext {
    /// Deal identifier echoed back in the response
    pub deal_id: i64,
    /// Deal title
    pub title: String,
    /// Current stage name, empty when the stage is not in the catalog
    pub stage_name: String,
    /// Whole days the deal has spent in its current stage
    pub days_in_stage: i64,
    /// Monetary value in `currency` units
    pub value: f64,
    /// ISO currency code
    pub currency: String,
    /// Recent note excerpts, newest first, bounded by configuration
    pub recent_notes: Vec<String>,
}

/// Per-deal outcome of an oracle call
#[derive(Debug, Clone, PartialEq)]
pub enum OracleOutcome {
    /// A prediction that passed schema validation
    Resolved(DealPrediction),
    /// The response element for this deal was missing or malformed
    Malformed {
        /// Deal the element was expected for
        deal_id: i64,
        /// What was wrong with it
        error: String,
    },
}

/// The external date-prediction service
#[async_trait]
pub trait ForecastOracle: Send + Sync {
    /// Predict invoice/payment dates for a batch of deals
    ///
    /// Returns one outcome per requested context. An `Err` means the whole
    /// call failed (network, auth, exhausted retries); per-deal schema
    /// problems come back as [`OracleOutcome::Malformed`].
    async fn forecast_batch(&self, contexts: &[DealForecastContext])
        -> Result<Vec<OracleOutcome>>;

    /// Predict dates for a single deal
    async fn forecast_one(&self, context: &DealForecastContext) -> Result<OracleOutcome> {
        let outcomes = self.forecast_batch(std::slice::from_ref(context)).await?;
        Ok(outcomes.into_iter().next().unwrap_or_else(|| OracleOutcome::Malformed {
            deal_id: context.deal_id,
            error: "oracle returned no prediction".to_string(),
        }))
    }
}
