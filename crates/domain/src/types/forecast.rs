//! Forecast output types
//!
//! Predictions and buckets are derived views: they are recomputed per request
//! and never persisted. Invoice and payment dates are calendar dates
//! (`NaiveDate`); the time-of-day of an invoice carries no meaning here.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::constants::{CONFIDENCE_HIGH_BAND, CONFIDENCE_MEDIUM_BAND};

/// How a prediction was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionSource {
    /// Deterministic precheck resolved the deal without the oracle
    Precheck,
    /// Oracle output accepted as-is
    Oracle,
    /// Low-confidence oracle output replaced by the rule estimate
    RuleOverride,
    /// Rule estimate substituted after an oracle failure
    RuleFallback,
}

crate::impl_status_conversions!(PredictionSource {
    Precheck => "precheck",
    Oracle => "oracle",
    RuleOverride => "rule_override",
    RuleFallback => "rule_fallback",
});

/// Predicted invoice/payment dates for one deal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealPrediction {
    /// Deal this prediction belongs to
    pub deal_id: i64,
    /// Predicted invoice date, if one could be derived
    pub invoice_date: Option<NaiveDate>,
    /// Predicted payment date; `None` whenever no invoice is predicted
    pub payment_date: Option<NaiveDate>,
    /// Confidence in [0, 1]
    pub confidence: f32,
    /// Ordered assumption strings accumulated along the pipeline
    pub assumptions: Vec<String>,
    /// CRM fields the predictor found missing
    pub missing_fields: Vec<String>,
    /// Free-text reasoning
    pub reasoning: String,
    /// Which path produced the final values
    pub source: PredictionSource,
}

impl DealPrediction {
    /// Confidence band this prediction falls into
    #[must_use]
    pub fn confidence_band(&self) -> ConfidenceBand {
        if self.confidence >= CONFIDENCE_HIGH_BAND {
            ConfidenceBand::High
        } else if self.confidence >= CONFIDENCE_MEDIUM_BAND {
            ConfidenceBand::Medium
        } else {
            ConfidenceBand::Low
        }
    }
}

/// Coarse confidence classification used by the explainability report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

/// Requested bucket granularity for forecast aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketGranularity {
    Week,
    Month,
}

crate::impl_status_conversions!(BucketGranularity {
    Week => "week",
    Month => "month",
});

impl BucketGranularity {
    /// Bucket label for a date, e.g. `2026-W35` or `2026-08`
    #[must_use]
    pub fn label_for(&self, date: NaiveDate) -> String {
        match self {
            Self::Week => {
                let iso = date.iso_week();
                format!("{}-W{:02}", iso.year(), iso.week())
            }
            Self::Month => date.format("%Y-%m").to_string(),
        }
    }
}

/// One aggregated forecast period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashflowBucket {
    /// Period label, e.g. `2026-W35` (week) or `2026-08` (month)
    pub period: String,
    /// Sum of expected invoice values in the period
    pub total_value: f64,
    /// Number of contributing deals
    pub deal_count: usize,
    /// Optional free-text annotation
    pub comment: Option<String>,
}

/// Parameters of one forecast request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRequest {
    /// Pipelines to forecast; empty means every cached pipeline
    pub pipeline_ids: Vec<i64>,
    /// Forecast window in days from today
    pub horizon_days: i64,
    /// Bucket granularity
    pub granularity: BucketGranularity,
    /// Minimum confidence for bucket inclusion; falls back to configuration
    pub min_confidence: Option<f32>,
}

/// Full result of a forecast run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashflowForecast {
    /// Every produced prediction, including those excluded from buckets
    pub per_deal: Vec<DealPrediction>,
    /// Aggregated periods, ordered by label; empty periods omitted
    pub buckets: Vec<CashflowBucket>,
    /// Validation and degradation warnings accumulated across the run
    pub warnings: Vec<String>,
}

/// Distribution of prediction confidences across bands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidenceHistogram {
    /// Predictions at or above the high band
    pub high: usize,
    /// Predictions between the medium and high bands
    pub medium: usize,
    /// Everything below the medium band
    pub low: usize,
}

impl ConfidenceHistogram {
    /// Count one prediction into its band
    pub fn observe(&mut self, prediction: &DealPrediction) {
        match prediction.confidence_band() {
            ConfidenceBand::High => self.high += 1,
            ConfidenceBand::Medium => self.medium += 1,
            ConfidenceBand::Low => self.low += 1,
        }
    }

    /// Total observations across all bands
    #[must_use]
    pub fn total(&self) -> usize {
        self.high + self.medium + self.low
    }
}

/// Explainability report over a set of predictions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssumptionReport {
    /// Distinct assumption strings across all predictions, sorted
    pub global: Vec<String>,
    /// Assumptions grouped per deal, in prediction order
    pub per_deal: BTreeMap<i64, Vec<String>>,
    /// Confidence distribution
    pub confidence_histogram: ConfidenceHistogram,
}
