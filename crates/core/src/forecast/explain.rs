//! Assumption reporting
//!
//! Turns a batch of predictions into the explainability view: which
//! assumptions were made anywhere in the run, which deal relied on which, and
//! how confidence is distributed.

use std::collections::{BTreeMap, BTreeSet};

use dealflow_domain::{AssumptionReport, ConfidenceHistogram, DealPrediction};

/// Build the assumption report for a set of predictions
#[must_use]
pub fn build_report(predictions: &[DealPrediction]) -> AssumptionReport {
    let mut global = BTreeSet::new();
    let mut per_deal: BTreeMap<i64, Vec<String>> = BTreeMap::new();
    let mut confidence_histogram = ConfidenceHistogram::default();

    for prediction in predictions {
        confidence_histogram.observe(prediction);
        if prediction.assumptions.is_empty() {
            continue;
        }
        global.extend(prediction.assumptions.iter().cloned());
        per_deal
            .entry(prediction.deal_id)
            .or_default()
            .extend(prediction.assumptions.iter().cloned());
    }

    AssumptionReport { global: global.into_iter().collect(), per_deal, confidence_histogram }
}
