//! Deterministic forecast rules
//!
//! Everything here is pure: the rule engine reads a deal, a stage name and a
//! date and produces predictions or warnings. It is used three ways by the
//! orchestrator: as a precheck that bypasses the oracle, as an override for
//! low-confidence oracle output, and as a fallback when the oracle fails.

use chrono::{Duration, NaiveDate};
use dealflow_domain::constants::{FALLBACK_STAGE_DAYS, RULE_CONFIDENCE};
use dealflow_domain::{Deal, DealPrediction, ForecastConfig, PredictionSource};

/// Deals below this value count as small
const SMALL_DEAL_MAX_VALUE: f64 = 10_000.0;
/// Deals at or above this value count as large
const LARGE_DEAL_MIN_VALUE: f64 = 100_000.0;

/// Substring marking a stage whose entry is the invoice event itself
const INVOICED_STAGE_MARKER: &str = "invoice";

/// Coarse deal-size classification used by the duration table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DealSizeBucket {
    Small,
    Medium,
    Large,
}

impl DealSizeBucket {
    /// Classify a monetary value
    #[must_use]
    pub fn for_value(value: f64) -> Self {
        if value >= LARGE_DEAL_MIN_VALUE {
            Self::Large
        } else if value >= SMALL_DEAL_MAX_VALUE {
            Self::Medium
        } else {
            Self::Small
        }
    }
}

/// One row of the stage-duration table
#[derive(Debug, Clone, Copy)]
struct StageDurationRule {
    /// Lowercase substring matched against the stage name
    needle: &'static str,
    /// Expected remaining days to invoice, counted from stage entry
    base_days: i64,
    /// Additional days granted to large deals
    large_deal_extra_days: i64,
}

/// Static mapping from stage name to expected remaining days-to-invoice
///
/// Stage names differ per CRM deployment, so rows match on substrings of the
/// lowercased name rather than exact labels. The first matching row wins.
#[derive(Debug, Clone)]
pub struct StageDurationTable {
    rules: Vec<StageDurationRule>,
}

impl StageDurationTable {
    /// The built-in table covering a conventional sales funnel
    #[must_use]
    pub fn standard() -> Self {
        Self {
            rules: vec![
                StageDurationRule { needle: "invoice", base_days: 0, large_deal_extra_days: 0 },
                StageDurationRule { needle: "deliver", base_days: 7, large_deal_extra_days: 3 },
                StageDurationRule {
                    needle: "production",
                    base_days: 10,
                    large_deal_extra_days: 4,
                },
                StageDurationRule {
                    needle: "order received",
                    base_days: 14,
                    large_deal_extra_days: 7,
                },
                StageDurationRule { needle: "negotiat", base_days: 21, large_deal_extra_days: 9 },
                StageDurationRule { needle: "proposal", base_days: 30, large_deal_extra_days: 15 },
                StageDurationRule { needle: "demo", base_days: 45, large_deal_extra_days: 15 },
                StageDurationRule { needle: "qualif", base_days: 60, large_deal_extra_days: 30 },
                StageDurationRule { needle: "contact", base_days: 75, large_deal_extra_days: 30 },
            ],
        }
    }

    /// Expected remaining days to invoice for a stage, or `None` when the
    /// stage is not covered by the table
    #[must_use]
    pub fn expected_days(&self, stage_name: &str, value: f64) -> Option<i64> {
        let lowered = stage_name.to_lowercase();
        self.rules.iter().find(|rule| lowered.contains(rule.needle)).map(|rule| {
            match DealSizeBucket::for_value(value) {
                DealSizeBucket::Large => rule.base_days + rule.large_deal_extra_days,
                DealSizeBucket::Small | DealSizeBucket::Medium => rule.base_days,
            }
        })
    }

    /// Whether entering this stage means the invoice already exists
    #[must_use]
    pub fn is_invoiced_stage(&self, stage_name: &str) -> bool {
        stage_name.to_lowercase().contains(INVOICED_STAGE_MARKER)
    }
}

impl Default for StageDurationTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Deterministic rule engine: precheck, override, fallback and validation
#[derive(Debug, Clone)]
pub struct RuleEngine {
    table: StageDurationTable,
    config: ForecastConfig,
}

impl RuleEngine {
    /// Create an engine with the standard duration table
    #[must_use]
    pub fn new(config: ForecastConfig) -> Self {
        Self { table: StageDurationTable::standard(), config }
    }

    /// Create an engine with a custom duration table
    #[must_use]
    pub fn with_table(config: ForecastConfig, table: StageDurationTable) -> Self {
        Self { table, config }
    }

    /// Resolve a deal without the oracle when its stage already implies the
    /// invoice event
    ///
    /// Returns `None` for every other stage, and always when the precheck is
    /// disabled in configuration.
    #[must_use]
    pub fn precheck(&self, deal: &Deal, stage_name: &str) -> Option<DealPrediction> {
        if !self.config.precheck_enabled || !self.table.is_invoiced_stage(stage_name) {
            return None;
        }

        let invoice = deal.stage_entered_at().date_naive();
        let payment = invoice + Duration::days(self.config.payment_terms_days);
        Some(DealPrediction {
            deal_id: deal.id,
            invoice_date: Some(invoice),
            payment_date: Some(payment),
            confidence: 1.0,
            assumptions: vec![
                format!("stage '{stage_name}' implies the invoice was issued on stage entry"),
                format!(
                    "payment assumed {} days after invoice",
                    self.config.payment_terms_days
                ),
            ],
            missing_fields: Vec::new(),
            reasoning: format!(
                "resolved by precheck: '{stage_name}' is a terminal invoiced stage"
            ),
            source: PredictionSource::Precheck,
        })
    }

    /// Replace a low-confidence oracle prediction with the rule estimate
    ///
    /// Predictions at or above the override threshold pass through untouched.
    #[must_use]
    pub fn apply_override(
        &self,
        prediction: DealPrediction,
        deal: &Deal,
        stage_name: &str,
        today: NaiveDate,
    ) -> DealPrediction {
        if prediction.confidence >= self.config.override_confidence_threshold {
            return prediction;
        }

        let (invoice, mut rule_assumptions) = self.rule_invoice_date(deal, stage_name, today);
        let mut overridden = prediction;
        overridden.assumptions.push(format!(
            "oracle confidence {:.2} below override threshold {:.2}; dates replaced by the stage-duration estimate",
            overridden.confidence, self.config.override_confidence_threshold
        ));
        overridden.assumptions.append(&mut rule_assumptions);
        overridden.invoice_date = Some(invoice);
        overridden.payment_date = Some(invoice + Duration::days(self.config.payment_terms_days));
        overridden.confidence = RULE_CONFIDENCE;
        overridden.source = PredictionSource::RuleOverride;
        overridden
    }

    /// Build a rule-based prediction when the oracle produced nothing usable
    ///
    /// `confidence` distinguishes the two degradation paths: schema failures
    /// carry 0.0, transient oracle unavailability carries the rule
    /// confidence.
    #[must_use]
    pub fn fallback(
        &self,
        deal: &Deal,
        stage_name: &str,
        today: NaiveDate,
        confidence: f32,
        reason: &str,
    ) -> DealPrediction {
        let (invoice, mut assumptions) = self.rule_invoice_date(deal, stage_name, today);
        assumptions.push(format!(
            "payment assumed {} days after invoice",
            self.config.payment_terms_days
        ));
        DealPrediction {
            deal_id: deal.id,
            invoice_date: Some(invoice),
            payment_date: Some(invoice + Duration::days(self.config.payment_terms_days)),
            confidence,
            assumptions,
            missing_fields: Vec::new(),
            reasoning: format!("rule-based fallback: {reason}"),
            source: PredictionSource::RuleFallback,
        }
    }

    /// Sanity-check a prediction without mutating it
    ///
    /// Violations come back as warnings; the caller decides what to do with
    /// flagged predictions.
    #[must_use]
    pub fn validate(&self, prediction: &DealPrediction, today: NaiveDate) -> Vec<String> {
        let mut warnings = Vec::new();
        let Some(invoice) = prediction.invoice_date else {
            return warnings;
        };

        if invoice < today {
            warnings.push(format!(
                "deal {}: invoice date {invoice} is before today",
                prediction.deal_id
            ));
        }
        let horizon_limit = today + Duration::days(self.config.max_invoice_horizon_days);
        if invoice > horizon_limit {
            warnings.push(format!(
                "deal {}: invoice date {invoice} is more than {} days in the future",
                prediction.deal_id, self.config.max_invoice_horizon_days
            ));
        }
        if let Some(payment) = prediction.payment_date {
            if payment < invoice {
                warnings.push(format!(
                    "deal {}: payment date {payment} precedes invoice date {invoice}",
                    prediction.deal_id
                ));
            }
        }
        warnings
    }

    /// Forecast configuration this engine was built with
    #[must_use]
    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    /// Stage-duration estimate for a deal, with the assumptions explaining it
    ///
    /// Stuck deals get the configured delay penalty on top, reflecting the
    /// elevated risk of a stage that stopped moving.
    fn rule_invoice_date(
        &self,
        deal: &Deal,
        stage_name: &str,
        today: NaiveDate,
    ) -> (NaiveDate, Vec<String>) {
        let mut assumptions = Vec::new();

        let days = match self.table.expected_days(stage_name, deal.value) {
            Some(days) => {
                assumptions.push(format!(
                    "stage-duration table expects {days} days to invoice from entry into '{stage_name}'"
                ));
                days
            }
            None => {
                assumptions.push(format!(
                    "stage '{stage_name}' not in the duration table; assuming {FALLBACK_STAGE_DAYS} days to invoice"
                ));
                FALLBACK_STAGE_DAYS
            }
        };

        let stage_entry = deal.stage_entered_at().date_naive();
        let mut invoice = stage_entry + Duration::days(days);

        let dwell_days = (today - stage_entry).num_days();
        if dwell_days > self.config.stuck_stage_days {
            invoice += Duration::days(self.config.stuck_delay_penalty_days);
            assumptions.push(format!(
                "deal has sat in its stage for {dwell_days} days; added a {}-day delay penalty",
                self.config.stuck_delay_penalty_days
            ));
        }

        (invoice, assumptions)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use dealflow_domain::DealStatus;

    use super::*;

    fn deal_in_stage(value: f64, stage_entered_days_ago: i64) -> (Deal, NaiveDate) {
        let now = Utc.with_ymd_and_hms(2026, 8, 25, 9, 0, 0).single().unwrap();
        let deal = Deal {
            id: 42,
            title: "Test deal".to_string(),
            pipeline_id: 5,
            stage_id: 12,
            owner_name: None,
            org_name: None,
            value,
            currency: "EUR".to_string(),
            status: DealStatus::Open,
            add_time: now - Duration::days(90),
            update_time: now,
            stage_change_time: Some(now - Duration::days(stage_entered_days_ago)),
            last_activity_time: None,
            raw_payload: None,
        };
        (deal, now.date_naive())
    }

    fn oracle_prediction(deal_id: i64, confidence: f32, invoice: NaiveDate) -> DealPrediction {
        DealPrediction {
            deal_id,
            invoice_date: Some(invoice),
            payment_date: Some(invoice + Duration::days(30)),
            confidence,
            assumptions: vec!["oracle guessed".to_string()],
            missing_fields: vec![],
            reasoning: "oracle".to_string(),
            source: PredictionSource::Oracle,
        }
    }

    #[test]
    fn size_buckets_split_at_documented_values() {
        assert_eq!(DealSizeBucket::for_value(5_000.0), DealSizeBucket::Small);
        assert_eq!(DealSizeBucket::for_value(50_000.0), DealSizeBucket::Medium);
        assert_eq!(DealSizeBucket::for_value(100_000.0), DealSizeBucket::Large);
    }

    #[test]
    fn table_grants_large_deals_extra_days() {
        let table = StageDurationTable::standard();
        assert_eq!(table.expected_days("Order Received", 50_000.0), Some(14));
        assert_eq!(table.expected_days("Order Received", 250_000.0), Some(21));
        assert_eq!(table.expected_days("Basket Weaving", 1_000.0), None);
    }

    #[test]
    fn precheck_resolves_invoiced_stage_with_full_confidence() {
        let engine = RuleEngine::new(ForecastConfig::default());
        let (deal, _today) = deal_in_stage(20_000.0, 2);

        let prediction = engine.precheck(&deal, "Invoiced").expect("precheck should resolve");
        assert_eq!(prediction.invoice_date, Some(deal.stage_entered_at().date_naive()));
        assert!((prediction.confidence - 1.0).abs() < f32::EPSILON);
        assert_eq!(prediction.source, PredictionSource::Precheck);
        // Payment follows the configured terms
        let expected_payment = deal.stage_entered_at().date_naive() + Duration::days(30);
        assert_eq!(prediction.payment_date, Some(expected_payment));
    }

    #[test]
    fn precheck_ignores_ordinary_stages_and_respects_the_kill_switch() {
        let engine = RuleEngine::new(ForecastConfig::default());
        let (deal, _) = deal_in_stage(20_000.0, 2);
        assert!(engine.precheck(&deal, "Proposal Made").is_none());

        let disabled = RuleEngine::new(ForecastConfig {
            precheck_enabled: false,
            ..ForecastConfig::default()
        });
        assert!(disabled.precheck(&deal, "Invoiced").is_none());
    }

    #[test]
    fn override_replaces_low_confidence_dates() {
        let engine = RuleEngine::new(ForecastConfig::default());
        let (deal, today) = deal_in_stage(20_000.0, 10);
        let oracle_invoice = NaiveDate::from_ymd_opt(2027, 1, 1).unwrap();

        let overridden = engine.apply_override(
            oracle_prediction(42, 0.1, oracle_invoice),
            &deal,
            "Proposal Made",
            today,
        );

        let expected = deal.stage_entered_at().date_naive() + Duration::days(30);
        assert_eq!(overridden.invoice_date, Some(expected));
        assert!((overridden.confidence - RULE_CONFIDENCE).abs() < f32::EPSILON);
        assert_eq!(overridden.source, PredictionSource::RuleOverride);
        assert!(overridden.assumptions.iter().any(|a| a.contains("below override threshold")));
    }

    #[test]
    fn override_leaves_confident_predictions_untouched() {
        let engine = RuleEngine::new(ForecastConfig::default());
        let (deal, today) = deal_in_stage(20_000.0, 10);
        let oracle_invoice = NaiveDate::from_ymd_opt(2026, 10, 1).unwrap();
        let original = oracle_prediction(42, 0.9, oracle_invoice);

        let untouched = engine.apply_override(original.clone(), &deal, "Proposal Made", today);
        assert_eq!(untouched, original);
    }

    #[test]
    fn stuck_deals_get_the_delay_penalty_on_rule_estimates() {
        let engine = RuleEngine::new(ForecastConfig::default());
        let (deal, today) = deal_in_stage(20_000.0, 70);

        let overridden = engine.apply_override(
            oracle_prediction(42, 0.1, today),
            &deal,
            "Proposal Made",
            today,
        );

        // 70 days in stage exceeds the 60-day stuck threshold
        let expected =
            deal.stage_entered_at().date_naive() + Duration::days(30) + Duration::days(14);
        assert_eq!(overridden.invoice_date, Some(expected));
        assert!(overridden.assumptions.iter().any(|a| a.contains("delay penalty")));
    }

    #[test]
    fn fallback_carries_the_given_confidence_and_reason() {
        let engine = RuleEngine::new(ForecastConfig::default());
        let (deal, today) = deal_in_stage(20_000.0, 5);

        let prediction =
            engine.fallback(&deal, "Proposal Made", today, 0.0, "oracle returned malformed JSON");
        assert!((prediction.confidence - 0.0).abs() < f32::EPSILON);
        assert_eq!(prediction.source, PredictionSource::RuleFallback);
        assert!(prediction.reasoning.contains("malformed JSON"));
        assert!(prediction.invoice_date.is_some());
        assert!(prediction.payment_date >= prediction.invoice_date);
    }

    #[test]
    fn validate_flags_each_documented_violation() {
        let engine = RuleEngine::new(ForecastConfig::default());
        let today = NaiveDate::from_ymd_opt(2026, 8, 25).unwrap();

        let past = oracle_prediction(1, 0.8, today - Duration::days(3));
        let past_warnings = engine.validate(&past, today);
        assert_eq!(past_warnings.len(), 1);
        assert!(past_warnings[0].contains("before today"));

        let far = oracle_prediction(2, 0.8, today + Duration::days(400));
        let far_warnings = engine.validate(&far, today);
        assert_eq!(far_warnings.len(), 1);
        assert!(far_warnings[0].contains("in the future"));

        let mut inverted = oracle_prediction(3, 0.8, today + Duration::days(10));
        inverted.payment_date = Some(today + Duration::days(5));
        let inverted_warnings = engine.validate(&inverted, today);
        assert_eq!(inverted_warnings.len(), 1);
        assert!(inverted_warnings[0].contains("precedes invoice date"));
    }

    #[test]
    fn validate_accepts_predictions_without_dates() {
        let engine = RuleEngine::new(ForecastConfig::default());
        let today = NaiveDate::from_ymd_opt(2026, 8, 25).unwrap();
        let mut empty = oracle_prediction(4, 0.3, today);
        empty.invoice_date = None;
        empty.payment_date = None;
        assert!(engine.validate(&empty, today).is_empty());
    }
}
