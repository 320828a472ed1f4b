//! Cashflow forecast orchestration
//!
//! [`CashflowService`] runs the full derivation pipeline over the local deal
//! cache: deterministic precheck, batched oracle calls, low-confidence
//! override, validation and time-bucket aggregation. The service never talks
//! to the CRM; it reads whatever the last sync left behind.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{Duration, Utc};
use dealflow_domain::constants::RULE_CONFIDENCE;
use dealflow_domain::{
    AssumptionReport, CashflowBucket, CashflowForecast, Config, Deal, DealPrediction,
    ForecastRequest, Result,
};
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use crate::forecast::explain;
use crate::forecast::rules::RuleEngine;
use crate::oracle_ports::{DealForecastContext, ForecastOracle, OracleOutcome};
use crate::store::ports::{DealRepository, NoteRepository, StageRepository};

/// Derivation pipeline over the cached deal mirror
pub struct CashflowService {
    deals: Arc<dyn DealRepository>,
    notes: Arc<dyn NoteRepository>,
    stages: Arc<dyn StageRepository>,
    oracle: Arc<dyn ForecastOracle>,
    rules: RuleEngine,
    oracle_batch_size: usize,
    oracle_concurrency: usize,
}

impl CashflowService {
    /// Wire the service against its ports
    #[must_use]
    pub fn new(
        deals: Arc<dyn DealRepository>,
        notes: Arc<dyn NoteRepository>,
        stages: Arc<dyn StageRepository>,
        oracle: Arc<dyn ForecastOracle>,
        config: &Config,
    ) -> Self {
        Self {
            deals,
            notes,
            stages,
            oracle,
            rules: RuleEngine::new(config.forecast.clone()),
            oracle_batch_size: config.oracle.batch_size.max(1),
            oracle_concurrency: config.oracle.max_concurrency.max(1),
        }
    }

    /// Predict invoice/payment dates for every open deal in scope and
    /// aggregate them into time buckets
    ///
    /// Oracle failures degrade per batch and per deal; the only hard errors
    /// left are storage errors.
    #[instrument(skip(self, request), fields(pipelines = ?request.pipeline_ids, horizon = request.horizon_days))]
    pub async fn predict_cashflow(&self, request: &ForecastRequest) -> Result<CashflowForecast> {
        let now = Utc::now();
        let today = now.date_naive();

        let deals = self.deals.open_deals(&request.pipeline_ids).await?;
        if deals.is_empty() {
            debug!("no open deals in scope");
            return Ok(CashflowForecast {
                per_deal: Vec::new(),
                buckets: Vec::new(),
                warnings: Vec::new(),
            });
        }

        let stage_names = self.stage_name_map().await?;
        let mut warnings = Vec::new();

        // Stage names drive both the precheck and the rule estimates. A deal
        // whose stage is missing from the catalog still gets forecast, with
        // an empty stage name and a warning.
        let mut stage_name_by_deal: HashMap<i64, String> = HashMap::new();
        for deal in &deals {
            let name = match stage_names.get(&deal.stage_id) {
                Some(name) => name.clone(),
                None => {
                    warnings.push(format!(
                        "deal {}: stage {} not in the local catalog",
                        deal.id, deal.stage_id
                    ));
                    String::new()
                }
            };
            stage_name_by_deal.insert(deal.id, name);
        }
        let deal_by_id: HashMap<i64, &Deal> = deals.iter().map(|d| (d.id, d)).collect();

        let mut predictions: HashMap<i64, DealPrediction> = HashMap::new();
        let mut pending: Vec<&Deal> = Vec::new();
        for deal in &deals {
            let stage_name = &stage_name_by_deal[&deal.id];
            match self.rules.precheck(deal, stage_name) {
                Some(prediction) => {
                    predictions.insert(deal.id, prediction);
                }
                None => pending.push(deal),
            }
        }
        debug!(
            total = deals.len(),
            prechecked = predictions.len(),
            "precheck partition complete"
        );

        if !pending.is_empty() {
            let mut contexts = Vec::with_capacity(pending.len());
            for deal in &pending {
                let recent_notes = match self
                    .notes
                    .recent_notes(deal.id, self.rules.config().note_context_limit)
                    .await
                {
                    Ok(notes) => notes.into_iter().map(|n| n.content).collect(),
                    Err(err) => {
                        warn!(deal_id = deal.id, error = %err, "note lookup failed; forecasting without notes");
                        warnings.push(format!(
                            "deal {}: notes unavailable for oracle context: {err}",
                            deal.id
                        ));
                        Vec::new()
                    }
                };
                contexts.push(DealForecastContext {
                    deal_id: deal.id,
                    title: deal.title.clone(),
                    stage_name: stage_name_by_deal[&deal.id].clone(),
                    days_in_stage: deal.days_in_stage(now),
                    value: deal.value,
                    currency: deal.currency.clone(),
                    recent_notes,
                });
            }

            let batches = self.call_oracle(contexts).await;
            for (batch, result) in batches {
                match result {
                    Ok(outcomes) => {
                        let mut seen: HashSet<i64> = HashSet::new();
                        for outcome in outcomes {
                            match outcome {
                                OracleOutcome::Resolved(prediction) => {
                                    seen.insert(prediction.deal_id);
                                    let Some(deal) = deal_by_id.get(&prediction.deal_id) else {
                                        warnings.push(format!(
                                            "oracle returned a prediction for unknown deal {}",
                                            prediction.deal_id
                                        ));
                                        continue;
                                    };
                                    let stage_name = &stage_name_by_deal[&deal.id];
                                    let prediction = self.rules.apply_override(
                                        prediction, deal, stage_name, today,
                                    );
                                    predictions.insert(deal.id, prediction);
                                }
                                OracleOutcome::Malformed { deal_id, error } => {
                                    seen.insert(deal_id);
                                    warnings.push(format!(
                                        "deal {deal_id}: oracle response failed validation: {error}"
                                    ));
                                    if let Some(deal) = deal_by_id.get(&deal_id) {
                                        let stage_name = &stage_name_by_deal[&deal_id];
                                        predictions.insert(
                                            deal_id,
                                            self.rules.fallback(
                                                deal,
                                                stage_name,
                                                today,
                                                0.0,
                                                "oracle response failed validation",
                                            ),
                                        );
                                    }
                                }
                            }
                        }
                        for context in &batch {
                            if seen.contains(&context.deal_id) {
                                continue;
                            }
                            warnings.push(format!(
                                "deal {}: oracle omitted it from the response",
                                context.deal_id
                            ));
                            if let Some(deal) = deal_by_id.get(&context.deal_id) {
                                predictions.insert(
                                    context.deal_id,
                                    self.rules.fallback(
                                        deal,
                                        &stage_name_by_deal[&context.deal_id],
                                        today,
                                        0.0,
                                        "oracle omitted the deal from its response",
                                    ),
                                );
                            }
                        }
                    }
                    Err(err) => {
                        warn!(batch_len = batch.len(), error = %err, "oracle batch failed; using rule estimates");
                        warnings.push(format!(
                            "oracle request failed for {} deals: {err}",
                            batch.len()
                        ));
                        for context in &batch {
                            if let Some(deal) = deal_by_id.get(&context.deal_id) {
                                predictions.insert(
                                    context.deal_id,
                                    self.rules.fallback(
                                        deal,
                                        &stage_name_by_deal[&context.deal_id],
                                        today,
                                        RULE_CONFIDENCE,
                                        &format!("oracle unavailable: {err}"),
                                    ),
                                );
                            }
                        }
                    }
                }
            }
        }

        for deal in &deals {
            if let Some(prediction) = predictions.get(&deal.id) {
                warnings.extend(self.rules.validate(prediction, today));
            }
        }

        let min_confidence =
            request.min_confidence.unwrap_or(self.rules.config().min_bucket_confidence);
        let horizon_limit = today + Duration::days(request.horizon_days);
        let mut bucket_map: BTreeMap<String, CashflowBucket> = BTreeMap::new();
        for deal in &deals {
            let Some(prediction) = predictions.get(&deal.id) else {
                continue;
            };
            let Some(invoice) = prediction.invoice_date else {
                continue;
            };
            if prediction.confidence < min_confidence || invoice > horizon_limit {
                continue;
            }
            let label = request.granularity.label_for(invoice);
            let bucket = bucket_map.entry(label.clone()).or_insert_with(|| CashflowBucket {
                period: label,
                total_value: 0.0,
                deal_count: 0,
                comment: None,
            });
            bucket.total_value += deal.value;
            bucket.deal_count += 1;
        }

        let per_deal: Vec<DealPrediction> =
            deals.iter().filter_map(|deal| predictions.remove(&deal.id)).collect();
        // BTreeMap iteration order doubles as chronological order: both label
        // formats are zero-padded with the year first.
        let buckets: Vec<CashflowBucket> = bucket_map.into_values().collect();

        debug!(
            predictions = per_deal.len(),
            buckets = buckets.len(),
            warnings = warnings.len(),
            "forecast complete"
        );
        Ok(CashflowForecast { per_deal, buckets, warnings })
    }

    /// Build the assumption report for a prediction set
    #[must_use]
    pub fn explain_assumptions(&self, predictions: &[DealPrediction]) -> AssumptionReport {
        explain::build_report(predictions)
    }

    /// Fan contexts out to the oracle in bounded-concurrency batches
    ///
    /// Each batch returns alongside its contexts so failures can be mapped
    /// back to the deals they cover.
    async fn call_oracle(
        &self,
        contexts: Vec<DealForecastContext>,
    ) -> Vec<(Vec<DealForecastContext>, Result<Vec<OracleOutcome>>)> {
        let semaphore = Arc::new(Semaphore::new(self.oracle_concurrency));
        let mut calls = Vec::new();
        for batch in contexts.chunks(self.oracle_batch_size) {
            let batch = batch.to_vec();
            let oracle = Arc::clone(&self.oracle);
            let semaphore = Arc::clone(&semaphore);
            calls.push(async move {
                // The semaphore is never closed, so acquisition cannot fail
                let _permit = semaphore.acquire_owned().await.ok();
                let result = oracle.forecast_batch(&batch).await;
                (batch, result)
            });
        }
        join_all(calls).await
    }

    async fn stage_name_map(&self) -> Result<HashMap<i64, String>> {
        let stages = self.stages.list_stages(None).await?;
        Ok(stages.into_iter().map(|stage| (stage.id, stage.name)).collect())
    }
}
