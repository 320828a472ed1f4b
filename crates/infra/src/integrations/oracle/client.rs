//! Chat-completion client for the prediction oracle
//!
//! Sends batched deal contexts with a strict `json_schema` response contract
//! and parses each returned element independently, so one malformed element
//! costs one deal instead of the batch. Rate-limit responses honor the
//! server's `Retry-After` within the configured attempt budget.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use dealflow_core::{DealForecastContext, ForecastOracle, OracleOutcome};
use dealflow_domain::{DealflowError, OracleConfig, Result};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::http::HttpClient;

use super::types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, JsonSchema, OracleError,
    PredictionsEnvelope, RawPrediction, ResponseFormat,
};

const ORACLE_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_TEMPERATURE: f32 = 0.2;
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Client for the date-prediction completion endpoint
pub struct OracleClient {
    http_client: HttpClient,
    api_key: String,
    model: String,
    max_attempts: u32,
    api_url: String,
}

impl OracleClient {
    pub fn new(config: &OracleConfig, http_client: HttpClient) -> Self {
        Self {
            http_client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_attempts: config.max_attempts.max(1),
            api_url: ORACLE_API_URL.to_string(),
        }
    }

    /// Point the client at a different completion endpoint (for testing)
    #[cfg(test)]
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Request predictions for a batch of deal contexts
    ///
    /// Rate-limit responses get re-sent after the server's `Retry-After`
    /// until the attempt budget runs out; every other error is final here
    /// because transport-level retries already happened in [`HttpClient`].
    pub(crate) async fn predict(
        &self,
        contexts: &[DealForecastContext],
    ) -> std::result::Result<Vec<OracleOutcome>, OracleError> {
        if contexts.is_empty() {
            return Ok(vec![]);
        }

        info!(deal_count = contexts.len(), "requesting oracle forecast");
        let prompt = self.build_forecast_prompt(contexts);

        let mut attempt = 1;
        loop {
            match self.call_api(&prompt, contexts).await {
                Err(OracleError::RateLimit(retry_after)) if attempt < self.max_attempts => {
                    info!(retry_after, attempt, "oracle rate limited; backing off");
                    tokio::time::sleep(Duration::from_secs(retry_after)).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Build the user prompt from the deal contexts
    fn build_forecast_prompt(&self, contexts: &[DealForecastContext]) -> String {
        let mut prompt = String::from(
            "Predict the invoice date and the payment date for each sales deal below.\n\n",
        );

        for ctx in contexts {
            prompt.push_str(&format!(
                "Deal ID: {}\nTitle: {}\nStage: {}\nDays in current stage: {}\nValue: {:.2} {}\n",
                ctx.deal_id, ctx.title, ctx.stage_name, ctx.days_in_stage, ctx.value, ctx.currency
            ));

            if !ctx.recent_notes.is_empty() {
                prompt.push_str("Recent notes:\n");
                for note in &ctx.recent_notes {
                    prompt.push_str(&format!("  - {note}\n"));
                }
            }

            prompt.push('\n');
        }

        prompt.push_str(
            "Return JSON with a 'predictions' array holding one item per deal. Each item must \
             have: deal_id (integer), invoice_date (YYYY-MM-DD or null), payment_date \
             (YYYY-MM-DD or null), confidence (0.0-1.0), assumptions (array of strings), \
             missing_fields (array of strings), reasoning (string).",
        );

        prompt
    }

    async fn call_api(
        &self,
        prompt: &str,
        contexts: &[DealForecastContext],
    ) -> std::result::Result<Vec<OracleOutcome>, OracleError> {
        let request_payload = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: "You are a B2B sales forecasting analyst. Estimate when each deal \
                              will be invoiced and paid, based on its stage, size and recent \
                              activity. State your assumptions and name any missing CRM fields."
                        .to_string(),
                },
                ChatMessage { role: "user".to_string(), content: prompt.to_string() },
            ],
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            response_format: ResponseFormat {
                format_type: "json_schema".to_string(),
                json_schema: Some(JsonSchema {
                    name: "cashflow_predictions".to_string(),
                    schema: json!({
                        "type": "object",
                        "properties": {
                            "predictions": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "deal_id": { "type": "integer" },
                                        "invoice_date": { "type": ["string", "null"] },
                                        "payment_date": { "type": ["string", "null"] },
                                        "confidence": {
                                            "type": "number",
                                            "minimum": 0.0,
                                            "maximum": 1.0
                                        },
                                        "assumptions": {
                                            "type": "array",
                                            "items": { "type": "string" }
                                        },
                                        "missing_fields": {
                                            "type": "array",
                                            "items": { "type": "string" }
                                        },
                                        "reasoning": { "type": "string" }
                                    },
                                    "required": [
                                        "deal_id", "invoice_date", "payment_date", "confidence",
                                        "assumptions", "missing_fields", "reasoning"
                                    ],
                                    "additionalProperties": false
                                }
                            }
                        },
                        "required": ["predictions"],
                        "additionalProperties": false
                    }),
                    strict: Some(true),
                }),
            },
        };

        let request_builder = self
            .http_client
            .request(Method::POST, &self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request_payload);

        let response = self.http_client.send(request_builder).await.map_err(|err| match err {
            DealflowError::Network(msg) => OracleError::Network(msg),
            other => OracleError::Network(format!("HTTP error: {other}")),
        })?;

        let status = response.status();
        debug!(status = status.as_u16(), "received oracle response");

        if !status.is_success() {
            return Err(self.handle_error_status(status.as_u16(), response).await);
        }

        let chat_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| OracleError::InvalidSchema(format!("cannot parse response: {e}")))?;

        let choice = chat_response.choices.first().ok_or_else(|| {
            OracleError::InvalidSchema("response contained no choices".to_string())
        })?;

        let envelope: PredictionsEnvelope =
            serde_json::from_str(&choice.message.content).map_err(|e| {
                OracleError::InvalidSchema(format!("cannot parse predictions envelope: {e}"))
            })?;

        debug!(
            tokens = chat_response.usage.total_tokens,
            elements = envelope.predictions.len(),
            "oracle response parsed"
        );

        // Each element stands alone: one bad element degrades one deal
        let mut by_deal: HashMap<i64, OracleOutcome> = HashMap::new();
        for element in envelope.predictions {
            let Some(deal_id) = element.get("deal_id").and_then(Value::as_i64) else {
                warn!("oracle element without deal_id dropped");
                continue;
            };

            let outcome = match serde_json::from_value::<RawPrediction>(element) {
                Ok(raw) => match raw.into_prediction() {
                    Ok(prediction) => OracleOutcome::Resolved(prediction),
                    Err(error) => OracleOutcome::Malformed { deal_id, error },
                },
                Err(e) => OracleOutcome::Malformed { deal_id, error: e.to_string() },
            };
            by_deal.insert(deal_id, outcome);
        }

        Ok(contexts
            .iter()
            .map(|ctx| {
                by_deal.remove(&ctx.deal_id).unwrap_or_else(|| OracleOutcome::Malformed {
                    deal_id: ctx.deal_id,
                    error: "no prediction returned for this deal".to_string(),
                })
            })
            .collect())
    }

    /// Map HTTP error status codes, reading `Retry-After` before the body
    async fn handle_error_status(&self, status: u16, response: reqwest::Response) -> OracleError {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);

        let message = response.text().await.unwrap_or_else(|_| "unknown error".to_string());

        match status {
            401 | 403 => {
                OracleError::Authentication(format!("oracle rejected the API key ({status})"))
            }
            429 => OracleError::RateLimit(retry_after),
            _ => OracleError::Api { status, message },
        }
    }
}

#[async_trait]
impl ForecastOracle for OracleClient {
    async fn forecast_batch(
        &self,
        contexts: &[DealForecastContext],
    ) -> Result<Vec<OracleOutcome>> {
        self.predict(contexts).await.map_err(DealflowError::from)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn test_client(api_url: String, max_attempts: u32) -> OracleClient {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(5))
            .max_attempts(1) // no transport retries in tests
            .build()
            .expect("http client");

        let config = OracleConfig {
            api_key: "test-api-key".to_string(),
            max_attempts,
            ..OracleConfig::default()
        };

        OracleClient::new(&config, http_client).with_api_url(api_url)
    }

    fn context(deal_id: i64) -> DealForecastContext {
        DealForecastContext {
            deal_id,
            title: format!("Deal {deal_id}"),
            stage_name: "Negotiation".to_string(),
            days_in_stage: 12,
            value: 40_000.0,
            currency: "EUR".to_string(),
            recent_notes: vec!["Contract draft sent".to_string()],
        }
    }

    fn completion_body(content: &str) -> serde_json::Value {
        json!({
            "choices": [{ "message": { "content": content } }],
            "usage": { "total_tokens": 500, "prompt_tokens": 400, "completion_tokens": 100 }
        })
    }

    #[tokio::test]
    async fn resolves_predictions_in_request_order() {
        let mock_server = MockServer::start().await;

        let content = r#"{
            "predictions": [
                {"deal_id": 2, "invoice_date": "2026-10-01", "payment_date": "2026-10-31",
                 "confidence": 0.7, "assumptions": [], "missing_fields": [], "reasoning": "late stage"},
                {"deal_id": 1, "invoice_date": "2026-09-15", "payment_date": null,
                 "confidence": 0.6, "assumptions": ["verbal commit"], "missing_fields": [], "reasoning": "ok"}
            ]
        }"#;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer test-api-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(content)))
            .mount(&mock_server)
            .await;

        let client = test_client(format!("{}/v1/chat/completions", mock_server.uri()), 1);
        let outcomes =
            client.forecast_batch(&[context(1), context(2)]).await.expect("should forecast");

        assert_eq!(outcomes.len(), 2);
        match &outcomes[0] {
            OracleOutcome::Resolved(p) => {
                assert_eq!(p.deal_id, 1);
                assert_eq!(p.invoice_date, NaiveDate::from_ymd_opt(2026, 9, 15));
                assert_eq!(p.assumptions, vec!["verbal commit".to_string()]);
            }
            other => panic!("expected resolved outcome, got {other:?}"),
        }
        match &outcomes[1] {
            OracleOutcome::Resolved(p) => assert_eq!(p.deal_id, 2),
            other => panic!("expected resolved outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_element_degrades_only_that_deal() {
        let mock_server = MockServer::start().await;

        let content = r#"{
            "predictions": [
                {"deal_id": 1, "invoice_date": "2026-09-15", "payment_date": null,
                 "confidence": 0.6, "assumptions": [], "missing_fields": [], "reasoning": "ok"},
                {"deal_id": 2, "invoice_date": "sometime soon", "payment_date": null,
                 "confidence": 0.5, "assumptions": [], "missing_fields": [], "reasoning": "eh"}
            ]
        }"#;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(content)))
            .mount(&mock_server)
            .await;

        let client = test_client(mock_server.uri(), 1);
        let outcomes =
            client.forecast_batch(&[context(1), context(2)]).await.expect("should forecast");

        assert!(matches!(outcomes[0], OracleOutcome::Resolved(_)));
        match &outcomes[1] {
            OracleOutcome::Malformed { deal_id, error } => {
                assert_eq!(*deal_id, 2);
                assert!(error.contains("invalid date"));
            }
            other => panic!("expected malformed outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_element_reports_malformed() {
        let mock_server = MockServer::start().await;

        let content = r#"{
            "predictions": [
                {"deal_id": 1, "invoice_date": null, "payment_date": null,
                 "confidence": 0.2, "assumptions": [], "missing_fields": [], "reasoning": "early"}
            ]
        }"#;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(content)))
            .mount(&mock_server)
            .await;

        let client = test_client(mock_server.uri(), 1);
        let outcomes =
            client.forecast_batch(&[context(1), context(2)]).await.expect("should forecast");

        assert!(matches!(outcomes[0], OracleOutcome::Resolved(_)));
        match &outcomes[1] {
            OracleOutcome::Malformed { deal_id, error } => {
                assert_eq!(*deal_id, 2);
                assert!(error.contains("no prediction returned"));
            }
            other => panic!("expected malformed outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn authentication_failure_is_a_whole_call_failure() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .mount(&mock_server)
            .await;

        let client = test_client(mock_server.uri(), 1);
        let result = client.forecast_batch(&[context(1)]).await;

        assert!(matches!(result, Err(DealflowError::Auth(_))));
    }

    #[tokio::test]
    async fn rate_limit_reads_retry_after_header() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("Retry-After", "7")
                    .set_body_string("slow down"),
            )
            .mount(&mock_server)
            .await;

        let client = test_client(mock_server.uri(), 1);
        let result = client.predict(&[context(1)]).await;

        assert!(matches!(result, Err(OracleError::RateLimit(7))));
    }

    #[tokio::test]
    async fn rate_limited_call_retries_then_succeeds() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("Retry-After", "1")
                    .set_body_string("slow down"),
            )
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        let content = r#"{
            "predictions": [
                {"deal_id": 1, "invoice_date": "2026-09-15", "payment_date": null,
                 "confidence": 0.6, "assumptions": [], "missing_fields": [], "reasoning": "ok"}
            ]
        }"#;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(content)))
            .mount(&mock_server)
            .await;

        let client = test_client(mock_server.uri(), 2);
        let outcomes = client.forecast_batch(&[context(1)]).await.expect("should recover");

        assert!(matches!(outcomes[0], OracleOutcome::Resolved(_)));
        let received = mock_server.received_requests().await.expect("requests recorded");
        assert_eq!(received.len(), 2);
    }

    #[tokio::test]
    async fn unparseable_envelope_fails_the_whole_call() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(completion_body("not valid json")),
            )
            .mount(&mock_server)
            .await;

        let client = test_client(mock_server.uri(), 1);
        let result = client.forecast_batch(&[context(1)]).await;

        match result {
            Err(DealflowError::Oracle(msg)) => assert!(msg.contains("envelope")),
            other => panic!("expected oracle error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_batch_skips_the_network() {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("http client");
        let client = OracleClient::new(&OracleConfig::default(), http_client);

        let outcomes = client.forecast_batch(&[]).await.expect("should handle empty");
        assert!(outcomes.is_empty());
    }
}
