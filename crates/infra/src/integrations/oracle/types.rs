//! Oracle wire types
//!
//! Chat-completion request/response shapes plus the per-deal prediction
//! element the model is asked to return. Elements are deserialized one by one
//! so a malformed element degrades a single deal, not the batch.

use chrono::NaiveDate;
use dealflow_domain::{DealPrediction, DealflowError, PredictionSource};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Oracle API error types
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// Network-level error (connection failed, timeout, exhausted retries)
    #[error("Network error: {0}")]
    Network(String),

    /// The API returned an error response
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Rate limit exceeded: retry after the given delay
    #[error("Rate limit exceeded (retry after {0}s)")]
    RateLimit(u64),

    /// Authentication failed (invalid API key)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Response body does not match the contracted schema
    #[error("Invalid response schema: {0}")]
    InvalidSchema(String),
}

impl From<OracleError> for DealflowError {
    fn from(err: OracleError) -> Self {
        match err {
            OracleError::Authentication(msg) => DealflowError::Auth(msg),
            other => DealflowError::Oracle(other.to_string()),
        }
    }
}

/// Internal types for the chat completions API
#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ResponseFormat {
    #[serde(rename = "type")]
    pub format_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<JsonSchema>,
}

/// JSON schema wrapper used when `response_format = "json_schema"`
#[derive(Debug, Serialize)]
pub(crate) struct JsonSchema {
    pub name: String,
    pub schema: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

/// Response from the chat completions API
#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletionResponse {
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Choice {
    pub message: Message,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Message {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Usage {
    pub total_tokens: i32,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
}

/// Envelope the model is contracted to return
///
/// Elements stay as raw values here; each is parsed independently.
#[derive(Debug, Deserialize)]
pub(crate) struct PredictionsEnvelope {
    pub predictions: Vec<Value>,
}

/// One prediction element as the model emits it
#[derive(Debug, Deserialize)]
pub(crate) struct RawPrediction {
    pub deal_id: i64,
    pub invoice_date: Option<String>,
    pub payment_date: Option<String>,
    pub confidence: f32,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub missing_fields: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

impl RawPrediction {
    /// Convert to the domain prediction, rejecting structural violations
    ///
    /// A payment date without an invoice date is meaningless and is dropped
    /// rather than rejected; the downstream validator flags date ordering.
    pub(crate) fn into_prediction(self) -> Result<DealPrediction, String> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("confidence {} outside [0, 1]", self.confidence));
        }

        let invoice_date = self.invoice_date.as_deref().map(parse_iso_date).transpose()?;
        let payment_date = match invoice_date {
            Some(_) => self.payment_date.as_deref().map(parse_iso_date).transpose()?,
            None => None,
        };

        Ok(DealPrediction {
            deal_id: self.deal_id,
            invoice_date,
            payment_date,
            confidence: self.confidence,
            assumptions: self.assumptions,
            missing_fields: self.missing_fields,
            reasoning: self.reasoning,
            source: PredictionSource::Oracle,
        })
    }
}

fn parse_iso_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| format!("invalid date {raw:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_prediction_with_nulls() {
        let json = r#"{
            "deal_id": 42,
            "invoice_date": null,
            "payment_date": null,
            "confidence": 0.3,
            "assumptions": ["stage duration table"],
            "missing_fields": ["value"],
            "reasoning": "early stage"
        }"#;

        let raw: RawPrediction = serde_json::from_str(json).expect("should deserialize");
        let prediction = raw.into_prediction().expect("should convert");

        assert_eq!(prediction.deal_id, 42);
        assert!(prediction.invoice_date.is_none());
        assert_eq!(prediction.missing_fields, vec!["value".to_string()]);
        assert_eq!(prediction.source, PredictionSource::Oracle);
    }

    #[test]
    fn parses_dates_and_keeps_order_fields() {
        let json = r#"{
            "deal_id": 7,
            "invoice_date": "2026-09-15",
            "payment_date": "2026-10-15",
            "confidence": 0.85,
            "assumptions": [],
            "missing_fields": [],
            "reasoning": "contract signed"
        }"#;

        let prediction = serde_json::from_str::<RawPrediction>(json)
            .expect("should deserialize")
            .into_prediction()
            .expect("should convert");

        assert_eq!(prediction.invoice_date, NaiveDate::from_ymd_opt(2026, 9, 15));
        assert_eq!(prediction.payment_date, NaiveDate::from_ymd_opt(2026, 10, 15));
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let raw = RawPrediction {
            deal_id: 1,
            invoice_date: None,
            payment_date: None,
            confidence: 1.4,
            assumptions: vec![],
            missing_fields: vec![],
            reasoning: String::new(),
        };

        let err = raw.into_prediction().unwrap_err();
        assert!(err.contains("outside [0, 1]"));
    }

    #[test]
    fn rejects_unparseable_dates() {
        let raw = RawPrediction {
            deal_id: 1,
            invoice_date: Some("Sept 15th".to_string()),
            payment_date: None,
            confidence: 0.8,
            assumptions: vec![],
            missing_fields: vec![],
            reasoning: String::new(),
        };

        let err = raw.into_prediction().unwrap_err();
        assert!(err.contains("invalid date"));
    }

    #[test]
    fn drops_payment_without_invoice() {
        let raw = RawPrediction {
            deal_id: 1,
            invoice_date: None,
            payment_date: Some("2026-10-15".to_string()),
            confidence: 0.8,
            assumptions: vec![],
            missing_fields: vec![],
            reasoning: String::new(),
        };

        let prediction = raw.into_prediction().expect("should convert");
        assert!(prediction.payment_date.is_none());
    }

    #[test]
    fn auth_errors_map_to_the_auth_domain_variant() {
        let err: DealflowError = OracleError::Authentication("bad key".to_string()).into();
        assert!(matches!(err, DealflowError::Auth(_)));

        let err: DealflowError = OracleError::RateLimit(60).into();
        assert!(matches!(err, DealflowError::Oracle(_)));
    }
}
