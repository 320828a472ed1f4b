//! Error types used throughout the engine

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for Dealflow
#[derive(Error, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum DealflowError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Data integrity violation: {0}")]
    Integrity(String),

    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Dealflow operations
pub type Result<T> = std::result::Result<T, DealflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_serialize_with_type_tag() {
        let err = DealflowError::Integrity("stage 9 references unknown pipeline 4".to_string());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "Integrity");
        assert_eq!(json["message"], "stage 9 references unknown pipeline 4");
    }

    #[test]
    fn errors_render_human_readable_messages() {
        let err = DealflowError::NotFound("deal 42".to_string());
        assert_eq!(err.to_string(), "Not found: deal 42");
    }
}
