//! Conversions from external infrastructure errors into domain errors.

use dealflow_domain::DealflowError;
use reqwest::StatusCode;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub DealflowError);

impl From<InfraError> for DealflowError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<DealflowError> for InfraError {
    fn from(value: DealflowError) -> Self {
        Self(value)
    }
}

impl From<rusqlite::Error> for InfraError {
    fn from(value: rusqlite::Error) -> Self {
        Self(sql_to_domain(value))
    }
}

impl From<r2d2::Error> for InfraError {
    fn from(value: r2d2::Error) -> Self {
        Self(DealflowError::Database(format!("connection pool checkout failed: {value}")))
    }
}

impl From<reqwest::Error> for InfraError {
    fn from(value: reqwest::Error) -> Self {
        Self(http_to_domain(value))
    }
}

fn sql_to_domain(err: rusqlite::Error) -> DealflowError {
    use rusqlite::Error as RE;

    match err {
        RE::SqliteFailure(failure, message) => sqlite_failure(failure, message.unwrap_or_default()),
        RE::QueryReturnedNoRows => DealflowError::NotFound("no rows returned by query".into()),
        RE::FromSqlConversionFailure(_, _, cause) => {
            DealflowError::Database(format!("stored value does not convert: {cause}"))
        }
        RE::InvalidColumnType(_, name, ty) => {
            DealflowError::Database(format!("column '{name}' has unexpected type {ty}"))
        }
        RE::InvalidPath(path) => {
            DealflowError::Database(format!("invalid database path: {}", path.to_string_lossy()))
        }
        other => DealflowError::Database(other.to_string()),
    }
}

fn sqlite_failure(failure: rusqlite::ffi::Error, message: String) -> DealflowError {
    use rusqlite::ffi::ErrorCode;

    let text = match (failure.code, failure.extended_code) {
        (ErrorCode::DatabaseBusy, _) => "database is busy".to_string(),
        (ErrorCode::DatabaseLocked, _) => "database is locked".to_string(),
        // 2067 = SQLITE_CONSTRAINT_UNIQUE, 787 = SQLITE_CONSTRAINT_FOREIGNKEY
        (ErrorCode::ConstraintViolation, 2067) => "unique constraint violation".to_string(),
        (ErrorCode::ConstraintViolation, 787) => "foreign key constraint violation".to_string(),
        (other, extended) => format!("sqlite failure {other:?} (code {extended}): {message}"),
    };
    DealflowError::Database(text)
}

fn http_to_domain(err: reqwest::Error) -> DealflowError {
    if err.is_timeout() {
        return DealflowError::Network("HTTP request timed out".into());
    }
    if err.is_connect() {
        return DealflowError::Network("HTTP connection failure".into());
    }
    if err.is_decode() {
        return DealflowError::InvalidInput(format!("HTTP body decode failed: {err}"));
    }
    match err.status() {
        Some(status) => status_to_domain(status),
        None => DealflowError::Network(err.to_string()),
    }
}

fn status_to_domain(status: StatusCode) -> DealflowError {
    let label = format!(
        "HTTP {} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("unknown status"),
    );
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DealflowError::Auth(label),
        StatusCode::NOT_FOUND => DealflowError::NotFound(label),
        StatusCode::TOO_MANY_REQUESTS => DealflowError::Network(label),
        s if s.is_client_error() => DealflowError::InvalidInput(label),
        _ => DealflowError::Network(label),
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Client;
    use rusqlite::ffi::{Error as FfiError, ErrorCode};
    use rusqlite::Error as SqlError;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn mapped(err: impl Into<InfraError>) -> DealflowError {
        err.into().into()
    }

    async fn reqwest_error_for(status: u16) -> reqwest::Error {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;

        let client = Client::builder().no_proxy().build().unwrap();
        client.get(server.uri()).send().await.unwrap().error_for_status().unwrap_err()
    }

    #[test]
    fn busy_sqlite_failures_stay_database_errors() {
        let err = SqlError::SqliteFailure(
            FfiError { code: ErrorCode::DatabaseBusy, extended_code: 5 },
            Some("database is locked".into()),
        );

        match mapped(err) {
            DealflowError::Database(msg) => {
                assert!(msg.contains("busy") || msg.contains("locked"));
            }
            other => panic!("expected database error, got {:?}", other),
        }
    }

    #[test]
    fn duplicate_rows_name_the_unique_constraint() {
        let err = SqlError::SqliteFailure(
            FfiError { code: ErrorCode::ConstraintViolation, extended_code: 2067 },
            None,
        );

        match mapped(err) {
            DealflowError::Database(msg) => assert!(msg.contains("unique")),
            other => panic!("expected database error, got {:?}", other),
        }
    }

    #[test]
    fn empty_query_results_map_to_not_found() {
        assert!(matches!(mapped(SqlError::QueryReturnedNoRows), DealflowError::NotFound(_)));
    }

    #[tokio::test]
    async fn rejected_credentials_map_to_auth_errors() {
        let err = reqwest_error_for(401).await;
        match mapped(err) {
            DealflowError::Auth(msg) => assert!(msg.contains("401")),
            other => panic!("expected auth error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn throttling_maps_to_a_network_error() {
        let err = reqwest_error_for(429).await;
        assert!(matches!(mapped(err), DealflowError::Network(_)));
    }

    #[tokio::test]
    async fn other_client_errors_map_to_invalid_input() {
        let err = reqwest_error_for(422).await;
        match mapped(err) {
            DealflowError::InvalidInput(msg) => assert!(msg.contains("422")),
            other => panic!("expected invalid input, got {:?}", other),
        }
    }
}
