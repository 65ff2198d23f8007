//! Error types for the SQL cache
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rusqlite::ErrorCode;
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache store and its HTTP surface.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Absolute expiration supplied is not strictly in the future
    #[error("absolute expiration must be in the future")]
    InvalidExpiration,

    /// Neither sliding nor absolute expiration supplied
    #[error("either absolute or sliding expiration must be provided")]
    MissingExpirationPolicy,

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Key not found (HTTP layer only; the store reports absence as `None`)
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Connection to the row store could not be obtained
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Concurrent insert race on a new key that the retry could not resolve
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Statement failed in the row store
    #[error("Database error: {0}")]
    Database(#[source] rusqlite::Error),

    /// Persisted data could not be decoded
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Configuration rejected at startup
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for CacheError {
    /// Busy, locked, unopenable and I/O failures mean the store cannot be
    /// reached right now; everything else is a statement failure.
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure,
            ) => CacheError::StoreUnavailable(err.to_string()),
            _ => CacheError::Database(err),
        }
    }
}

impl From<r2d2::Error> for CacheError {
    fn from(err: r2d2::Error) -> Self {
        CacheError::StoreUnavailable(err.to_string())
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::InvalidExpiration
            | CacheError::MissingExpirationPolicy
            | CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Conflict(_) => StatusCode::CONFLICT,
            CacheError::Database(_)
            | CacheError::InvalidData(_)
            | CacheError::InvalidConfig(_)
            | CacheError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiration_messages_are_stable() {
        assert_eq!(
            CacheError::InvalidExpiration.to_string(),
            "absolute expiration must be in the future"
        );
        assert_eq!(
            CacheError::MissingExpirationPolicy.to_string(),
            "either absolute or sliding expiration must be provided"
        );
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (CacheError::InvalidExpiration, StatusCode::BAD_REQUEST),
            (CacheError::MissingExpirationPolicy, StatusCode::BAD_REQUEST),
            (CacheError::NotFound("k".into()), StatusCode::NOT_FOUND),
            (
                CacheError::StoreUnavailable("down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (CacheError::Conflict("k".into()), StatusCode::CONFLICT),
            (
                CacheError::Internal("boom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    fn sqlite_failure(code: std::os::raw::c_int) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None)
    }

    #[test]
    fn test_transport_failures_map_to_unavailable() {
        for code in [
            rusqlite::ffi::SQLITE_BUSY,
            rusqlite::ffi::SQLITE_LOCKED,
            rusqlite::ffi::SQLITE_CANTOPEN,
            rusqlite::ffi::SQLITE_IOERR,
        ] {
            let err = CacheError::from(sqlite_failure(code));
            assert!(matches!(err, CacheError::StoreUnavailable(_)), "code {code}");
            assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
        }
    }

    #[test]
    fn test_statement_failures_stay_database_errors() {
        let err = CacheError::from(sqlite_failure(rusqlite::ffi::SQLITE_CONSTRAINT));
        assert!(matches!(err, CacheError::Database(_)));

        let err = CacheError::from(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(err, CacheError::Database(_)));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_unopenable_database_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no_such_dir").join("cache.db");

        let err = CacheError::from(rusqlite::Connection::open(missing).unwrap_err());
        assert!(matches!(err, CacheError::StoreUnavailable(_)));
    }
}
