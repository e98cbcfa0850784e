use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Standard error response body.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Human-readable error message
    pub error: String,
}

/// Error taxonomy for the risk engine.
///
/// `WeatherUnavailable` and `NoCandidates` are *not* represented here: a
/// failed weather fetch degrades to a neutral kernel weight internally
/// (never escapes to the HTTP layer), and a route with zero candidate
/// accidents is a normal zero-confidence `RiskPrediction`, not an error.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// C2 connectivity/timeout failure (§7 taxonomy: "connectivity/timeout
    /// ⇒ fails with `StorageUnavailable`"), distinct from other database
    /// errors — constructed via `classify_storage_error` rather than
    /// `#[from]`, since most `sqlx::Error`s are ordinary query failures.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

/// Classifies a `sqlx::Error` from the spatial store (C2) into either a
/// `StorageUnavailable` (connectivity/timeout — the database itself is
/// unreachable or too slow to respond) or a generic `DatabaseError`
/// (a query against a reachable database still failed, e.g. bad SQL).
pub fn classify_storage_error(err: sqlx::Error) -> AppError {
    let is_connectivity = matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    );
    if is_connectivity {
        AppError::StorageUnavailable(err.to_string())
    } else {
        AppError::DatabaseError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::StorageUnavailable(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::DatabaseError(err) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal database error".to_string(),
                )
            }
        };

        (status, axum::Json(ErrorResponse { error: message })).into_response()
    }
}
