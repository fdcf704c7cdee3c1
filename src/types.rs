//! Shared error and result types for Atrio

use hyper::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, AtrioError>;

/// Error taxonomy for the portal backend
///
/// Mutation-layer errors map onto HTTP statuses at the route boundary.
/// Audit-write failures are deliberately absent: the recorder swallows them.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum AtrioError {
    /// No resolvable caller identity
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Caller authenticated but lacks the required privilege
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Input outside the allowed set, raised before any write
    #[error("validation error: {0}")]
    Validation(String),

    /// Referenced entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Underlying relational operation failed
    #[error("store error: {0}")]
    Store(String),

    /// Payments provider or adapter failure
    #[error("payments error: {0}")]
    Payments(String),

    /// Invalid or incomplete configuration
    #[error("config error: {0}")]
    Config(String),

    /// Internal failure (task join, serialization edge cases)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AtrioError {
    /// HTTP status for this error at the route boundary
    pub fn status_code(&self) -> StatusCode {
        match self {
            AtrioError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AtrioError::Forbidden(_) => StatusCode::FORBIDDEN,
            AtrioError::Validation(_) => StatusCode::BAD_REQUEST,
            AtrioError::NotFound(_) => StatusCode::NOT_FOUND,
            AtrioError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AtrioError::Payments(_) => StatusCode::BAD_GATEWAY,
            AtrioError::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
            AtrioError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for API error bodies
    pub fn code(&self) -> &'static str {
        match self {
            AtrioError::Unauthorized(_) => "UNAUTHORIZED",
            AtrioError::Forbidden(_) => "FORBIDDEN",
            AtrioError::Validation(_) => "VALIDATION_ERROR",
            AtrioError::NotFound(_) => "NOT_FOUND",
            AtrioError::Store(_) => "STORE_ERROR",
            AtrioError::Payments(_) => "PAYMENTS_ERROR",
            AtrioError::Config(_) => "CONFIG_ERROR",
            AtrioError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<rusqlite::Error> for AtrioError {
    fn from(err: rusqlite::Error) -> Self {
        AtrioError::Store(err.to_string())
    }
}

impl From<r2d2::Error> for AtrioError {
    fn from(err: r2d2::Error) -> Self {
        AtrioError::Store(format!("connection pool: {err}"))
    }
}

impl From<std::io::Error> for AtrioError {
    fn from(err: std::io::Error) -> Self {
        AtrioError::Internal(format!("io: {err}"))
    }
}

impl From<tokio::task::JoinError> for AtrioError {
    fn from(err: tokio::task::JoinError) -> Self {
        AtrioError::Internal(format!("blocked task failed: {err}"))
    }
}

impl From<serde_json::Error> for AtrioError {
    fn from(err: serde_json::Error) -> Self {
        AtrioError::Internal(format!("serialization: {err}"))
    }
}
