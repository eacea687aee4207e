//! Structured error types for the edge graph core
//!
//! The core returns plain typed errors; the HTTP status mapping lives only
//! in the `IntoResponse` impl so the dispatcher stays a thin shell.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured error response for API clients
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Additional error context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Error taxonomy of the edge graph core
#[derive(Debug)]
pub enum EdgeError {
    // Bad caller input (400) - surfaced immediately, never retried
    Validation { field: String, reason: String },

    // Store transaction/update failure (502) - no internal retries; retry,
    // if any, is the store client's concern
    ExternalService(String),

    // Downstream dependency known bad (503) - fail fast
    CircuitOpen { service: String, retry_in_secs: u64 },

    // Generic wrapper for everything else (500)
    Internal(anyhow::Error),
}

impl EdgeError {
    /// Create a validation error for a named field
    pub fn validation(field: &str, reason: impl fmt::Display) -> Self {
        Self::Validation {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Get error code for client identification
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::ExternalService(_) => "EXTERNAL_SERVICE_ERROR",
            Self::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::ExternalService(_) => StatusCode::BAD_GATEWAY,
            Self::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get detailed error message
    pub fn message(&self) -> String {
        match self {
            Self::Validation { field, reason } => {
                format!("Invalid input for field '{field}': {reason}")
            }
            Self::ExternalService(msg) => format!("External service error: {msg}"),
            Self::CircuitOpen {
                service,
                retry_in_secs,
            } => {
                format!("Circuit breaker for '{service}' is open, retry in {retry_in_secs}s")
            }
            Self::Internal(err) => format!("Internal error: {err}"),
        }
    }

    /// Convert to structured error response
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.code().to_string(),
            message: self.message(),
            details: None,
        }
    }
}

impl fmt::Display for EdgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for EdgeError {}

impl From<anyhow::Error> for EdgeError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

/// Axum IntoResponse implementation for proper HTTP responses
impl IntoResponse for EdgeError {
    fn into_response(self) -> Response {
        crate::metrics::ERRORS_TOTAL
            .with_label_values(&[self.code()])
            .inc();

        let status = self.status_code();
        let body = self.to_response();

        (status, Json(body)).into_response()
    }
}

/// Type alias for Results using EdgeError
pub type Result<T> = std::result::Result<T, EdgeError>;
