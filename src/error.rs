/// Unified error types for the identity cache responder
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for cache requests
#[derive(Error, Debug)]
pub enum LookupError {
    /// Malformed key or unparseable filter; no domain is visited
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Explicit domain name is not configured
    #[error("Domain not found: {0}")]
    DomainNotFound(String),

    /// Backend could not be reached or answered garbage
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Every candidate domain answered with nothing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Local store faults
    #[error("Store error: {0}")]
    Store(String),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LookupError {
    /// `NotFound` is a normal terminal outcome, not a failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, LookupError::NotFound(_))
    }

    /// Short error code used in responses and metrics labels
    pub fn code(&self) -> &'static str {
        match self {
            LookupError::InvalidInput(_) => "InvalidInput",
            LookupError::DomainNotFound(_) => "DomainNotFound",
            LookupError::BackendUnavailable(_) => "BackendUnavailable",
            LookupError::NotFound(_) => "NotFound",
            LookupError::Store(_) | LookupError::Database(_) => "StoreError",
            LookupError::Config(_) => "ConfigError",
            LookupError::Io(_) | LookupError::Internal(_) => "InternalError",
        }
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for LookupError {
    fn into_response(self) -> Response {
        let status = match self {
            LookupError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            LookupError::DomainNotFound(_) | LookupError::NotFound(_) => StatusCode::NOT_FOUND,
            LookupError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = match self {
            LookupError::Store(_)
            | LookupError::Database(_)
            | LookupError::Io(_)
            | LookupError::Internal(_)
            | LookupError::Config(_) => "Internal server error".to_string(), // Don't leak details
            _ => self.to_string(),
        };

        let body = Json(ErrorResponse {
            error: self.code().to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for lookup operations
pub type LookupResult<T> = Result<T, LookupError>;
