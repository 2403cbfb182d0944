//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;
use crate::timespec::TimeSpecError;

// == Cache Error Enum ==
/// Unified error type for the cache engine and its diagnostics API.
///
/// Cloneable so a single fetch outcome can be handed to every caller
/// waiting on the same in-flight operation.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Key not found in cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Malformed or unrecognized duration
    #[error("Invalid duration: {0}")]
    InvalidDuration(#[from] TimeSpecError),

    /// Estimated item size exceeds the per-item ceiling
    #[error("Item too large: {size} bytes exceeds limit of {max} bytes")]
    ItemTooLarge { size: usize, max: usize },

    /// Key pattern is not a valid regular expression
    #[error("Invalid key pattern: {0}")]
    InvalidPattern(String),

    /// The external fetch operation failed
    #[error("Fetch failed: {0}")]
    FetchFailed(Arc<anyhow::Error>),

    /// The fetch task went away before reporting a result
    #[error("Fetch cancelled before completion")]
    FetchCancelled,
}

impl CacheError {
    /// Wraps a caller-supplied fetch failure.
    pub fn fetch_failed(err: impl Into<anyhow::Error>) -> Self {
        CacheError::FetchFailed(Arc::new(err.into()))
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_)
            | CacheError::InvalidDuration(_)
            | CacheError::InvalidPattern(_) => StatusCode::BAD_REQUEST,
            CacheError::ItemTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            CacheError::FetchFailed(_) | CacheError::FetchCancelled => StatusCode::BAD_GATEWAY,
        };

        let body = Json(ErrorResponse::new(self.to_string()));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;
