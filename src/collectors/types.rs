//! Common types used across imagery collectors.

use thiserror::Error;

/// Errors that can occur during collection operations.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    /// Failed to parse a catalog or response body.
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// API rate limit exceeded.
    #[error("Rate limited: retry after {retry_after:?} seconds")]
    RateLimited {
        /// Optional retry-after duration in seconds.
        retry_after: Option<u64>,
    },

    /// A URL could not be mapped to a local path.
    #[error("Invalid image URL: {0}")]
    InvalidUrl(String),

    /// Downloaded bytes could not be decoded or re-encoded.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// IO operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV/TSV parsing failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl CollectorError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CollectorError::HttpError(_) | CollectorError::RateLimited { .. }
        )
    }
}

/// Result type alias for collector operations.
pub type CollectorResult<T> = Result<T, CollectorError>;
