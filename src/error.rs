//! Error types for playlist-dl
//!
//! This module separates the two levels at which things go wrong:
//! - Batch-level errors ([`Error`]) abort a run or reject a configuration
//! - Per-attempt fetch errors ([`FetchError`]) are retried and, once the attempt
//!   budget is spent, recorded in the report instead of propagated

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for playlist-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for playlist-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "batch.concurrency_limit")
        key: Option<String>,
    },

    /// A single raw reference matched none of the recognized shapes
    ///
    /// The resolver skips the offending entry; this never aborts a batch on its own.
    #[error("invalid reference '{reference}': {reason}")]
    InvalidReference {
        /// The raw reference as supplied
        reference: String,
        /// Why the reference was rejected
        reason: String,
    },

    /// The collection itself could not be enumerated
    ///
    /// Aborts the whole batch before any fetch starts.
    #[error("collection '{collection}' unavailable: {reason}")]
    CollectionUnavailable {
        /// The collection reference that failed to resolve
        collection: String,
        /// Lister error message, or a note that the collection came back empty
        reason: String,
    },

    /// A report was finalized before every submitted item completed
    #[error("cannot finalize report: {completed} of {total} items completed")]
    PrematureFinalize {
        /// Outcomes recorded so far
        completed: usize,
        /// Items submitted to the batch
        total: usize,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// External tool execution failed (yt-dlp, ffmpeg)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// A required binary or resource was not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a [`Error::Config`] naming the offending key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Whether this error aborted the batch before any item was fetched
    pub fn is_batch_abort(&self) -> bool {
        matches!(
            self,
            Error::CollectionUnavailable { .. } | Error::Config { .. }
        )
    }
}

/// Failure of a single fetch attempt
///
/// Returned by [`Fetcher`](crate::fetcher::Fetcher) implementations. The pool retries
/// these and records the last message once the attempt budget is exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct FetchError {
    /// Human-readable description supplied by the fetch service
    pub message: String,
}

impl FetchError {
    /// Create a fetch error from any displayable message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<Error> for FetchError {
    fn from(err: Error) -> Self {
        FetchError::new(err.to_string())
    }
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        FetchError::new(err.to_string())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_reference_message_names_the_reference() {
        let err = Error::InvalidReference {
            reference: "ftp://nowhere".to_string(),
            reason: "no rule matched".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid reference 'ftp://nowhere': no rule matched"
        );
        assert!(!err.is_batch_abort());
    }

    #[test]
    fn collection_unavailable_aborts_batch() {
        let err = Error::CollectionUnavailable {
            collection: "PL123".to_string(),
            reason: "lister exited with status 1".to_string(),
        };
        assert!(err.is_batch_abort());
        assert!(err.to_string().contains("PL123"));
    }

    #[test]
    fn premature_finalize_reports_progress() {
        let err = Error::PrematureFinalize {
            completed: 2,
            total: 5,
        };
        assert_eq!(
            err.to_string(),
            "cannot finalize report: 2 of 5 items completed"
        );
    }

    #[test]
    fn config_helper_sets_key() {
        match Error::config("batch.concurrency_limit", "must be at least 1") {
            Error::Config { message, key } => {
                assert_eq!(message, "must be at least 1");
                assert_eq!(key.as_deref(), Some("batch.concurrency_limit"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn fetch_error_from_io_keeps_message() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "yt-dlp missing");
        let err = FetchError::from(io);
        assert_eq!(err.message, "yt-dlp missing");
    }
}
