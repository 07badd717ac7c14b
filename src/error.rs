//! Error taxonomy shared by every layer.
//!
//! Operations report failures through [`QueryError`]; the variant itself carries
//! the typed [`ErrorKind`] that the circuit breaker's adaptive threshold and
//! the retry policy inspect. Nothing downstream parses error messages.

use std::time::Duration;
use thiserror::Error;

/// Result alias used across the crate.
pub type QueryResult<T> = Result<T, QueryError>;

/// Coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Connection,
    Transport,
    Cancelled,
    Configuration,
    CircuitOpen,
}

/// Failure of a wrapped operation or of the resilience layer itself.
///
/// Cloneable so a single deduplicated result can be fanned out to every
/// attached caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    /// The attempt did not finish within its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The dependency could not be reached at all.
    #[error("connection error: {0}")]
    Connection(String),

    /// Generic operation failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The caller lost interest, or a newer operation superseded this one.
    #[error("operation cancelled")]
    Cancelled,

    /// The host wired the system incorrectly.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal short-circuit signal; resolved by the fallback chain.
    #[error("circuit '{circuit}' is open")]
    CircuitOpen { circuit: String },

    /// Every retry attempt failed; wraps the last error.
    #[error("failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<QueryError>,
    },
}

impl QueryError {
    pub fn connection(msg: impl Into<String>) -> Self {
        QueryError::Connection(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        QueryError::Transport(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        QueryError::Configuration(msg.into())
    }

    /// Kind of the underlying failure, looking through retry annotations.
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::Timeout(_) => ErrorKind::Timeout,
            QueryError::Connection(_) => ErrorKind::Connection,
            QueryError::Transport(_) => ErrorKind::Transport,
            QueryError::Cancelled => ErrorKind::Cancelled,
            QueryError::Configuration(_) => ErrorKind::Configuration,
            QueryError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            QueryError::RetriesExhausted { source, .. } => source.kind(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }

    /// Whether a retry could plausibly change the outcome.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::Cancelled | ErrorKind::Configuration | ErrorKind::CircuitOpen
        )
    }

    /// Number of attempts recorded on the error (1 when not retried).
    pub fn attempts(&self) -> u32 {
        match self {
            QueryError::RetriesExhausted { attempts, .. } => *attempts,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_looks_through_retries() {
        let err = QueryError::RetriesExhausted {
            attempts: 3,
            source: Box::new(QueryError::Timeout(Duration::from_millis(50))),
        };
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.attempts(), 3);
        assert!(err.to_string().contains("3 attempts"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(QueryError::transport("500").is_retryable());
        assert!(QueryError::connection("refused").is_retryable());
        assert!(!QueryError::Cancelled.is_retryable());
        assert!(!QueryError::CircuitOpen { circuit: "db".into() }.is_retryable());
        assert!(!QueryError::configuration("bad").is_retryable());
    }
}
