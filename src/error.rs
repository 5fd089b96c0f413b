//! Error types for the Tollgate engine.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Which backing store an operation was talking to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// The shared sorted-set counter store.
    Counter,
    /// The durable usage and billing ledger.
    Ledger,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Counter => write!(f, "counter"),
            StoreKind::Ledger => write!(f, "ledger"),
        }
    }
}

/// Main error type for Tollgate operations.
///
/// A denied request is not an error: see [`crate::ratelimit::Decision`].
#[derive(Error, Debug)]
pub enum TollgateError {
    /// A store was unreachable, failed, or did not answer in time
    #[error("{store} store unavailable: {reason}")]
    StoreUnavailable { store: StoreKind, reason: String },

    /// Billing period with start after end
    #[error("invalid billing period: start {start} is after end {end}")]
    InvalidPeriod { start: i64, end: i64 },

    /// Negative unit price
    #[error("invalid unit price: {0}")]
    InvalidPrice(rust_decimal::Decimal),

    /// A usage count or amount does not fit its representation
    #[error("arithmetic overflow: {0}")]
    Overflow(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TollgateError {
    /// Shorthand for a [`TollgateError::StoreUnavailable`].
    pub fn unavailable(store: StoreKind, reason: impl fmt::Display) -> Self {
        TollgateError::StoreUnavailable {
            store,
            reason: reason.to_string(),
        }
    }

    /// Whether this error came from an unavailable store.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, TollgateError::StoreUnavailable { .. })
    }
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;

/// Run a store round-trip under a deadline.
///
/// An elapsed deadline is reported as [`TollgateError::StoreUnavailable`] and
/// is never retried here.
pub async fn bounded<T, F>(store: StoreKind, timeout: Duration, op: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(TollgateError::unavailable(
            store,
            format!("{} timed out after {}ms", op, timeout.as_millis()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_unavailable_display() {
        let err = TollgateError::unavailable(StoreKind::Counter, "connection refused");
        assert_eq!(err.to_string(), "counter store unavailable: connection refused");
        assert!(err.is_store_unavailable());
    }

    #[test]
    fn test_invalid_period_display() {
        let err = TollgateError::InvalidPeriod { start: 100, end: 50 };
        assert_eq!(
            err.to_string(),
            "invalid billing period: start 100 is after end 50"
        );
        assert!(!err.is_store_unavailable());
    }

    #[tokio::test]
    async fn test_bounded_passes_through_result() {
        let value = bounded(StoreKind::Ledger, Duration::from_secs(1), "sum", async {
            Ok::<_, TollgateError>(7u64)
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out() {
        let result: Result<()> = bounded(
            StoreKind::Counter,
            Duration::from_millis(50),
            "ZCOUNT",
            async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            },
        )
        .await;

        match result {
            Err(TollgateError::StoreUnavailable { store, reason }) => {
                assert_eq!(store, StoreKind::Counter);
                assert!(reason.contains("ZCOUNT timed out after 50ms"));
            }
            other => panic!("expected StoreUnavailable, got {:?}", other),
        }
    }
}
