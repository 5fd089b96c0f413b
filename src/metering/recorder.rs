//! Usage recording for admitted calls.

use std::sync::Arc;
use tracing::debug;

use super::ledger::{UsageEvent, UsageLedger};
use crate::error::Result;
use crate::identity::Identity;

/// Appends one usage event per admitted call.
///
/// Callers must only record after the limiter admitted the call; this is not
/// checked here. A failed append is not retried, so recording is
/// at-most-once.
#[derive(Clone)]
pub struct UsageRecorder {
    ledger: Arc<dyn UsageLedger>,
}

impl UsageRecorder {
    pub fn new(ledger: Arc<dyn UsageLedger>) -> Self {
        Self { ledger }
    }

    /// Record one call by `identity` at `now`.
    pub async fn record(&self, identity: &Identity, now: i64) -> Result<()> {
        self.ledger.append(&UsageEvent::single(identity, now)).await?;
        debug!(identity = %identity, at = now, "Usage recorded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metering::{InMemoryLedger, UsageRange};

    #[tokio::test]
    async fn test_record_appends_single_count() {
        let ledger = Arc::new(InMemoryLedger::new());
        let recorder = UsageRecorder::new(ledger.clone());
        let id = Identity::from("u1");

        recorder.record(&id, 10).await.unwrap();
        recorder.record(&id, 10).await.unwrap();

        assert_eq!(ledger.event_count(), 2);
        assert_eq!(ledger.sum(&id, UsageRange::all()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_record_failure_is_reported() {
        let ledger = Arc::new(InMemoryLedger::new());
        let recorder = UsageRecorder::new(ledger.clone());
        ledger.set_offline(true);

        let result = recorder.record(&Identity::from("u1"), 10).await;
        assert!(result.unwrap_err().is_store_unavailable());
    }
}
