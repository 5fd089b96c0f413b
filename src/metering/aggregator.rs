//! Usage aggregation over arbitrary time ranges.

use std::sync::Arc;
use tracing::trace;

use super::ledger::{UsageLedger, UsageRange};
use crate::error::Result;
use crate::identity::Identity;

/// Sums recorded usage. Pure read.
#[derive(Clone)]
pub struct UsageAggregator {
    ledger: Arc<dyn UsageLedger>,
}

impl UsageAggregator {
    pub fn new(ledger: Arc<dyn UsageLedger>) -> Self {
        Self { ledger }
    }

    /// Total usage of `identity` with `occurred_at` in `[period_start, period_end]`.
    ///
    /// Either bound may be omitted. An identity without history, or an
    /// inverted range, totals zero.
    pub async fn total(
        &self,
        identity: &Identity,
        period_start: Option<i64>,
        period_end: Option<i64>,
    ) -> Result<u64> {
        let range = UsageRange::new(period_start, period_end);
        if range.is_empty() {
            return Ok(0);
        }

        let total = self.ledger.sum(identity, range).await?;
        trace!(identity = %identity, ?period_start, ?period_end, total = total, "Usage total");
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metering::{InMemoryLedger, UsageEvent};

    async fn seeded() -> (Arc<InMemoryLedger>, UsageAggregator) {
        let ledger = Arc::new(InMemoryLedger::new());
        let id = Identity::from("u1");
        for t in [0, 50, 100, 150] {
            ledger.append(&UsageEvent::single(&id, t)).await.unwrap();
        }
        ledger
            .append(&UsageEvent {
                identity: id.clone(),
                occurred_at: 75,
                count: 5,
            })
            .await
            .unwrap();
        let aggregator = UsageAggregator::new(ledger.clone());
        (ledger, aggregator)
    }

    #[tokio::test]
    async fn test_total_over_all_time() {
        let (_, aggregator) = seeded().await;
        let total = aggregator.total(&Identity::from("u1"), None, None).await.unwrap();
        assert_eq!(total, 9);
    }

    #[tokio::test]
    async fn test_total_with_bounds() {
        let (_, aggregator) = seeded().await;
        let id = Identity::from("u1");

        assert_eq!(aggregator.total(&id, Some(50), Some(100)).await.unwrap(), 7);
        assert_eq!(aggregator.total(&id, Some(0), Some(0)).await.unwrap(), 1);
        assert_eq!(aggregator.total(&id, None, Some(49)).await.unwrap(), 1);
        assert_eq!(aggregator.total(&id, Some(101), None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_identity_is_zero() {
        let (_, aggregator) = seeded().await;
        let total = aggregator.total(&Identity::from("nobody"), None, None).await.unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_inverted_range_is_zero_without_reading() {
        let (ledger, aggregator) = seeded().await;
        ledger.set_offline(true);

        let total = aggregator
            .total(&Identity::from("u1"), Some(100), Some(50))
            .await
            .unwrap();
        assert_eq!(total, 0);
    }
}
