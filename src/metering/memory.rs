//! In-memory usage ledger for tests and single-process use.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use super::ledger::{BillingRecord, UsageEvent, UsageLedger, UsageRange};
use crate::error::{Result, StoreKind, TollgateError};
use crate::identity::Identity;

/// Ledger held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    events: RwLock<Vec<UsageEvent>>,
    bills: RwLock<Vec<BillingRecord>>,
    offline: AtomicBool,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn event_count(&self) -> usize {
        self.events.read().len()
    }

    pub fn billing_count(&self) -> usize {
        self.bills.read().len()
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TollgateError::unavailable(
                StoreKind::Ledger,
                "in-memory ledger is offline",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl UsageLedger for InMemoryLedger {
    async fn append(&self, event: &UsageEvent) -> Result<()> {
        self.ensure_online()?;
        self.events.write().push(event.clone());
        Ok(())
    }

    async fn sum(&self, identity: &Identity, range: UsageRange) -> Result<u64> {
        self.ensure_online()?;
        self.events
            .read()
            .iter()
            .filter(|e| &e.identity == identity && range.contains(e.occurred_at))
            .try_fold(0u64, |total, e| total.checked_add(e.count))
            .ok_or_else(|| TollgateError::Overflow(format!("usage total for {}", identity)))
    }

    async fn insert_billing(&self, record: &BillingRecord) -> Result<()> {
        self.ensure_online()?;
        self.bills.write().push(record.clone());
        Ok(())
    }

    async fn billing_records(&self, identity: &Identity) -> Result<Vec<BillingRecord>> {
        self.ensure_online()?;
        Ok(self
            .bills
            .read()
            .iter()
            .filter(|b| &b.identity == identity)
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> Result<()> {
        self.ensure_online()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sum_filters_identity_and_range() {
        let ledger = InMemoryLedger::new();
        let a = Identity::from("a");
        let b = Identity::from("b");

        for t in [5, 10, 15] {
            ledger.append(&UsageEvent::single(&a, t)).await.unwrap();
        }
        ledger.append(&UsageEvent::single(&b, 10)).await.unwrap();

        assert_eq!(ledger.sum(&a, UsageRange::all()).await.unwrap(), 3);
        assert_eq!(
            ledger.sum(&a, UsageRange::new(Some(10), Some(15))).await.unwrap(),
            2
        );
        assert_eq!(ledger.sum(&b, UsageRange::all()).await.unwrap(), 1);
        assert_eq!(ledger.sum(&Identity::from("c"), UsageRange::all()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_offline_ledger_fails() {
        let ledger = InMemoryLedger::new();
        ledger.set_offline(true);

        let err = ledger
            .append(&UsageEvent::single(&Identity::from("a"), 1))
            .await
            .unwrap_err();
        assert!(err.is_store_unavailable());
        assert_eq!(ledger.event_count(), 0);
    }

    #[tokio::test]
    async fn test_sum_overflow_is_an_error() {
        let ledger = InMemoryLedger::new();
        let id = Identity::from("u1");
        for count in [u64::MAX, 1] {
            ledger
                .append(&UsageEvent {
                    identity: id.clone(),
                    occurred_at: 0,
                    count,
                })
                .await
                .unwrap();
        }

        let err = ledger.sum(&id, UsageRange::all()).await.unwrap_err();
        assert!(matches!(err, TollgateError::Overflow(_)));
    }
}
