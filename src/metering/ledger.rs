//! Durable usage ledger types and trait.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::identity::Identity;

/// One metered, admitted call. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub identity: Identity,
    /// Unix seconds
    pub occurred_at: i64,
    /// Always at least 1
    pub count: u64,
}

impl UsageEvent {
    /// A single call at `occurred_at`.
    pub fn single(identity: &Identity, occurred_at: i64) -> Self {
        Self {
            identity: identity.clone(),
            occurred_at,
            count: 1,
        }
    }
}

/// A closed interval of Unix seconds; either side may be open-ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageRange {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl UsageRange {
    pub fn new(start: Option<i64>, end: Option<i64>) -> Self {
        Self { start, end }
    }

    /// The whole history.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn contains(&self, at: i64) -> bool {
        self.start.map_or(true, |s| at >= s) && self.end.map_or(true, |e| at <= e)
    }

    /// True when both bounds are set and nothing can fall between them.
    pub fn is_empty(&self) -> bool {
        matches!((self.start, self.end), (Some(s), Some(e)) if s > e)
    }
}

/// A priced usage total over one billing period. Never updated once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingRecord {
    pub id: Uuid,
    pub identity: Identity,
    pub usage: u64,
    pub amount_due: Decimal,
    pub period_start: i64,
    pub period_end: i64,
    /// Unix seconds at which the bill was computed
    pub created_at: i64,
}

/// Append-and-read access to usage events and billing records.
///
/// Implementations commit before returning. Reads may or may not observe
/// writes still in flight.
#[async_trait]
pub trait UsageLedger: Send + Sync {
    /// Append one usage event.
    async fn append(&self, event: &UsageEvent) -> Result<()>;

    /// Sum `count` over an identity's events within `range`; zero if none.
    async fn sum(&self, identity: &Identity, range: UsageRange) -> Result<u64>;

    /// Persist a new billing record.
    async fn insert_billing(&self, record: &BillingRecord) -> Result<()>;

    /// An identity's billing records in creation order.
    async fn billing_records(&self, identity: &Identity) -> Result<Vec<BillingRecord>>;

    /// Probe the store.
    async fn health_check(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_bounds_are_inclusive() {
        let range = UsageRange::new(Some(10), Some(20));
        assert!(range.contains(10));
        assert!(range.contains(20));
        assert!(!range.contains(9));
        assert!(!range.contains(21));
    }

    #[test]
    fn test_zero_is_a_real_bound() {
        let range = UsageRange::new(Some(0), None);
        assert!(!range.contains(-1));
        assert!(range.contains(0));
    }

    #[test]
    fn test_open_range() {
        assert!(UsageRange::all().contains(i64::MIN));
        assert!(UsageRange::all().contains(i64::MAX));
        assert!(UsageRange::new(None, Some(5)).contains(-100));
    }

    #[test]
    fn test_inverted_range_is_empty() {
        assert!(UsageRange::new(Some(100), Some(50)).is_empty());
        assert!(!UsageRange::new(Some(50), Some(50)).is_empty());
        assert!(!UsageRange::new(Some(100), None).is_empty());
    }
}
