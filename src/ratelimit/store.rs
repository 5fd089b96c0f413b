//! Counter store trait for abstracting Redis and in-memory implementations.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Parameters of one atomic window admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowCheck {
    /// Members scored below this are expired
    pub cutoff: i64,
    /// The instant being admitted; also the new member's score
    pub now: i64,
    /// Member to insert on admission
    pub member: String,
    /// Maximum entries allowed in `[cutoff, now]`
    pub limit: u64,
    /// Key lifetime set on admission
    pub ttl: Duration,
}

/// Outcome of [`CounterStore::admit_atomic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomicAdmission {
    pub admitted: bool,
    /// Entries in the window before this call
    pub current: u64,
}

/// Primitives over a shared, time-ordered set per key.
///
/// Every operation is visible to all callers once it completes. Any of them
/// may fail with `StoreUnavailable`.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Remove all members with score strictly below `cutoff`.
    async fn trim_before(&self, key: &str, cutoff: i64) -> Result<()>;

    /// Count members with score in `[low, high]`.
    async fn count_in_range(&self, key: &str, low: i64, high: i64) -> Result<u64>;

    /// Insert `member` with `score`, overwriting the score of an existing member.
    async fn add(&self, key: &str, member: &str, score: i64) -> Result<()>;

    /// Reclaim the whole key after `ttl` without further writes.
    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Trim, count, and conditionally add and expire as one store-side step.
    async fn admit_atomic(&self, key: &str, check: &WindowCheck) -> Result<AtomicAdmission>;

    /// Probe the store.
    async fn health_check(&self) -> Result<()>;
}
