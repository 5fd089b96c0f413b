//! In-process counter store.
//!
//! Mirrors the sorted-set semantics of the Redis store closely enough to run
//! the limiter without infrastructure: scores are integer seconds, members
//! are unique per key, empty sets disappear, and key expiry is reclaimed
//! lazily on the next access.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

use super::store::{AtomicAdmission, CounterStore, WindowCheck};
use crate::error::{Result, StoreKind, TollgateError};

#[derive(Debug, Default)]
struct SortedSet {
    /// member -> score
    members: HashMap<String, i64>,
    expires_at: Option<Instant>,
}

impl SortedSet {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn trim_before(&mut self, cutoff: i64) {
        self.members.retain(|_, score| *score >= cutoff);
    }

    fn count_in_range(&self, low: i64, high: i64) -> u64 {
        self.members
            .values()
            .filter(|score| **score >= low && **score <= high)
            .count() as u64
    }
}

/// A counter store held in process memory.
///
/// Each key lives in its own `DashMap` slot, so operations on different
/// identities do not contend.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    sets: DashMap<String, SortedSet>,
    offline: AtomicBool,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: while offline every operation fails with
    /// `StoreUnavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Scores currently stored under `key`, ascending.
    pub fn scores(&self, key: &str) -> Vec<i64> {
        self.reclaim_if_expired(key);
        let mut scores: Vec<i64> = self
            .sets
            .get(key)
            .map(|set| set.members.values().copied().collect())
            .unwrap_or_default();
        scores.sort_unstable();
        scores
    }

    /// Number of live keys.
    pub fn key_count(&self) -> usize {
        self.purge_expired();
        self.sets.len()
    }

    /// Drop every key whose expiry has passed.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.sets.retain(|_, set| !set.is_expired(now));
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TollgateError::unavailable(
                StoreKind::Counter,
                "in-memory store is offline",
            ));
        }
        Ok(())
    }

    fn reclaim_if_expired(&self, key: &str) {
        let now = Instant::now();
        self.sets.remove_if(key, |_, set| set.is_expired(now));
    }

    fn remove_if_empty(&self, key: &str) {
        self.sets.remove_if(key, |_, set| set.members.is_empty());
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn trim_before(&self, key: &str, cutoff: i64) -> Result<()> {
        self.ensure_online()?;
        self.reclaim_if_expired(key);
        if let Some(mut set) = self.sets.get_mut(key) {
            set.trim_before(cutoff);
        }
        self.remove_if_empty(key);
        Ok(())
    }

    async fn count_in_range(&self, key: &str, low: i64, high: i64) -> Result<u64> {
        self.ensure_online()?;
        self.reclaim_if_expired(key);
        Ok(self
            .sets
            .get(key)
            .map(|set| set.count_in_range(low, high))
            .unwrap_or(0))
    }

    async fn add(&self, key: &str, member: &str, score: i64) -> Result<()> {
        self.ensure_online()?;
        self.reclaim_if_expired(key);
        self.sets
            .entry(key.to_string())
            .or_default()
            .members
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<()> {
        self.ensure_online()?;
        self.reclaim_if_expired(key);
        if let Some(mut set) = self.sets.get_mut(key) {
            set.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn admit_atomic(&self, key: &str, check: &WindowCheck) -> Result<AtomicAdmission> {
        self.ensure_online()?;
        self.reclaim_if_expired(key);

        let outcome = {
            // The entry guard holds the shard lock for the whole sequence.
            let mut set = self.sets.entry(key.to_string()).or_default();
            set.trim_before(check.cutoff);
            let current = set.count_in_range(check.cutoff, check.now);
            if current >= check.limit {
                AtomicAdmission {
                    admitted: false,
                    current,
                }
            } else {
                set.members.insert(check.member.clone(), check.now);
                set.expires_at = Some(Instant::now() + check.ttl);
                AtomicAdmission {
                    admitted: true,
                    current,
                }
            }
        };

        if !outcome.admitted {
            self.remove_if_empty(key);
        }
        trace!(key = %key, admitted = outcome.admitted, current = outcome.current, "Atomic admission");
        Ok(outcome)
    }

    async fn health_check(&self) -> Result<()> {
        self.ensure_online()
    }
}
