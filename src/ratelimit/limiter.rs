//! Sliding-window rate limiter.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};
use uuid::Uuid;

use super::key::WindowKey;
use super::store::{CounterStore, WindowCheck};
use crate::config::LimitsConfig;
use crate::error::Result;
use crate::identity::Identity;

/// Outcome of a single rate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The call is within quota and has been recorded in the window.
    Admitted {
        /// Entries in the window including this call
        current: u64,
        /// Calls left before the window is full
        remaining: u64,
    },
    /// The window is full. Nothing was recorded for this call.
    Denied {
        /// Entries in the window
        current: u64,
    },
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted { .. })
    }
}

/// Per-identity sliding-window limiter over a shared counter store.
///
/// The default evaluation runs trim, count and add as separate store calls,
/// so concurrent callers for the same identity can overshoot the limit by up
/// to the number of in-flight calls minus one. With `strict` set, the whole
/// evaluation runs as one store-side operation instead.
pub struct SlidingWindowLimiter {
    store: Arc<dyn CounterStore>,
    key_prefix: String,
    config: LimitsConfig,
}

impl SlidingWindowLimiter {
    /// Create a limiter over an injected counter store.
    pub fn new(store: Arc<dyn CounterStore>, key_prefix: &str, config: LimitsConfig) -> Self {
        Self {
            store,
            key_prefix: key_prefix.to_string(),
            config,
        }
    }

    pub fn config(&self) -> &LimitsConfig {
        &self.config
    }

    /// The store key holding `identity`'s window.
    pub fn window_key(&self, identity: &Identity) -> WindowKey {
        WindowKey::new(&self.key_prefix, identity)
    }

    /// Check the configured quota for `identity` at `now`.
    pub async fn check(&self, identity: &Identity, now: i64) -> Result<Decision> {
        self.check_and_record(identity, now, self.config.window_seconds, self.config.limit)
            .await
    }

    /// Admit or deny one call for `identity` at `now`, recording it in the
    /// window when admitted.
    ///
    /// Entries scored exactly at `now - window_seconds` still count.
    pub async fn check_and_record(
        &self,
        identity: &Identity,
        now: i64,
        window_seconds: u64,
        limit: u64,
    ) -> Result<Decision> {
        let key = self.window_key(identity).to_string_key();
        let cutoff = now.saturating_sub(window_seconds as i64);
        let ttl = Duration::from_secs(window_seconds + self.config.store_ttl_grace_seconds);

        trace!(
            key = %key,
            now = now,
            cutoff = cutoff,
            limit = limit,
            strict = self.config.strict,
            "Checking rate limit"
        );

        let decision = if self.config.strict {
            let check = WindowCheck {
                cutoff,
                now,
                member: window_member(now),
                limit,
                ttl,
            };
            let outcome = self.store.admit_atomic(&key, &check).await?;
            if outcome.admitted {
                admitted(outcome.current, limit)
            } else {
                Decision::Denied {
                    current: outcome.current,
                }
            }
        } else {
            self.store.trim_before(&key, cutoff).await?;
            let current = self.store.count_in_range(&key, cutoff, now).await?;
            if current >= limit {
                Decision::Denied { current }
            } else {
                self.store.add(&key, &window_member(now), now).await?;
                self.store.set_expiry(&key, ttl).await?;
                admitted(current, limit)
            }
        };

        if let Decision::Denied { current } = decision {
            debug!(
                key = %key,
                current = current,
                limit = limit,
                "Rate limit exceeded"
            );
        }

        Ok(decision)
    }
}

/// A set member unique to one admission. The score carries the instant, so
/// admissions in the same second stay distinct entries.
fn window_member(now: i64) -> String {
    format!("{}:{}", now, Uuid::new_v4())
}

fn admitted(before: u64, limit: u64) -> Decision {
    let current = before + 1;
    Decision::Admitted {
        current,
        remaining: limit.saturating_sub(current),
    }
}
