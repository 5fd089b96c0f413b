//! Caller-facing metering service.
//!
//! Composes the limiter, recorder, and aggregators behind the three
//! operations callers use: evaluate-and-meter, usage totals, and billing.

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::config::{FailurePolicy, TollgateConfig};
use crate::error::{Result, StoreKind, TollgateError};
use crate::identity::Identity;
use crate::metering::{BillingAggregator, BillingRecord, UsageAggregator, UsageLedger, UsageRecorder};
use crate::ratelimit::{CounterStore, Decision, SlidingWindowLimiter};

/// Result of [`MeteringService::evaluate_and_meter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MeterOutcome {
    /// The call is admitted and metered.
    Admitted {
        /// All-time usage of the identity after this call
        total_usage: u64,
        /// Calls left in the current window
        remaining: u64,
    },
    /// The quota is exhausted.
    Denied {
        /// Calls counted in the current window
        current: u64,
    },
    /// The counter store was unavailable and the caller's policy is to fail
    /// open. Nothing was metered.
    Unmetered,
}

impl MeterOutcome {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, MeterOutcome::Denied { .. })
    }
}

impl FailurePolicy {
    /// Apply this policy to a counter store outage reported by
    /// [`MeteringService::evaluate_and_meter`]. Any other error is returned
    /// unchanged.
    pub fn resolve(&self, result: Result<MeterOutcome>) -> Result<MeterOutcome> {
        match result {
            Err(TollgateError::StoreUnavailable {
                store: StoreKind::Counter,
                reason,
            }) => {
                warn!(policy = ?self, reason = %reason, "Counter store unavailable");
                Ok(match self {
                    FailurePolicy::Closed => MeterOutcome::Denied { current: 0 },
                    FailurePolicy::Open => MeterOutcome::Unmetered,
                })
            }
            other => other,
        }
    }
}

/// Liveness of both backing stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub counter_store: bool,
    pub ledger: bool,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.counter_store && self.ledger
    }
}

/// The metering engine's operation surface.
///
/// Both stores are injected at construction; the service holds no global
/// state and is shared across tasks behind an `Arc`.
pub struct MeteringService {
    limiter: SlidingWindowLimiter,
    recorder: UsageRecorder,
    usage: UsageAggregator,
    billing: BillingAggregator,
    counter_store: Arc<dyn CounterStore>,
    ledger: Arc<dyn UsageLedger>,
    unit_price: Decimal,
}

impl MeteringService {
    /// Create a new service over the given stores.
    pub fn new(
        config: &TollgateConfig,
        counter_store: Arc<dyn CounterStore>,
        ledger: Arc<dyn UsageLedger>,
    ) -> Self {
        Self {
            limiter: SlidingWindowLimiter::new(
                counter_store.clone(),
                &config.counter_store.key_prefix,
                config.limits.clone(),
            ),
            recorder: UsageRecorder::new(ledger.clone()),
            usage: UsageAggregator::new(ledger.clone()),
            billing: BillingAggregator::new(ledger.clone()),
            counter_store,
            ledger,
            unit_price: config.billing.unit_price,
        }
    }

    pub fn limiter(&self) -> &SlidingWindowLimiter {
        &self.limiter
    }

    /// Evaluate the quota for `identity` at `now` and, when admitted, meter
    /// the call.
    ///
    /// A failed usage append after admission is returned to the caller. The
    /// window entry is not rolled back, so the call still counts toward the
    /// quota.
    #[instrument(skip(self, identity), fields(identity = %identity))]
    pub async fn evaluate_and_meter(&self, identity: &Identity, now: i64) -> Result<MeterOutcome> {
        let remaining = match self.limiter.check(identity, now).await? {
            Decision::Denied { current } => {
                debug!(current = current, "Call denied");
                return Ok(MeterOutcome::Denied { current });
            }
            Decision::Admitted { remaining, .. } => remaining,
        };

        self.recorder.record(identity, now).await?;

        let total_usage = self.usage.total(identity, None, None).await?;
        Ok(MeterOutcome::Admitted {
            total_usage,
            remaining,
        })
    }

    /// Total usage of `identity`, optionally bounded to `[start, end]`.
    pub async fn usage_total(
        &self,
        identity: &Identity,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<u64> {
        self.usage.total(identity, start, end).await
    }

    /// Bill `identity` for `[start, end]` at the configured unit price.
    pub async fn generate_bill(
        &self,
        identity: &Identity,
        start: i64,
        end: i64,
    ) -> Result<BillingRecord> {
        self.billing.bill(identity, start, end, self.unit_price).await
    }

    /// Billing records previously generated for `identity`.
    pub async fn billing_records(&self, identity: &Identity) -> Result<Vec<BillingRecord>> {
        self.billing.records(identity).await
    }

    /// Probe both stores.
    pub async fn health(&self) -> HealthReport {
        let (counter, ledger) =
            futures::join!(self.counter_store.health_check(), self.ledger.health_check());

        let report = HealthReport {
            counter_store: counter.is_ok(),
            ledger: ledger.is_ok(),
        };
        info!(
            counter_store = report.counter_store,
            ledger = report.ledger,
            "Health checked"
        );
        report
    }
}
