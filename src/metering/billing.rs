//! Billing aggregation.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use super::aggregator::UsageAggregator;
use super::ledger::{BillingRecord, UsageLedger};
use crate::error::{Result, TollgateError};
use crate::identity::Identity;

/// Prices a period's usage and persists the result.
///
/// Every call creates a new record, including repeated calls for the same
/// identity and period.
#[derive(Clone)]
pub struct BillingAggregator {
    usage: UsageAggregator,
    ledger: Arc<dyn UsageLedger>,
}

impl BillingAggregator {
    pub fn new(ledger: Arc<dyn UsageLedger>) -> Self {
        Self {
            usage: UsageAggregator::new(ledger.clone()),
            ledger,
        }
    }

    /// Bill `identity` for usage in `[period_start, period_end]` at `unit_price`.
    ///
    /// Fails with [`TollgateError::InvalidPeriod`] before touching the ledger
    /// when `period_start > period_end`.
    #[instrument(skip(self, identity), fields(identity = %identity))]
    pub async fn bill(
        &self,
        identity: &Identity,
        period_start: i64,
        period_end: i64,
        unit_price: Decimal,
    ) -> Result<BillingRecord> {
        if period_start > period_end {
            return Err(TollgateError::InvalidPeriod {
                start: period_start,
                end: period_end,
            });
        }
        if unit_price.is_sign_negative() && !unit_price.is_zero() {
            return Err(TollgateError::InvalidPrice(unit_price));
        }

        let usage = self
            .usage
            .total(identity, Some(period_start), Some(period_end))
            .await?;

        let amount_due = Decimal::from(usage).checked_mul(unit_price).ok_or_else(|| {
            TollgateError::Overflow(format!("{} calls at {} per call", usage, unit_price))
        })?;

        let record = BillingRecord {
            id: Uuid::new_v4(),
            identity: identity.clone(),
            usage,
            amount_due,
            period_start,
            period_end,
            created_at: Utc::now().timestamp(),
        };
        self.ledger.insert_billing(&record).await?;

        info!(
            bill_id = %record.id,
            usage = record.usage,
            amount_due = %record.amount_due,
            "Billing record created"
        );
        Ok(record)
    }

    /// Records previously created for `identity`, oldest first.
    pub async fn records(&self, identity: &Identity) -> Result<Vec<BillingRecord>> {
        self.ledger.billing_records(identity).await
    }
}
