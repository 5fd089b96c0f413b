//! Usage recording, aggregation, and billing over a durable ledger.

mod aggregator;
mod billing;
mod ledger;
mod memory;
mod recorder;
mod sqlite;

pub use aggregator::UsageAggregator;
pub use billing::BillingAggregator;
pub use ledger::{BillingRecord, UsageEvent, UsageLedger, UsageRange};
pub use memory::InMemoryLedger;
pub use recorder::UsageRecorder;
pub use sqlite::SqliteLedger;
