//! SQLite-backed usage ledger.
//!
//! Usage events and billing records live in two append-only tables. Amounts
//! are stored as decimal text so they round-trip exactly.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

use super::ledger::{BillingRecord, UsageEvent, UsageLedger, UsageRange};
use crate::config::LedgerConfig;
use crate::error::{bounded, Result, StoreKind, TollgateError};
use crate::identity::Identity;

const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS usage_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        identity TEXT NOT NULL,
        occurred_at INTEGER NOT NULL,
        count INTEGER NOT NULL CHECK (count >= 1)
    )",
    "CREATE INDEX IF NOT EXISTS idx_usage_identity_time ON usage_events(identity, occurred_at)",
    "CREATE TABLE IF NOT EXISTS billing_records (
        id TEXT NOT NULL PRIMARY KEY,
        identity TEXT NOT NULL,
        usage INTEGER NOT NULL,
        amount_due TEXT NOT NULL,
        period_start INTEGER NOT NULL,
        period_end INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_billing_identity ON billing_records(identity)",
];

fn to_sql_int(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| {
        TollgateError::Overflow(format!("{} {} exceeds the SQLite integer range", what, value))
    })
}

fn sql_err(op: &str, e: impl std::fmt::Display) -> TollgateError {
    error!(op = op, error = %e, "Ledger call failed");
    TollgateError::unavailable(StoreKind::Ledger, format!("SQLite {} failed: {}", op, e))
}

/// Usage ledger backed by a SQLite connection pool.
pub struct SqliteLedger {
    pool: SqlitePool,
    timeout: Duration,
}

impl SqliteLedger {
    /// Open the ledger described by `config`, creating the schema if needed.
    pub async fn connect(config: &LedgerConfig) -> Result<Self> {
        Self::connect_with(&config.database_url, config.max_connections, config.timeout()).await
    }

    /// Open (or create) a ledger at `database_url`.
    pub async fn connect_with(
        database_url: &str,
        max_connections: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let connect_opts = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| sql_err("open", format!("invalid database URL: {}", e)))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let mut pool_opts = SqlitePoolOptions::new().acquire_timeout(timeout);
        if database_url.contains(":memory:") {
            // Every in-memory connection is its own database, so pin exactly one.
            pool_opts = pool_opts
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            pool_opts = pool_opts.max_connections(max_connections.max(1));
        }

        let pool = pool_opts
            .connect_with(connect_opts)
            .await
            .map_err(|e| sql_err("connect", e))?;

        let ledger = Self { pool, timeout };
        ledger.run_migrations().await?;
        info!(url = %database_url, "Usage ledger ready");
        Ok(ledger)
    }

    /// A private in-memory ledger.
    pub async fn in_memory() -> Result<Self> {
        Self::connect_with("sqlite::memory:", 1, Duration::from_secs(5)).await
    }

    async fn run_migrations(&self) -> Result<()> {
        for statement in MIGRATIONS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| sql_err("migration", e))?;
        }
        Ok(())
    }
}

fn billing_from_row(row: &SqliteRow) -> Result<BillingRecord> {
    let id: String = row.try_get("id").map_err(|e| sql_err("decode", e))?;
    let identity: String = row.try_get("identity").map_err(|e| sql_err("decode", e))?;
    let usage: i64 = row.try_get("usage").map_err(|e| sql_err("decode", e))?;
    let amount_due: String = row.try_get("amount_due").map_err(|e| sql_err("decode", e))?;

    Ok(BillingRecord {
        id: Uuid::parse_str(&id).map_err(|e| sql_err("decode", e))?,
        identity: Identity::from(identity),
        usage: usage.max(0) as u64,
        amount_due: Decimal::from_str(&amount_due).map_err(|e| sql_err("decode", e))?,
        period_start: row.try_get("period_start").map_err(|e| sql_err("decode", e))?,
        period_end: row.try_get("period_end").map_err(|e| sql_err("decode", e))?,
        created_at: row.try_get("created_at").map_err(|e| sql_err("decode", e))?,
    })
}

#[async_trait]
impl UsageLedger for SqliteLedger {
    async fn append(&self, event: &UsageEvent) -> Result<()> {
        let count = to_sql_int(event.count, "usage count")?;
        bounded(StoreKind::Ledger, self.timeout, "INSERT usage", async {
            sqlx::query("INSERT INTO usage_events (identity, occurred_at, count) VALUES (?, ?, ?)")
                .bind(event.identity.as_str())
                .bind(event.occurred_at)
                .bind(count)
                .execute(&self.pool)
                .await
                .map_err(|e| sql_err("INSERT usage", e))?;
            Ok(())
        })
        .await
    }

    async fn sum(&self, identity: &Identity, range: UsageRange) -> Result<u64> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT COALESCE(SUM(count), 0) AS total FROM usage_events WHERE identity = ",
        );
        qb.push_bind(identity.as_str().to_string());
        if let Some(start) = range.start {
            qb.push(" AND occurred_at >= ").push_bind(start);
        }
        if let Some(end) = range.end {
            qb.push(" AND occurred_at <= ").push_bind(end);
        }

        bounded(StoreKind::Ledger, self.timeout, "SUM usage", async {
            let row = qb
                .build()
                .fetch_one(&self.pool)
                .await
                .map_err(|e| sql_err("SUM usage", e))?;
            let total: i64 = row.try_get("total").map_err(|e| sql_err("decode", e))?;
            Ok(total.max(0) as u64)
        })
        .await
    }

    async fn insert_billing(&self, record: &BillingRecord) -> Result<()> {
        let usage = to_sql_int(record.usage, "billed usage")?;
        bounded(StoreKind::Ledger, self.timeout, "INSERT billing", async {
            sqlx::query(
                "INSERT INTO billing_records
                    (id, identity, usage, amount_due, period_start, period_end, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(record.id.to_string())
            .bind(record.identity.as_str())
            .bind(usage)
            .bind(record.amount_due.to_string())
            .bind(record.period_start)
            .bind(record.period_end)
            .bind(record.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| sql_err("INSERT billing", e))?;
            Ok(())
        })
        .await
    }

    async fn billing_records(&self, identity: &Identity) -> Result<Vec<BillingRecord>> {
        bounded(StoreKind::Ledger, self.timeout, "SELECT billing", async {
            let rows = sqlx::query(
                "SELECT id, identity, usage, amount_due, period_start, period_end, created_at
                 FROM billing_records WHERE identity = ? ORDER BY rowid",
            )
            .bind(identity.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| sql_err("SELECT billing", e))?;

            rows.iter().map(billing_from_row).collect()
        })
        .await
    }

    async fn health_check(&self) -> Result<()> {
        bounded(StoreKind::Ledger, self.timeout, "SELECT 1", async {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(|e| sql_err("SELECT 1", e))?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_sum_empty_ledger_is_zero() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        let total = ledger.sum(&Identity::from("u1"), UsageRange::all()).await.unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_sum_with_bounds() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        let id = Identity::from(7u64);

        // Out of order on purpose
        for t in [30, 0, 20, 10] {
            ledger.append(&UsageEvent::single(&id, t)).await.unwrap();
        }
        ledger
            .append(&UsageEvent::single(&Identity::from(8u64), 10))
            .await
            .unwrap();

        assert_eq!(ledger.sum(&id, UsageRange::all()).await.unwrap(), 4);
        assert_eq!(ledger.sum(&id, UsageRange::new(Some(10), Some(20))).await.unwrap(), 2);
        assert_eq!(ledger.sum(&id, UsageRange::new(Some(0), None)).await.unwrap(), 4);
        assert_eq!(ledger.sum(&id, UsageRange::new(None, Some(0))).await.unwrap(), 1);
        assert_eq!(ledger.sum(&id, UsageRange::new(Some(25), Some(5))).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_billing_roundtrip_keeps_decimal_exact() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        let id = Identity::from("u1");
        let record = BillingRecord {
            id: Uuid::new_v4(),
            identity: id.clone(),
            usage: 1_000_000,
            amount_due: dec!(10000.00),
            period_start: 0,
            period_end: 100,
            created_at: 100,
        };

        ledger.insert_billing(&record).await.unwrap();
        let records = ledger.billing_records(&id).await.unwrap();

        assert_eq!(records, vec![record]);
        assert_eq!(records[0].amount_due.to_string(), "10000.00");
    }

    #[tokio::test]
    async fn test_billing_records_in_creation_order() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        let id = Identity::from("u1");

        for usage in [3u64, 1, 2] {
            let record = BillingRecord {
                id: Uuid::new_v4(),
                identity: id.clone(),
                usage,
                amount_due: Decimal::from(usage),
                period_start: 0,
                period_end: 10,
                created_at: 10,
            };
            ledger.insert_billing(&record).await.unwrap();
        }

        let usages: Vec<u64> = ledger
            .billing_records(&id)
            .await
            .unwrap()
            .iter()
            .map(|r| r.usage)
            .collect();
        assert_eq!(usages, vec![3, 1, 2]);
        assert!(ledger.billing_records(&Identity::from("other")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_counts_are_rejected() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        let id = Identity::from("u1");

        let err = ledger
            .append(&UsageEvent {
                identity: id.clone(),
                occurred_at: 0,
                count: u64::MAX,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TollgateError::Overflow(_)));
        assert_eq!(ledger.sum(&id, UsageRange::all()).await.unwrap(), 0);

        let record = BillingRecord {
            id: Uuid::new_v4(),
            identity: id.clone(),
            usage: i64::MAX as u64 + 1,
            amount_due: Decimal::ZERO,
            period_start: 0,
            period_end: 10,
            created_at: 10,
        };
        let err = ledger.insert_billing(&record).await.unwrap_err();
        assert!(matches!(err, TollgateError::Overflow(_)));
        assert!(ledger.billing_records(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_health_check() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        assert!(ledger.health_check().await.is_ok());
    }
}
