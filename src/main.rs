use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tollgate::config::TollgateConfig;
use tollgate::metering::SqliteLedger;
use tollgate::ratelimit::RedisCounterStore;
use tollgate::{Identity, MeteringService};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Quota enforcement and usage metering.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version)]
struct Cli {
    /// YAML configuration file; `TOLLGATE__*` environment variables override it
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Evaluate the quota for an identity now and meter the call if admitted
    Check { identity: String },

    /// Show total usage, optionally bounded to [start, end] (Unix seconds)
    Usage {
        identity: String,
        #[arg(long)]
        start: Option<i64>,
        #[arg(long)]
        end: Option<i64>,
    },

    /// Generate a billing record; defaults to the trailing billing period
    Bill {
        identity: String,
        #[arg(long)]
        start: Option<i64>,
        #[arg(long)]
        end: Option<i64>,
    },

    /// Probe the counter store and the ledger
    Health,
}

#[derive(Serialize)]
struct UsageReport<'a> {
    identity: &'a Identity,
    total_requests: u64,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.with_thread_ids(true).init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = TollgateConfig::load(cli.config.as_deref()).context("loading configuration")?;
    info!(
        window_seconds = config.limits.window_seconds,
        limit = config.limits.limit,
        unit_price = %config.billing.unit_price,
        strict = config.limits.strict,
        "Configuration loaded"
    );

    let counter_store = Arc::new(
        RedisCounterStore::connect(&config.counter_store.url, config.counter_store.timeout())
            .await
            .context("connecting to counter store")?,
    );
    let ledger = Arc::new(
        SqliteLedger::connect(&config.ledger)
            .await
            .context("opening usage ledger")?,
    );
    let service = MeteringService::new(&config, counter_store, ledger);
    let now = Utc::now().timestamp();

    match cli.command {
        Command::Check { identity } => {
            let identity = Identity::from(identity);
            let outcome = config
                .limits
                .on_unavailable
                .resolve(service.evaluate_and_meter(&identity, now).await)?;
            print_json(&outcome)?;
            if !outcome.is_admitted() {
                std::process::exit(2);
            }
        }
        Command::Usage {
            identity,
            start,
            end,
        } => {
            let identity = Identity::from(identity);
            let total_requests = service.usage_total(&identity, start, end).await?;
            print_json(&UsageReport {
                identity: &identity,
                total_requests,
            })?;
        }
        Command::Bill {
            identity,
            start,
            end,
        } => {
            let identity = Identity::from(identity);
            let end = end.unwrap_or(now);
            let start =
                start.unwrap_or_else(|| end - config.billing.default_period_seconds as i64);
            let record = service.generate_bill(&identity, start, end).await?;
            print_json(&record)?;
        }
        Command::Health => {
            let report = service.health().await;
            print_json(&report)?;
            if !report.is_healthy() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
