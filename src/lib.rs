//! Tollgate - API Quota Enforcement and Usage Metering
//!
//! This crate implements a per-identity sliding-window rate limiter backed by
//! a shared sorted-set counter store, together with the usage ledger and
//! billing aggregation that consume the same stream of admitted calls.

pub mod config;
pub mod error;
pub mod identity;
pub mod metering;
pub mod ratelimit;
pub mod service;

pub use error::{Result, TollgateError};
pub use identity::Identity;
pub use service::{HealthReport, MeterOutcome, MeteringService};
