//! Startup configuration read from the environment.

use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;
use pulse_core::ttl::TtlPolicy;
use pulse_pipeline::application::maintenance::MaintenanceSchedule;
use pulse_retention::domain::cohort::CohortMaturity;

use crate::error::AppError;

/// Typed server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Interface to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// PostgreSQL URL; in-memory stores are used when unset.
    pub database_url: Option<String>,
    /// Event and aggregate lifetimes.
    pub ttl: TtlPolicy,
    /// Background job periods.
    pub schedule: MaintenanceSchedule,
    /// Tolerated client clock lead on `event_time`.
    pub future_skew: TimeDelta,
    /// Time budget of one retention query.
    pub retention_timeout: Duration,
    /// Cohort maturity used when a request does not choose one.
    pub retention_maturity: CohortMaturity,
    /// OTLP collector endpoint; span export is disabled when unset.
    pub otlp_endpoint: Option<String>,
}

impl Settings {
    /// Reads settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`, applying defaults for unset keys.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a value cannot be parsed, a TTL or
    /// interval is zero, or the aggregate TTL is shorter than the event TTL.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let event_ttl_days: u32 = parse_or(&lookup, "PULSE_EVENT_TTL_DAYS", 30)?;
        let aggregate_ttl_days: u32 = parse_or(&lookup, "PULSE_AGGREGATE_TTL_DAYS", 180)?;
        if event_ttl_days == 0 || aggregate_ttl_days == 0 {
            return Err(AppError::Config("TTL days must be at least 1".to_owned()));
        }
        if aggregate_ttl_days < event_ttl_days {
            return Err(AppError::Config(format!(
                "PULSE_AGGREGATE_TTL_DAYS ({aggregate_ttl_days}) must not be shorter than PULSE_EVENT_TTL_DAYS ({event_ttl_days})"
            )));
        }

        let schedule = MaintenanceSchedule {
            event_sweep: seconds(&lookup, "PULSE_EVENT_SWEEP_INTERVAL_SECS", 3_600)?,
            aggregate_sweep: seconds(&lookup, "PULSE_AGGREGATE_SWEEP_INTERVAL_SECS", 3_600)?,
            reconcile: seconds(&lookup, "PULSE_RECONCILE_INTERVAL_SECS", 60)?,
        };
        let future_skew_secs: u32 = parse_or(&lookup, "PULSE_FUTURE_SKEW_SECS", 300)?;

        Ok(Self {
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_owned()),
            port: parse_or(&lookup, "PORT", 3_000)?,
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            ttl: TtlPolicy {
                event_ttl: TimeDelta::days(i64::from(event_ttl_days)),
                aggregate_ttl: TimeDelta::days(i64::from(aggregate_ttl_days)),
            },
            schedule,
            future_skew: TimeDelta::seconds(i64::from(future_skew_secs)),
            retention_timeout: seconds(&lookup, "PULSE_RETENTION_TIMEOUT_SECS", 30)?,
            retention_maturity: parse_or(
                &lookup,
                "PULSE_RETENTION_MATURITY",
                CohortMaturity::Lenient,
            )?,
            otlp_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT")
                .filter(|endpoint| !endpoint.trim().is_empty()),
        })
    }

    /// The socket address to listen on.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `host:port` is not a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, AppError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| AppError::Config(format!("invalid HOST:PORT combination: {e}")))
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{key} is invalid ({raw:?}): {e}"))),
    }
}

fn seconds<F>(lookup: &F, key: &str, default: u64) -> Result<Duration, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    let secs: u64 = parse_or(lookup, key, default)?;
    if secs == 0 {
        return Err(AppError::Config(format!("{key} must be at least 1")));
    }
    Ok(Duration::from_secs(secs))
}
