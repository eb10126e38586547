//! Server configuration from the environment

use std::time::Duration;

use billing_core::{BillingError, Result};
use billing_payments::{PollPolicy, DEFAULT_BACKLOG_CAPACITY};

/// Runtime settings for the HTTP server and its background tasks
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub poll_policy: PollPolicy,
    pub lapse_sweep_every: Duration,

    /// Expected `?token=` on gateway callbacks; unchecked when unset
    pub callback_token: Option<String>,

    /// Manual reconciliation entries kept in memory
    pub backlog_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".into(),
            poll_policy: PollPolicy::default(),
            lapse_sweep_every: Duration::from_secs(300),
            callback_token: None,
            backlog_capacity: DEFAULT_BACKLOG_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Read `BIND_ADDR`, `POLL_INTERVAL_SECS`, `POLL_MAX_ATTEMPTS`,
    /// `LAPSE_SWEEP_SECS`, `BACKLOG_CAPACITY` and `MPESA_CALLBACK_TOKEN`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let poll = defaults.poll_policy;
        let poll_policy = PollPolicy {
            interval_secs: parse_or(&lookup, "POLL_INTERVAL_SECS", poll.interval_secs)?,
            max_attempts: parse_or(&lookup, "POLL_MAX_ATTEMPTS", poll.max_attempts)?,
        };
        if poll_policy.max_attempts == 0 {
            return Err(BillingError::Config("POLL_MAX_ATTEMPTS must be at least 1".into()));
        }

        let sweep_secs =
            parse_or(&lookup, "LAPSE_SWEEP_SECS", defaults.lapse_sweep_every.as_secs())?;
        if sweep_secs == 0 {
            return Err(BillingError::Config("LAPSE_SWEEP_SECS must be at least 1".into()));
        }

        let backlog_capacity = parse_or(&lookup, "BACKLOG_CAPACITY", defaults.backlog_capacity)?;
        if backlog_capacity == 0 {
            return Err(BillingError::Config("BACKLOG_CAPACITY must be at least 1".into()));
        }

        Ok(Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            poll_policy,
            lapse_sweep_every: Duration::from_secs(sweep_secs),
            callback_token: lookup("MPESA_CALLBACK_TOKEN").filter(|t| !t.trim().is_empty()),
            backlog_capacity,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| BillingError::Config(format!("{key} is not a valid number: {raw}"))),
        None => Ok(default),
    }
}
