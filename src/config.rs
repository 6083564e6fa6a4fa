//! Gateway Configuration
//!
//! Loaded from environment variables at startup. No secret has a default
//! and none is ever logged.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `KEKA_WEBHOOK_SECRET` | unset |
//! | `PLUM_WEBHOOK_SECRET` | unset |
//! | `SPRINGVERIFY_WEBHOOK_SECRET` | unset |
//! | `ZOHO_SIGN_WEBHOOK_SECRET` | unset |
//! | `WEBHOOK_GATEWAY_ADDR` | `127.0.0.1:8080` |
//! | `WEBHOOK_CLAIM_LEASE_SECS` | `30` |
//! | `WEBHOOK_RETENTION_SECS` | `86400` |
//! | `WEBHOOK_MAX_RECORDS` | `100000` |
//! | `WEBHOOK_PROCESSING_TIMEOUT_SECS` | `10` |
//! | `WEBHOOK_MAX_BODY_BYTES` | `1048576` |
//!
//! The processing timeout must be shorter than the claim lease.

use std::collections::HashMap;
use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::webhooks::{
    ProviderId, WebhookSecret, DEFAULT_CLAIM_LEASE, DEFAULT_MAX_RECORDS,
    DEFAULT_PROCESSING_TIMEOUT, DEFAULT_RETENTION,
};

/// Bind address used when `WEBHOOK_GATEWAY_ADDR` is unset.
pub const DEFAULT_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080);

/// Default request body limit (1 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable could not be parsed
    #[error("invalid value for {var}: {reason}")]
    InvalidValue {
        /// Variable name
        var: &'static str,
        /// Parse failure
        reason: String,
    },

    /// A duration or size that must be positive was zero
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    /// A processor could outlive its claim and run twice
    #[error(
        "WEBHOOK_PROCESSING_TIMEOUT_SECS ({timeout_secs}s) must be shorter than \
         WEBHOOK_CLAIM_LEASE_SECS ({lease_secs}s)"
    )]
    TimeoutExceedsLease {
        /// Configured processing timeout
        timeout_secs: u64,
        /// Configured claim lease
        lease_secs: u64,
    },
}

/// Result type for configuration loading
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bind address
    pub addr: SocketAddr,
    /// Shared secret per provider; absent providers fail closed
    pub secrets: HashMap<ProviderId, WebhookSecret>,
    /// Lease before an unfinished claim may be taken over
    pub claim_lease: Duration,
    /// How long finished idempotency records are kept
    pub retention: Duration,
    /// Idempotency store capacity
    pub max_records: usize,
    /// Upper bound on processor wall time
    pub processing_timeout: Duration,
    /// Request body limit in bytes
    pub max_body_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR,
            secrets: HashMap::new(),
            claim_lease: DEFAULT_CLAIM_LEASE,
            retention: DEFAULT_RETENTION,
            max_records: DEFAULT_MAX_RECORDS,
            processing_timeout: DEFAULT_PROCESSING_TIMEOUT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load configuration through `lookup`, which returns a variable's
    /// value or `None` when unset.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut secrets = HashMap::new();
        for provider in ProviderId::ALL {
            if let Some(secret) = lookup(provider.secret_env_var()) {
                let secret = secret.trim();
                if !secret.is_empty() {
                    secrets.insert(provider, WebhookSecret::new(secret));
                }
            }
        }

        let addr = parse_var(&lookup, "WEBHOOK_GATEWAY_ADDR")?.unwrap_or(DEFAULT_ADDR);

        let claim_lease = positive_secs(&lookup, "WEBHOOK_CLAIM_LEASE_SECS", DEFAULT_CLAIM_LEASE)?;
        let retention = positive_secs(&lookup, "WEBHOOK_RETENTION_SECS", DEFAULT_RETENTION)?;
        let processing_timeout = positive_secs(
            &lookup,
            "WEBHOOK_PROCESSING_TIMEOUT_SECS",
            DEFAULT_PROCESSING_TIMEOUT,
        )?;
        if processing_timeout >= claim_lease {
            return Err(ConfigError::TimeoutExceedsLease {
                timeout_secs: processing_timeout.as_secs(),
                lease_secs: claim_lease.as_secs(),
            });
        }

        let max_records: usize =
            parse_var(&lookup, "WEBHOOK_MAX_RECORDS")?.unwrap_or(DEFAULT_MAX_RECORDS);
        if max_records == 0 {
            return Err(ConfigError::Zero("WEBHOOK_MAX_RECORDS"));
        }
        let max_body_bytes: usize =
            parse_var(&lookup, "WEBHOOK_MAX_BODY_BYTES")?.unwrap_or(DEFAULT_MAX_BODY_BYTES);
        if max_body_bytes == 0 {
            return Err(ConfigError::Zero("WEBHOOK_MAX_BODY_BYTES"));
        }

        Ok(Self {
            addr,
            secrets,
            claim_lease,
            retention,
            max_records,
            processing_timeout,
            max_body_bytes,
        })
    }

    /// Providers with no secret, sorted.
    pub fn unconfigured_providers(&self) -> Vec<ProviderId> {
        ProviderId::ALL
            .into_iter()
            .filter(|p| !self.secrets.contains_key(p))
            .collect()
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str) -> ConfigResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                var,
                reason: e.to_string(),
            }),
    }
}

fn positive_secs<F>(lookup: &F, var: &'static str, default: Duration) -> ConfigResult<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    match parse_var::<F, u64>(lookup, var)? {
        None => Ok(default),
        Some(0) => Err(ConfigError::Zero(var)),
        Some(secs) => Ok(Duration::from_secs(secs)),
    }
}
