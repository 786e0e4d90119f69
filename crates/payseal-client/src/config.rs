//! Client configuration.

use std::path::PathBuf;
use std::time::Duration;

use payseal_crypto::B32;

use crate::error::{ClientError, Result};

/// Local client settings. Protocol-level parameters (global salt, lockbox
/// salt, amount limits) come from the ledger once at connect time; see
/// [`ProtocolParams`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the ledger server.
    pub base_url: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Hard deadline wrapping an entire sign-up attempt.
    pub signup_deadline: Duration,
    /// Session lifetime in seconds; the session dies at `now + session_ttl`.
    pub session_ttl: u64,
    /// Token denomination used for display and sends.
    pub token: String,
    /// Micro-unit decimals for the display token.
    pub decimals: u32,
    /// Hard cap on pagination hops during a full backfill.
    pub max_ledger_pages: u32,
    /// Page size for the recent-poll fetch (protocol range 2–8).
    pub recent_batch_size: u32,
    /// Page size for backfill fetches.
    pub backfill_batch_size: u32,
    /// Root directory for per-account caches and the persisted session.
    pub data_dir: PathBuf,
}

impl ClientConfig {
    /// Load configuration from environment variables, with defaults for
    /// everything unset.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("PAYSEAL_SERVER")
            .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());

        let data_dir = match std::env::var("PAYSEAL_DATA_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => default_data_dir(),
        };

        let session_ttl = std::env::var("PAYSEAL_SESSION_TTL_SECONDS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse()
            .map_err(|e| ClientError::Storage(format!("invalid PAYSEAL_SESSION_TTL_SECONDS: {e}")))?;

        Ok(Self {
            session_ttl,
            data_dir,
            ..Self::with_base_url(&base_url)
        })
    }

    /// A configuration pointing at `base_url` with default knobs.
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            signup_deadline: Duration::from_secs(45),
            session_ttl: 3600,
            token: "USD".to_string(),
            decimals: 6,
            max_ledger_pages: 64,
            recent_batch_size: 4,
            backfill_batch_size: 8,
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".payseal")
}

/// Protocol parameters published by the ledger. Fetched once per process
/// and treated as constant afterwards.
#[derive(Debug, Clone, Copy)]
pub struct ProtocolParams {
    /// The process-wide hash salt every derivation is keyed under.
    pub global_salt: B32,
    /// Salt folded into lockbox proof derivation.
    pub lockbox_salt: B32,
    /// Minimum lockbox send amount, in micro-units.
    pub min_send_amount: u128,
    /// Largest amount sendable without a claim passphrase, in micro-units.
    pub passphrase_free_limit: u128,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::with_base_url("http://ledger.example/");
        assert_eq!(config.base_url, "http://ledger.example");
        assert_eq!(config.decimals, 6);
        assert!((2..=8).contains(&config.recent_batch_size));
    }
}
