//! Client error taxonomy.

use std::time::Duration;

use thiserror::Error;

use payseal_crypto::CryptoError;

/// Failures surfaced by the protocol engines.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Malformed cryptographic input or derivation failure.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Another device or session already committed this chain link.
    #[error("someone else is already using this credential or lockbox")]
    CommittedByAnotherParty,

    /// The session's absolute expiry has passed.
    #[error("session has expired; sign in again")]
    SessionExpired,

    /// An operation requiring a session was called without one.
    #[error("not signed in")]
    NotSignedIn,

    /// Sign-in credentials do not match a registered account.
    #[error("invalid username or password")]
    InvalidCredentials,

    /// Sign-up collided with an existing registration.
    #[error("an account with these credentials already exists")]
    CredentialsAlreadyExist,

    /// Send amount below the protocol minimum.
    #[error("amount is below the minimum send amount")]
    AmountTooSmall,

    /// Send amount exceeds the spendable balance.
    #[error("amount exceeds the available balance")]
    InsufficientBalance,

    /// A passphrase is required for amounts above the free limit.
    #[error("a passphrase is required for this amount")]
    PassphraseRequired,

    /// The lockbox is not in a state that allows the requested action.
    #[error("lockbox is {0}")]
    LockboxUnavailable(&'static str),

    /// An amount string could not be parsed.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// The caller-imposed deadline elapsed. The in-flight commit may still
    /// have landed remotely; do not assume the operation was a no-op.
    #[error("operation timed out")]
    Timeout,

    /// The ledger could not be reached at all.
    #[error("ledger server is unreachable")]
    ServerUnreachable,

    /// The ledger asked us to back off.
    #[error("rate limited; retry after {}s", retry_after.as_secs())]
    RateLimited {
        /// Suggested wait before retrying.
        retry_after: Duration,
    },

    /// Non-2xx response from the ledger.
    #[error("ledger error ({status}): {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Server-provided message, or a placeholder.
        message: String,
    },

    /// A 2xx response whose body did not match the expected shape.
    #[error("malformed ledger response: {0}")]
    InvalidResponse(String),

    /// Local cache read/write failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::ServerUnreachable
        } else if let Some(status) = err.status() {
            Self::Server {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            Self::ServerUnreachable
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;
