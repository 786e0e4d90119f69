//! Error types for cryptographic operations.

use thiserror::Error;

/// Failures surfaced by derivation and sealing primitives.
///
/// Every variant is fatal to the operation that produced it; none of these
/// are retried silently by callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Hash input was not a `0x`-prefixed hex string.
    #[error("hash input is not a 0x-prefixed hex string")]
    NotHex,

    /// A salt value was not exactly 32 bytes.
    #[error("salt must be exactly 32 bytes")]
    InvalidSalt,

    /// A derivation step produced an empty or all-zero value.
    #[error("derivation produced a degenerate (zero) value")]
    Derivation,

    /// AEAD authentication failed; the payload is corrupted or hostile.
    #[error("authentication tag mismatch")]
    AuthTagMismatch,

    /// HKDF expansion failed.
    #[error("HKDF key derivation failed")]
    Hkdf,

    /// A fixed-width value had the wrong length.
    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// Required byte width.
        expected: usize,
        /// Actual byte width.
        got: usize,
    },
}
