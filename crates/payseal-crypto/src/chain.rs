//! Commitment-chain derivation.
//!
//! An account's identity is the head of a one-way chain:
//!
//! ```text
//! input_data = hex("username:password")
//! salt       = H(input_data)            (fixed at creation)
//! proof      = H2(input_data, current_salt)
//! commitment = H(proof)
//! ```
//!
//! `current_salt` starts equal to `salt` and rotates with every protected
//! mutation (`next_current_salt = H(current_salt)`), or is looked up from
//! the ledger's salt registry when another device may have rotated it.
//! Only the commitment is ever registered publicly; the proof is revealed
//! to authenticate, and the link above it becomes the new head.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::errors::CryptoError;
use crate::hashing::{keccak, keccak_folded};
use crate::hex::{str_to_hex, B32};

/// The in-memory account secret. Wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ChainSecret {
    username: String,
    input_data: String,
}

/// One full set of chain values for a given `current_salt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainState {
    /// `H(input_data)`; fixed at creation, the registry key for this account.
    pub salt: B32,
    /// The rotating salt currently registered for this account.
    pub current_salt: B32,
    /// `H2(input_data, current_salt)`; revealed to authenticate a mutation.
    pub proof: B32,
    /// `H(proof)`; the public head of the chain.
    pub commitment: B32,
}

/// The next link, derived before a protected mutation and installed only
/// after the ledger confirms it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainLink {
    /// `H(current_salt)`.
    pub next_current_salt: B32,
    /// `H2(input_data, next_current_salt)`.
    pub next_proof: B32,
    /// `H(next_proof)`.
    pub next_commitment: B32,
}

impl ChainSecret {
    /// Build the secret for a `(username, password)` pair.
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_owned(),
            input_data: str_to_hex(&format!("{username}:{password}")),
        }
    }

    /// The account's username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The hex-encoded `"username:password"` hash input.
    pub fn input_data(&self) -> &str {
        &self.input_data
    }

    /// Initial derivation for a brand-new account: `current_salt` starts at
    /// the base salt.
    pub fn derive_initial(&self, global_salt: &B32) -> Result<ChainState, CryptoError> {
        let salt = nonzero(keccak(&self.input_data, global_salt)?)?;
        rederive(&self.input_data, salt, salt, global_salt)
    }

    /// Recompute the chain head from a `current_salt` obtained from the
    /// ledger's salt registry (remote-lookup mode).
    pub fn rederive(
        &self,
        salt: B32,
        current_salt: B32,
        global_salt: &B32,
    ) -> Result<ChainState, CryptoError> {
        rederive(&self.input_data, salt, current_salt, global_salt)
    }
}

/// Recompute `proof` and `commitment` for an explicit `current_salt`.
pub fn rederive(
    input_data: &str,
    salt: B32,
    current_salt: B32,
    global_salt: &B32,
) -> Result<ChainState, CryptoError> {
    let proof = nonzero(keccak_folded(input_data, &current_salt, global_salt)?)?;
    let commitment = nonzero(keccak(&proof.to_hex(), global_salt)?)?;
    Ok(ChainState {
        salt,
        current_salt,
        proof,
        commitment,
    })
}

/// Derive the next link from the current salt (local chain-advance mode).
///
/// Pure and deterministic: a retry after a failed server call derives the
/// identical link again.
pub fn advance(
    input_data: &str,
    current_salt: &B32,
    global_salt: &B32,
) -> Result<ChainLink, CryptoError> {
    let next_current_salt = nonzero(keccak(&current_salt.to_hex(), global_salt)?)?;
    let next_proof = nonzero(keccak_folded(input_data, &next_current_salt, global_salt)?)?;
    let next_commitment = nonzero(keccak(&next_proof.to_hex(), global_salt)?)?;
    Ok(ChainLink {
        next_current_salt,
        next_proof,
        next_commitment,
    })
}

fn nonzero(value: B32) -> Result<B32, CryptoError> {
    if value.is_zero() {
        Err(CryptoError::Derivation)
    } else {
        Ok(value)
    }
}
