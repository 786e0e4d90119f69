//! # payseal-crypto
//!
//! Cryptographic primitives for the payseal commitment-chain protocol.
//!
//! An account is represented by a rotating chain of one-way keccak256
//! commitments (`salt → proof → commitment`) rather than a stored secret.
//! This crate provides the hash and packing rules for that chain, the
//! lockbox (escrow) proof derivation, the recovery-vault key material
//! (X25519 + HKDF-SHA256 + AES-256-GCM), and the shared byte/hex types
//! used on the wire.
//!
//! Nothing here performs I/O; the protocol engines live in
//! `payseal-client`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aead;
pub mod chain;
pub mod constants;
pub mod errors;
pub mod hashing;
pub mod hex;
pub mod kex;
pub mod lockbox;
pub mod recovery;

pub use aead::{open, seal, SealedBox};
pub use chain::{ChainLink, ChainSecret, ChainState};
pub use constants::*;
pub use errors::CryptoError;
pub use hashing::{keccak, keccak_folded};
pub use hex::{parse_salt, str_to_hex, B32};
pub use kex::{ephemeral_keypair, hkdf_derive_32, keypair_from_seed, shared_secret};
pub use lockbox::{derive_lockbox_commitment, derive_lockbox_proof};
pub use recovery::{
    generate_recovery_code, recovery_keypair_from_code, vault_chain, VaultChain,
};

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CryptoError>;
