//! Recovery-vault key material.
//!
//! The vault is a second, independent commitment chain rooted directly at
//! the global salt:
//!
//! ```text
//! rv_proof      = H2(input_data, global_salt)
//! rv_commitment = H(rv_proof)
//! ```
//!
//! Vault setup generates a one-time recovery code; the code deterministically
//! yields an X25519 keypair whose public half encrypts the account password
//! at rest on the ledger. Anyone holding the code can re-derive the private
//! half and decrypt.

use rand::Rng;
use x25519_dalek::StaticSecret;

use crate::constants::{DOMAIN_RECOVERY_KEY, RECOVERY_CODE_LENGTH};
use crate::errors::CryptoError;
use crate::hashing::{keccak, keccak_folded};
use crate::hex::{str_to_hex, B32};
use crate::kex::{hkdf_derive_32, keypair_from_seed};

/// The recovery chain head for an account secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VaultChain {
    /// `H2(input_data, global_salt)`.
    pub proof: B32,
    /// `H(proof)`; the vault's registry key.
    pub commitment: B32,
}

/// Derive the vault chain for an account's `input_data`.
pub fn vault_chain(input_data: &str, global_salt: &B32) -> Result<VaultChain, CryptoError> {
    let proof = keccak_folded(input_data, global_salt, global_salt)?;
    let commitment = keccak(&proof.to_hex(), global_salt)?;
    if proof.is_zero() || commitment.is_zero() {
        return Err(CryptoError::Derivation);
    }
    Ok(VaultChain { proof, commitment })
}

/// Generate a random recovery code: 50 alphanumeric characters.
pub fn generate_recovery_code() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789";
    let mut rng = rand::thread_rng();
    (0..RECOVERY_CODE_LENGTH)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Derive the vault keypair from a recovery code.
///
/// `seed = HKDF(H(code))`, so the same code always yields the same keypair.
pub fn recovery_keypair_from_code(
    code: &str,
    global_salt: &B32,
) -> Result<(StaticSecret, B32), CryptoError> {
    let code_hash = keccak(&str_to_hex(code), global_salt)?;
    let seed = hkdf_derive_32(code_hash.as_bytes(), None, DOMAIN_RECOVERY_KEY.as_bytes())?;
    Ok(keypair_from_seed(&seed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainSecret;

    fn global() -> B32 {
        B32([0x42; 32])
    }

    #[test]
    fn test_vault_chain_independent_of_primary_chain() {
        let secret = ChainSecret::new("alice", "hunter2");
        let primary = secret.derive_initial(&global()).unwrap();
        let vault = vault_chain(secret.input_data(), &global()).unwrap();
        assert_ne!(vault.commitment, primary.commitment);
        assert_ne!(vault.proof, primary.proof);
    }

    #[test]
    fn test_recovery_code_shape() {
        let code = generate_recovery_code();
        assert_eq!(code.len(), RECOVERY_CODE_LENGTH);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(code, generate_recovery_code());
    }

    #[test]
    fn test_keypair_is_deterministic_in_code() {
        let code = generate_recovery_code();
        let (_, pk1) = recovery_keypair_from_code(&code, &global()).unwrap();
        let (_, pk2) = recovery_keypair_from_code(&code, &global()).unwrap();
        assert_eq!(pk1, pk2);

        let (_, other) = recovery_keypair_from_code("not-the-code", &global()).unwrap();
        assert_ne!(pk1, other);
    }
}
