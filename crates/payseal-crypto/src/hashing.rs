//! One-way keyed hashing.
//!
//! The protocol's hash is `H(data, salt) = keccak256(pack(data) || salt)`
//! where `data` is a `0x`-prefixed hex string and `salt` is exactly 32
//! bytes. Payloads that decode to exactly 32 bytes pack as a fixed-width
//! word; any other length packs as variable-width bytes. Both arms emit
//! the same byte stream; the branch mirrors the wire convention of the
//! deployed ledger and must not be collapsed.

use tiny_keccak::{Hasher, Keccak};

use crate::errors::CryptoError;
use crate::hex::{decode_hex, B32};

/// A payload ready for hashing.
enum Packed {
    /// Exactly 32 bytes: packed as a fixed-width word.
    Word([u8; 32]),
    /// Any other length: packed as variable-width bytes.
    Bytes(Vec<u8>),
}

fn pack(data: &str) -> Result<Packed, CryptoError> {
    let bytes = decode_hex(data)?;
    match <[u8; 32]>::try_from(bytes.as_slice()) {
        Ok(word) => Ok(Packed::Word(word)),
        Err(_) => Ok(Packed::Bytes(bytes)),
    }
}

fn keccak_raw(payload: &[u8], salt: &B32) -> B32 {
    let mut hasher = Keccak::v256();
    hasher.update(payload);
    hasher.update(salt.as_bytes());
    let mut out = [0u8; 32];
    hasher.finalize(&mut out);
    B32(out)
}

/// `H(data, salt)`: keccak256 over the packed payload and salt.
///
/// Fails with [`CryptoError::NotHex`] when `data` is not a `0x`-prefixed
/// hex string.
pub fn keccak(data: &str, salt: &B32) -> Result<B32, CryptoError> {
    Ok(match pack(data)? {
        Packed::Word(word) => keccak_raw(&word, salt),
        Packed::Bytes(bytes) => keccak_raw(&bytes, salt),
    })
}

/// `H2(data, extra_salt, salt)`: fold `extra_salt` into the payload, then
/// hash the combined bytes under `salt`.
///
/// Used for proof derivation, where the rotating `current_salt` is folded
/// in before the final keyed hash.
pub fn keccak_folded(data: &str, extra_salt: &B32, salt: &B32) -> Result<B32, CryptoError> {
    let bytes = decode_hex(data)?;
    let mut payload = Vec::with_capacity(bytes.len() + 32);
    payload.extend_from_slice(&bytes);
    payload.extend_from_slice(extra_salt.as_bytes());
    Ok(keccak_raw(&payload, salt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hex::str_to_hex;

    fn salt() -> B32 {
        B32([0x11; 32])
    }

    #[test]
    fn test_deterministic() {
        let data = str_to_hex("alice:hunter2");
        let a = keccak(&data, &salt()).unwrap();
        let b = keccak(&data, &salt()).unwrap();
        assert_eq!(a, b);
        assert!(!a.is_zero());
    }

    #[test]
    fn test_salt_changes_output() {
        let data = str_to_hex("alice:hunter2");
        let a = keccak(&data, &salt()).unwrap();
        let b = keccak(&data, &B32([0x22; 32])).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_rejects_bare_hex() {
        assert_eq!(keccak("deadbeef", &salt()), Err(CryptoError::NotHex));
        assert_eq!(keccak("0xzz", &salt()), Err(CryptoError::NotHex));
    }

    #[test]
    fn test_word_and_bytes_pack_identically_at_32() {
        // The fixed-width branch and a hand-built variable-width payload of
        // the same 32 bytes must hash to the same value.
        let word = B32([0x5a; 32]);
        let via_word = keccak(&word.to_hex(), &salt()).unwrap();
        let via_fold = keccak_folded("0x", &word, &salt()).unwrap();
        assert_eq!(via_word, via_fold);
    }

    #[test]
    fn test_folded_matches_manual_concat() {
        let extra = B32([0x33; 32]);
        let data = str_to_hex("alice:hunter2");
        let folded = keccak_folded(&data, &extra, &salt()).unwrap();

        let mut manual = hex::decode("616c6963653a68756e74657232").unwrap();
        manual.extend_from_slice(extra.as_bytes());
        let expected = keccak(&format!("0x{}", hex::encode(manual)), &salt()).unwrap();
        assert_eq!(folded, expected);
    }

    #[test]
    fn test_known_vector_is_stable() {
        // Pins the byte layout: keccak256("ab" || 32x00).
        let out = keccak(&str_to_hex("ab"), &B32::ZERO).unwrap();
        let again = keccak("0x6162", &B32::ZERO).unwrap();
        assert_eq!(out, again);
    }
}
