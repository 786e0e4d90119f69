//! Authenticated encryption for vault payloads.
//!
//! AES-256-GCM with a fresh random 96-bit nonce per seal. Ciphertext and
//! authentication tag travel as separate fields on the wire.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;

use crate::constants::{NONCE_SIZE, TAG_SIZE};
use crate::errors::CryptoError;
use crate::hex::B32;

/// The output of one [`seal`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBox {
    /// Ciphertext without the trailing tag.
    pub ciphertext: Vec<u8>,
    /// Authentication tag.
    pub tag: [u8; TAG_SIZE],
    /// Nonce used for this seal; never reused for the same key.
    pub nonce: [u8; NONCE_SIZE],
}

/// Encrypt `plaintext` under `key` with a fresh random nonce.
pub fn seal(key: &B32, plaintext: &[u8]) -> Result<SealedBox, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);

    let mut combined = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::AuthTagMismatch)?;

    if combined.len() < TAG_SIZE {
        return Err(CryptoError::InvalidLength {
            expected: TAG_SIZE,
            got: combined.len(),
        });
    }
    let tag_bytes = combined.split_off(combined.len() - TAG_SIZE);
    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(&tag_bytes);

    Ok(SealedBox {
        ciphertext: combined,
        tag,
        nonce,
    })
}

/// Decrypt a [`SealedBox`]; the exact inverse of [`seal`].
///
/// Fails with [`CryptoError::AuthTagMismatch`] when the key is wrong or any
/// field was tampered with.
pub fn open(key: &B32, sealed: &SealedBox) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

    let mut combined = Vec::with_capacity(sealed.ciphertext.len() + TAG_SIZE);
    combined.extend_from_slice(&sealed.ciphertext);
    combined.extend_from_slice(&sealed.tag);

    cipher
        .decrypt(Nonce::from_slice(&sealed.nonce), combined.as_slice())
        .map_err(|_| CryptoError::AuthTagMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = B32::random();
        let sealed = seal(&key, b"correct horse battery staple").unwrap();
        let plain = open(&key, &sealed).unwrap();
        assert_eq!(plain, b"correct horse battery staple");
    }

    #[test]
    fn test_fresh_nonce_per_seal() {
        let key = B32::random();
        let a = seal(&key, b"x").unwrap();
        let b = seal(&key, b"x").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = B32::random();
        let mut sealed = seal(&key, b"payload").unwrap();
        sealed.ciphertext[0] ^= 0x01;
        assert_eq!(open(&key, &sealed), Err(CryptoError::AuthTagMismatch));
    }

    #[test]
    fn test_tampered_tag_fails() {
        let key = B32::random();
        let mut sealed = seal(&key, b"payload").unwrap();
        sealed.tag[0] ^= 0x01;
        assert_eq!(open(&key, &sealed), Err(CryptoError::AuthTagMismatch));
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = seal(&B32::random(), b"payload").unwrap();
        assert_eq!(
            open(&B32::random(), &sealed),
            Err(CryptoError::AuthTagMismatch)
        );
    }
}
