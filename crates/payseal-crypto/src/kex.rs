//! X25519 key agreement and HKDF-SHA256 derivation.

use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::errors::CryptoError;
use crate::hex::B32;

/// Derive a key of `output_len` bytes using HKDF-SHA256.
pub fn hkdf_derive(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    output_len: usize,
) -> Result<Vec<u8>, CryptoError> {
    let hkdf = Hkdf::<Sha256>::new(salt, ikm);
    let mut output = vec![0u8; output_len];
    hkdf.expand(info, &mut output).map_err(|_| CryptoError::Hkdf)?;
    Ok(output)
}

/// Derive a 32-byte key using HKDF-SHA256.
pub fn hkdf_derive_32(ikm: &[u8], salt: Option<&[u8]>, info: &[u8]) -> Result<B32, CryptoError> {
    let output = hkdf_derive(ikm, salt, info, 32)?;
    B32::from_slice(&output)
}

/// Generate a fresh X25519 keypair from the OS CSPRNG.
///
/// The secret is a `StaticSecret` so it can be used for more than one
/// exchange within a flow; it still lives only in memory.
pub fn ephemeral_keypair() -> (StaticSecret, B32) {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    (secret, B32(public.to_bytes()))
}

/// Build an X25519 keypair deterministically from a 32-byte seed.
pub fn keypair_from_seed(seed: &B32) -> (StaticSecret, B32) {
    let secret = StaticSecret::from(*seed.as_bytes());
    let public = PublicKey::from(&secret);
    (secret, B32(public.to_bytes()))
}

/// X25519 shared secret between `secret` and a peer public key.
pub fn shared_secret(secret: &StaticSecret, peer_public: &B32) -> B32 {
    let peer = PublicKey::from(*peer_public.as_bytes());
    B32(secret.diffie_hellman(&peer).to_bytes())
}
