//! Fixed-width byte values and hex helpers.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroize;

use crate::errors::CryptoError;

/// A 32-byte protocol value (salt, proof, commitment, key).
///
/// Rendered as a `0x`-prefixed lowercase hex string wherever it crosses the
/// wire or a cache file. The all-zero value is the protocol's universal
/// "absent / terminal" sentinel: an unset recovery key, an exhausted
/// pagination cursor, a missing salt.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct B32(pub [u8; 32]);

impl B32 {
    /// The all-zero sentinel.
    pub const ZERO: B32 = B32([0u8; 32]);

    /// True when every byte is zero.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Build from a byte slice, failing unless it is exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidLength {
                expected: 32,
                got: bytes.len(),
            })?;
        Ok(Self(arr))
    }

    /// Parse a `0x`-prefixed hex string of exactly 32 bytes.
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let body = s.strip_prefix("0x").ok_or(CryptoError::NotHex)?;
        let bytes = hex::decode(body).map_err(|_| CryptoError::NotHex)?;
        Self::from_slice(&bytes)
    }

    /// Render as a `0x`-prefixed lowercase hex string.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// A fresh random value from the OS CSPRNG.
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl fmt::Display for B32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for B32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B32({})", self.to_hex())
    }
}

impl FromStr for B32 {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Zeroize for B32 {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

impl Serialize for B32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for B32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(de::Error::custom)
    }
}

/// Encode a UTF-8 string as a `0x`-prefixed hex string.
///
/// This is how `"username:password"` and other textual inputs enter the
/// hash layer.
pub fn str_to_hex(s: &str) -> String {
    format!("0x{}", hex::encode(s.as_bytes()))
}

/// Decode a `0x`-prefixed hex string into raw bytes.
pub(crate) fn decode_hex(s: &str) -> Result<Vec<u8>, CryptoError> {
    let body = s.strip_prefix("0x").ok_or(CryptoError::NotHex)?;
    hex::decode(body).map_err(|_| CryptoError::NotHex)
}

/// Parse a salt arriving as a hex string.
///
/// Unlike [`B32::from_hex`], a value of the wrong width is reported as
/// [`CryptoError::InvalidSalt`]: salts must be exactly 32 bytes before they
/// may enter the hash layer.
pub fn parse_salt(s: &str) -> Result<B32, CryptoError> {
    let bytes = decode_hex(s)?;
    B32::from_slice(&bytes).map_err(|_| CryptoError::InvalidSalt)
}
