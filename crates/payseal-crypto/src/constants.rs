//! Protocol constants.
//!
//! Byte widths and domain-separation strings are normative for wire
//! compatibility and MUST NOT change between releases.

/// Width of every chain value (salt, proof, commitment) in bytes.
pub const VALUE_SIZE: usize = 32;

/// Width of AES-256-GCM keys in bytes.
pub const KEY_SIZE: usize = 32;

/// Width of AES-256-GCM nonces in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Width of AES-256-GCM authentication tags in bytes (128 bits).
pub const TAG_SIZE: usize = 16;

/// Length of a generated recovery code in characters.
pub const RECOVERY_CODE_LENGTH: usize = 50;

/// Domain separation for the vault recovery keypair seed.
pub const DOMAIN_RECOVERY_KEY: &str = "payseal:vault:recovery-key:v1";

/// Domain separation for the vault sealing key.
pub const DOMAIN_VAULT_SEAL: &str = "payseal:vault:seal-key:v1";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widths() {
        assert_eq!(VALUE_SIZE, 32);
        assert_eq!(KEY_SIZE, 32);
        assert_eq!(NONCE_SIZE, 12);
        assert_eq!(TAG_SIZE, 16);
    }

    #[test]
    fn test_domain_strings_are_versioned() {
        for d in [DOMAIN_RECOVERY_KEY, DOMAIN_VAULT_SEAL] {
            assert!(d.starts_with("payseal:"), "{d} missing payseal: prefix");
            assert!(d.ends_with(":v1"), "{d} missing :v1 version tag");
        }
    }
}
