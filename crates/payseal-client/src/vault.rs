//! Recovery vault.
//!
//! A second commitment chain, rooted directly at the global salt, stores
//! the account password encrypted to an X25519 recovery key. The private
//! half is never stored anywhere: it re-derives from a one-time recovery
//! code shown to the user at setup. Every re-encryption samples a fresh
//! ephemeral keypair, so rotated payloads do not share key material.

use std::sync::Arc;

use payseal_crypto::{
    aead, ephemeral_keypair, generate_recovery_code, hkdf_derive_32, recovery_keypair_from_code,
    shared_secret, vault_chain, ChainSecret, CryptoError, SealedBox, B32, DOMAIN_VAULT_SEAL,
    NONCE_SIZE, TAG_SIZE,
};

use crate::api::{CommitHashes, LedgerApi, VaultBlob, VaultChangeRequest, VaultInitRequest};
use crate::config::ProtocolParams;
use crate::error::{ClientError, Result};
use crate::guard::CommitGuard;
use crate::session::Session;

/// Engine for vault setup, password recovery and rotation.
pub struct RecoveryVault {
    api: Arc<dyn LedgerApi>,
    session: Arc<Session>,
    guard: Arc<CommitGuard>,
    params: ProtocolParams,
}

impl RecoveryVault {
    /// Build the engine.
    pub fn new(
        api: Arc<dyn LedgerApi>,
        session: Arc<Session>,
        guard: Arc<CommitGuard>,
        params: ProtocolParams,
    ) -> Self {
        Self {
            api,
            session,
            guard,
            params,
        }
    }

    /// Set up the vault for the signed-in account and return the one-time
    /// recovery code. The caller must show the code exactly once; it is
    /// not retrievable afterwards.
    ///
    /// `password` re-confirms the account password; it is what gets sealed
    /// into the vault.
    pub async fn initialize(&self, password: &str) -> Result<String> {
        let session = self.session.snapshot().await?;

        // The supplied password must actually be this account's password.
        let check = ChainSecret::new(&session.username, password)
            .derive_initial(&self.params.global_salt)?;
        if check.salt != session.salt {
            return Err(ClientError::InvalidCredentials);
        }

        let vault = vault_chain(&session.input_data, &self.params.global_salt)?;

        let code = generate_recovery_code();
        let (_, recovery_pk) = recovery_keypair_from_code(&code, &self.params.global_salt)?;
        let blob = seal_to_recovery_key(&recovery_pk, password)?;

        let hashes = CommitHashes::single(&vault.commitment, &self.params.global_salt)?;
        let request = VaultInitRequest {
            commitment: vault.commitment,
            blob,
        };
        self.guard
            .protect_vault(&hashes, || async {
                self.api.vault_initialize(&request).await
            })
            .await?;

        tracing::info!(username = %session.username, "recovery vault initialized");
        Ok(code)
    }

    /// Decrypt the account password from the vault using a recovery code.
    /// Works signed-out; a wrong code fails to locate or decrypt the blob.
    pub async fn recover_password(&self, code: &str) -> Result<String> {
        let (secret, public) = recovery_keypair_from_code(code, &self.params.global_salt)?;
        let blob = self.api.vault_get_blob(&public).await?;

        let shared = shared_secret(&secret, &blob.ephemeral_pk);
        let key = hkdf_derive_32(shared.as_bytes(), None, DOMAIN_VAULT_SEAL.as_bytes())?;
        let sealed = decode_blob(&blob)?;
        let plain = aead::open(&key, &sealed)?;
        String::from_utf8(plain)
            .map_err(|_| ClientError::InvalidResponse("vault payload is not UTF-8".into()))
    }

    /// Re-encrypt the vault for a changed password.
    ///
    /// Keeps the existing recovery public key (the user's code stays
    /// valid) under a freshly sampled ephemeral keypair, and advances the
    /// vault chain from the old input to the new one. A vault that was
    /// never initialized is left alone.
    pub(crate) async fn rotate(
        &self,
        old_input_data: &str,
        new_input_data: &str,
        new_password: &str,
    ) -> Result<()> {
        let old_vault = vault_chain(old_input_data, &self.params.global_salt)?;
        let new_vault = vault_chain(new_input_data, &self.params.global_salt)?;

        let recovery_pk = self.api.vault_get_recovery_pk(&old_vault.commitment).await?;
        if recovery_pk.is_zero() {
            tracing::debug!("no recovery vault registered; skipping rotation");
            return Ok(());
        }

        let blob = seal_to_recovery_key(&recovery_pk, new_password)?;

        let hashes = CommitHashes::pair(
            &old_vault.commitment,
            &new_vault.commitment,
            &self.params.global_salt,
        )?;
        let request = VaultChangeRequest {
            proof: old_vault.proof,
            next_commitment: new_vault.commitment,
            blob,
        };
        self.guard
            .protect_vault(&hashes, || async {
                self.api.vault_change_password(&request).await
            })
            .await?;

        tracing::info!("recovery vault rotated");
        Ok(())
    }
}

/// Seal `password` to `recovery_pk` under a fresh ephemeral keypair.
fn seal_to_recovery_key(recovery_pk: &B32, password: &str) -> Result<VaultBlob> {
    let (ephemeral_secret, ephemeral_pk) = ephemeral_keypair();
    let shared = shared_secret(&ephemeral_secret, recovery_pk);
    let key = hkdf_derive_32(shared.as_bytes(), None, DOMAIN_VAULT_SEAL.as_bytes())?;
    let sealed = aead::seal(&key, password.as_bytes())?;

    Ok(VaultBlob {
        recovery_pk: *recovery_pk,
        ephemeral_pk,
        ciphertext: hex::encode(&sealed.ciphertext),
        tag: hex::encode(sealed.tag),
        nonce: hex::encode(sealed.nonce),
    })
}

/// Parse the hex fields of a wire blob back into a [`SealedBox`].
fn decode_blob(blob: &VaultBlob) -> Result<SealedBox> {
    let ciphertext = hex::decode(&blob.ciphertext).map_err(|_| CryptoError::NotHex)?;
    let tag_bytes = hex::decode(&blob.tag).map_err(|_| CryptoError::NotHex)?;
    let nonce_bytes = hex::decode(&blob.nonce).map_err(|_| CryptoError::NotHex)?;

    let tag: [u8; TAG_SIZE] = tag_bytes
        .try_into()
        .map_err(|v: Vec<u8>| CryptoError::InvalidLength {
            expected: TAG_SIZE,
            got: v.len(),
        })?;
    let nonce: [u8; NONCE_SIZE] =
        nonce_bytes
            .try_into()
            .map_err(|v: Vec<u8>| CryptoError::InvalidLength {
                expected: NONCE_SIZE,
                got: v.len(),
            })?;

    Ok(SealedBox {
        ciphertext,
        tag,
        nonce,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_and_decode_roundtrip() {
        let (secret, public) = recovery_keypair_from_code("some-code", &B32([1; 32])).unwrap();
        let blob = seal_to_recovery_key(&public, "hunter2").unwrap();

        let shared = shared_secret(&secret, &blob.ephemeral_pk);
        let key = hkdf_derive_32(shared.as_bytes(), None, DOMAIN_VAULT_SEAL.as_bytes()).unwrap();
        let sealed = decode_blob(&blob).unwrap();
        assert_eq!(aead::open(&key, &sealed).unwrap(), b"hunter2");
    }

    #[test]
    fn test_rotation_uses_fresh_ephemeral_keys() {
        let (_, public) = recovery_keypair_from_code("some-code", &B32([1; 32])).unwrap();
        let a = seal_to_recovery_key(&public, "hunter2").unwrap();
        let b = seal_to_recovery_key(&public, "hunter2").unwrap();
        assert_ne!(a.ephemeral_pk, b.ephemeral_pk);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_truncated_tag_is_rejected() {
        let (_, public) = recovery_keypair_from_code("some-code", &B32([1; 32])).unwrap();
        let mut blob = seal_to_recovery_key(&public, "hunter2").unwrap();
        blob.tag = "abcd".into();
        assert!(matches!(
            decode_blob(&blob),
            Err(ClientError::Crypto(CryptoError::InvalidLength { .. }))
        ));
    }
}
