//! Account flows: sign-up, sign-in, sign-out, password change.
//!
//! Sign-in and balance refresh re-derive the chain head from the ledger's
//! salt registry (another device may have rotated it); protected mutations
//! advance the chain locally. The registry is the arbiter whenever the two
//! disagree.

use std::sync::Arc;
use std::time::Duration;

use payseal_crypto::ChainSecret;

use crate::api::{ChangePasswordRequest, CommitHashes, LedgerApi, RegisterRequest};
use crate::config::ProtocolParams;
use crate::error::{ClientError, Result};
use crate::guard::CommitGuard;
use crate::session::{CryptoState, Session};
use crate::util::current_timestamp;

/// Register a new account and install its session.
///
/// The whole attempt runs under a hard deadline; on timeout the in-flight
/// commit may still have landed remotely, so the caller must not assume
/// the account was not created.
pub async fn sign_up(
    api: &Arc<dyn LedgerApi>,
    guard: &CommitGuard,
    session: &Session,
    params: &ProtocolParams,
    session_ttl: u64,
    deadline: Duration,
    username: &str,
    password: &str,
) -> Result<()> {
    let flow = async {
        let secret = ChainSecret::new(username, password);
        let initial = secret.derive_initial(&params.global_salt)?;

        if api.has_salt(&initial.salt).await? {
            return Err(ClientError::CredentialsAlreadyExist);
        }

        let hashes = CommitHashes::single(&initial.commitment, &params.global_salt)?;
        let request = RegisterRequest {
            salt: initial.salt,
            current_salt: initial.current_salt,
            commitment: initial.commitment,
        };
        guard
            .protect(&hashes, || async { api.register(&request).await })
            .await?;

        let expiry = current_timestamp() + session_ttl;
        let state = CryptoState::from_chain(username, secret.input_data(), &initial, expiry);
        session.install(state).await;
        tracing::info!(username, "account registered");
        Ok(())
    };

    match tokio::time::timeout(deadline, flow).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::Timeout),
    }
}

/// Sign in by re-deriving the chain head from the salt registry.
pub async fn sign_in(
    api: &Arc<dyn LedgerApi>,
    session: &Session,
    params: &ProtocolParams,
    session_ttl: u64,
    username: &str,
    password: &str,
) -> Result<()> {
    let secret = ChainSecret::new(username, password);
    let initial = secret.derive_initial(&params.global_salt)?;

    if !api.has_salt(&initial.salt).await? {
        return Err(ClientError::InvalidCredentials);
    }

    let current_salt = api.get_current_salt(&initial.salt).await?;
    if current_salt.is_zero() {
        return Err(ClientError::InvalidCredentials);
    }

    let head = secret.rederive(initial.salt, current_salt, &params.global_salt)?;
    let expiry = current_timestamp() + session_ttl;
    let state = CryptoState::from_chain(username, secret.input_data(), &head, expiry);
    session.install(state).await;
    tracing::info!(username, "signed in");
    Ok(())
}

/// Drop the active session.
pub async fn sign_out(session: &Session) {
    session.clear().await;
    tracing::info!("signed out");
}

/// Re-key the account to a new password.
///
/// Returns the old and new session states so the caller can rotate the
/// recovery vault, which is guarded independently on its own chain.
pub async fn change_password(
    api: &Arc<dyn LedgerApi>,
    guard: &CommitGuard,
    session: &Session,
    params: &ProtocolParams,
    session_ttl: u64,
    new_password: &str,
) -> Result<(CryptoState, CryptoState)> {
    let old = session.snapshot().await?;

    let new_secret = ChainSecret::new(&old.username, new_password);
    let new_initial = new_secret.derive_initial(&params.global_salt)?;

    let hashes = CommitHashes::pair(&old.commitment, &new_initial.commitment, &params.global_salt)?;
    let request = ChangePasswordRequest {
        proof: old.proof,
        next_salt: new_initial.salt,
        next_commitment: new_initial.commitment,
    };
    guard
        .protect(&hashes, || async { api.change_password(&request).await })
        .await?;

    let expiry = current_timestamp() + session_ttl;
    let new_state = CryptoState::from_chain(
        &old.username,
        new_secret.input_data(),
        &new_initial,
        expiry,
    );
    session.install(new_state.clone()).await;
    tracing::info!(username = %old.username, "password changed");
    Ok((old, new_state))
}
