//! Session state.
//!
//! Exactly one logical session is active per process. All chain values for
//! the signed-in account live in one [`CryptoState`] owned by [`Session`];
//! nothing outside this crate mutates it, and inside the crate every write
//! goes through the `pub(crate)` methods below (sign-in installs, the
//! commit guard path advances, balance refresh replaces, sign-out clears).

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use payseal_crypto::{ChainLink, ChainState, B32};

use crate::error::{ClientError, Result};
use crate::util::current_timestamp;

/// The full chain state of the signed-in account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoState {
    /// Account username.
    pub username: String,
    /// Hex-encoded `"username:password"` hash input.
    pub input_data: String,
    /// `H(input_data)`; fixed registry key.
    pub salt: B32,
    /// Rotating salt at the current chain head.
    pub current_salt: B32,
    /// Proof at the current chain head.
    pub proof: B32,
    /// Commitment at the current chain head.
    pub commitment: B32,
    /// Absolute expiry, Unix seconds.
    pub expiry: u64,
}

impl CryptoState {
    /// Assemble session state from a derived chain head.
    pub fn from_chain(username: &str, input_data: &str, chain: &ChainState, expiry: u64) -> Self {
        Self {
            username: username.to_owned(),
            input_data: input_data.to_owned(),
            salt: chain.salt,
            current_salt: chain.current_salt,
            proof: chain.proof,
            commitment: chain.commitment,
            expiry,
        }
    }

    /// The chain head portion of this state.
    pub fn chain(&self) -> ChainState {
        ChainState {
            salt: self.salt,
            current_salt: self.current_salt,
            proof: self.proof,
            commitment: self.commitment,
        }
    }
}

/// Holder of the process's single active session.
///
/// The generation counter bumps on every install and clear; long-running
/// tasks capture it before a network round-trip and refuse to write back
/// if it moved, so a concurrent logout can never be resurrected by a
/// late-arriving refresh.
pub struct Session {
    inner: Mutex<Option<CryptoState>>,
    generation: std::sync::atomic::AtomicU64,
}

impl Session {
    /// An empty, signed-out session.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
            generation: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Current login generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn bump(&self) -> u64 {
        self.generation
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1
    }

    /// Whether a non-expired session is active.
    pub async fn is_active(&self) -> bool {
        let guard = self.inner.lock().await;
        match guard.as_ref() {
            Some(state) => state.expiry > current_timestamp(),
            None => false,
        }
    }

    /// Clone the current state, enforcing expiry.
    ///
    /// An expired session is cleared on observation and surfaces as
    /// [`ClientError::SessionExpired`], forcing a fresh sign-in.
    pub async fn snapshot(&self) -> Result<CryptoState> {
        let mut guard = self.inner.lock().await;
        match guard.as_ref() {
            None => Err(ClientError::NotSignedIn),
            Some(state) if state.expiry <= current_timestamp() => {
                *guard = None;
                self.bump();
                Err(ClientError::SessionExpired)
            }
            Some(state) => Ok(state.clone()),
        }
    }

    /// Install a freshly signed-in state. Returns the new generation.
    pub(crate) async fn install(&self, state: CryptoState) -> u64 {
        let mut guard = self.inner.lock().await;
        *guard = Some(state);
        self.bump()
    }

    /// Drop the session.
    pub(crate) async fn clear(&self) {
        let mut guard = self.inner.lock().await;
        *guard = None;
        self.bump();
    }

    /// Move the chain head to a confirmed next link.
    pub(crate) async fn advance_to(&self, link: &ChainLink) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let state = guard.as_mut().ok_or(ClientError::NotSignedIn)?;
        state.current_salt = link.next_current_salt;
        state.proof = link.next_proof;
        state.commitment = link.next_commitment;
        Ok(())
    }

    /// Replace the chain head with a recomputed one, but only if the login
    /// generation is still `expected_generation`. Returns whether the write
    /// was applied.
    pub(crate) async fn replace_chain_if_current(
        &self,
        expected_generation: u64,
        chain: &ChainState,
    ) -> bool {
        if self.generation() != expected_generation {
            return false;
        }
        let mut guard = self.inner.lock().await;
        match guard.as_mut() {
            Some(state) => {
                state.current_salt = chain.current_salt;
                state.proof = chain.proof;
                state.commitment = chain.commitment;
                true
            }
            None => false,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(expiry: u64) -> CryptoState {
        CryptoState {
            username: "alice".into(),
            input_data: "0x616c6963653a7077".into(),
            salt: B32([1; 32]),
            current_salt: B32([2; 32]),
            proof: B32([3; 32]),
            commitment: B32([4; 32]),
            expiry,
        }
    }

    #[tokio::test]
    async fn test_snapshot_requires_sign_in() {
        let session = Session::new();
        assert!(matches!(
            session.snapshot().await,
            Err(ClientError::NotSignedIn)
        ));
    }

    #[tokio::test]
    async fn test_expired_session_is_cleared() {
        let session = Session::new();
        session.install(state(current_timestamp() - 1)).await;
        assert!(matches!(
            session.snapshot().await,
            Err(ClientError::SessionExpired)
        ));
        // The forced logout sticks.
        assert!(matches!(
            session.snapshot().await,
            Err(ClientError::NotSignedIn)
        ));
    }

    #[tokio::test]
    async fn test_stale_generation_cannot_write_back() {
        let session = Session::new();
        let generation = session.install(state(current_timestamp() + 60)).await;
        session.clear().await;

        let applied = session
            .replace_chain_if_current(generation, &state(0).chain())
            .await;
        assert!(!applied);
        assert!(!session.is_active().await);
    }

    #[tokio::test]
    async fn test_advance_moves_head() {
        let session = Session::new();
        session.install(state(current_timestamp() + 60)).await;
        let link = ChainLink {
            next_current_salt: B32([7; 32]),
            next_proof: B32([8; 32]),
            next_commitment: B32([9; 32]),
        };
        session.advance_to(&link).await.unwrap();
        let snap = session.snapshot().await.unwrap();
        assert_eq!(snap.current_salt, B32([7; 32]));
        assert_eq!(snap.commitment, B32([9; 32]));
        // The fixed registry key never moves.
        assert_eq!(snap.salt, B32([1; 32]));
    }
}
