//! Commit-protect: the optimistic lock guarding every chain mutation.
//!
//! Before a state-mutating call runs, the guard records a commit for the
//! hash tuple of the chain values the mutation will touch. Two devices
//! racing for the same link cannot both win: the second sees
//! `CommittedByOther` and must re-derive from the registry. A retried
//! request from the same session sees `ValidBySelf` and re-runs the action
//! without double-submitting the commit.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;

use payseal_crypto::{keccak, B32};

use crate::api::{CommitHashes, CommitState, LedgerApi};
use crate::error::{ClientError, Result};

impl CommitHashes {
    /// Guard a single value.
    pub fn single(a: &B32, global_salt: &B32) -> Result<Self> {
        Ok(Self {
            ct1: keccak(&a.to_hex(), global_salt)?,
            ct2: None,
            ct3: None,
        })
    }

    /// Guard a current/next commitment pair.
    pub fn pair(a: &B32, b: &B32, global_salt: &B32) -> Result<Self> {
        Ok(Self {
            ct1: keccak(&a.to_hex(), global_salt)?,
            ct2: Some(keccak(&b.to_hex(), global_salt)?),
            ct3: None,
        })
    }

    /// Guard a pair plus a third domain value (e.g. a lockbox commitment).
    pub fn triple(a: &B32, b: &B32, c: &B32, global_salt: &B32) -> Result<Self> {
        Ok(Self {
            ct1: keccak(&a.to_hex(), global_salt)?,
            ct2: Some(keccak(&b.to_hex(), global_salt)?),
            ct3: Some(keccak(&c.to_hex(), global_salt)?),
        })
    }
}

/// Executor of commit-protected mutations.
///
/// The shared `mutation_lock` is also held by balance refresh, whose
/// opportunistic chain recomputation must never interleave with a
/// protected mutation's own advance.
pub struct CommitGuard {
    api: Arc<dyn LedgerApi>,
    mutation_lock: Arc<Mutex<()>>,
}

impl CommitGuard {
    /// Build a guard over `api`, coordinating through `mutation_lock`.
    pub fn new(api: Arc<dyn LedgerApi>, mutation_lock: Arc<Mutex<()>>) -> Self {
        Self { api, mutation_lock }
    }

    /// The lock shared with balance refresh.
    pub fn mutation_lock(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.mutation_lock)
    }

    /// Run `action` under commit protection on the primary chain.
    ///
    /// A failure while reading the commit state aborts before any remote
    /// or local mutation. A failure inside `action` is surfaced as-is: the
    /// commit is already recorded remotely, so callers must treat it as
    /// "uncertain, check server state" rather than retrying blindly.
    pub async fn protect<T, F, Fut>(&self, hashes: &CommitHashes, action: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _guard = self.mutation_lock.lock().await;
        self.run(hashes, action, false).await
    }

    /// Run `action` under commit protection on the recovery-vault chain.
    pub async fn protect_vault<T, F, Fut>(&self, hashes: &CommitHashes, action: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _guard = self.mutation_lock.lock().await;
        self.run(hashes, action, true).await
    }

    async fn run<T, F, Fut>(&self, hashes: &CommitHashes, action: F, vault: bool) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let state = if vault {
            self.api.vault_get_commit_state(hashes).await?
        } else {
            self.api.get_commit_state(hashes).await?
        };

        match state {
            CommitState::Open => {
                if vault {
                    self.api.vault_commit(hashes).await?;
                } else {
                    self.api.commit(hashes).await?;
                }
                tracing::debug!(ct1 = %hashes.ct1, vault, "commit recorded");
                action().await
            }
            CommitState::ValidBySelf => {
                tracing::debug!(ct1 = %hashes.ct1, vault, "commit already ours; re-running action");
                action().await
            }
            CommitState::CommittedByOther => {
                tracing::warn!(ct1 = %hashes.ct1, vault, "commit held by another party");
                Err(ClientError::CommittedByAnotherParty)
            }
        }
    }
}
