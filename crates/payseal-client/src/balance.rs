//! Balance synchronization.
//!
//! `refresh` is single-flight: a caller that arrives while a refresh is in
//! flight waits for it and returns its result instead of issuing a
//! duplicate fetch. The whole refresh holds the shared mutation lock, so
//! the opportunistic chain recomputation below can never interleave with a
//! commit-protected mutation. On any fetch failure the last-known-good
//! snapshot is kept (never zeroed) and a retry flag is raised for the next
//! reconnect.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use payseal_crypto::chain;

use crate::api::{LedgerApi, TokenAmount};
use crate::config::ProtocolParams;
use crate::error::{ClientError, Result};
use crate::session::Session;
use crate::util::current_timestamp;

/// The locally cached balance view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceSnapshot {
    /// Per-token balances in micro-units.
    pub amounts: Vec<TokenAmount>,
    /// Server-side time of the last balance mutation.
    pub update_time: u64,
    /// Local time of the fetch that produced this snapshot; 0 when never
    /// fetched.
    pub fetched_at: u64,
}

impl BalanceSnapshot {
    /// Balance for `token`, zero when absent.
    pub fn available(&self, token: &str) -> u128 {
        self.amounts
            .iter()
            .find(|a| a.token == token)
            .map(|a| a.amount)
            .unwrap_or(0)
    }
}

struct BalanceState {
    snapshot: BalanceSnapshot,
    needs_retry: bool,
}

/// Engine refreshing the spendable balance.
pub struct BalanceSync {
    api: Arc<dyn LedgerApi>,
    session: Arc<Session>,
    params: ProtocolParams,
    mutation_lock: Arc<Mutex<()>>,
    refresh_lock: Mutex<()>,
    epoch: AtomicU64,
    state: Mutex<BalanceState>,
    tx: watch::Sender<BalanceSnapshot>,
}

impl BalanceSync {
    /// Build the engine. `mutation_lock` must be the same lock the commit
    /// guard holds during protected mutations.
    pub fn new(
        api: Arc<dyn LedgerApi>,
        session: Arc<Session>,
        params: ProtocolParams,
        mutation_lock: Arc<Mutex<()>>,
    ) -> Self {
        let (tx, _) = watch::channel(BalanceSnapshot::default());
        Self {
            api,
            session,
            params,
            mutation_lock,
            refresh_lock: Mutex::new(()),
            epoch: AtomicU64::new(0),
            state: Mutex::new(BalanceState {
                snapshot: BalanceSnapshot::default(),
                needs_retry: false,
            }),
            tx,
        }
    }

    /// The current locally cached snapshot.
    pub async fn snapshot(&self) -> BalanceSnapshot {
        self.state.lock().await.snapshot.clone()
    }

    /// Subscribe to snapshot updates.
    pub fn subscribe(&self) -> watch::Receiver<BalanceSnapshot> {
        self.tx.subscribe()
    }

    /// Whether the last refresh failed and should be retried on reconnect.
    pub async fn needs_retry(&self) -> bool {
        self.state.lock().await.needs_retry
    }

    /// Refresh once more if the last attempt failed; call on regained
    /// connectivity.
    pub async fn retry_pending(&self) -> Result<Option<BalanceSnapshot>> {
        if self.needs_retry().await {
            self.refresh().await.map(Some)
        } else {
            Ok(None)
        }
    }

    /// Fetch the balance for the session's recomputed chain head.
    pub async fn refresh(&self) -> Result<BalanceSnapshot> {
        let entered_epoch = self.epoch.load(Ordering::SeqCst);
        let _flight = self.refresh_lock.lock().await;
        if self.epoch.load(Ordering::SeqCst) != entered_epoch {
            // Another caller finished a refresh while we queued; share it.
            return Ok(self.snapshot().await);
        }

        let _pause = self.mutation_lock.lock().await;
        let login_generation = self.session.generation();
        let current = self.session.snapshot().await?;

        let fetched = async {
            let current_salt = self.api.get_current_salt(&current.salt).await?;
            if current_salt.is_zero() {
                return Err(ClientError::InvalidResponse(
                    "salt registry returned the zero sentinel".into(),
                ));
            }
            let head = chain::rederive(
                &current.input_data,
                current.salt,
                current_salt,
                &self.params.global_salt,
            )?;
            let page = self.api.get_balance(&head.commitment).await?;
            Ok((head, page))
        }
        .await;

        match fetched {
            Ok((head, page)) => {
                if !self
                    .session
                    .replace_chain_if_current(login_generation, &head)
                    .await
                {
                    tracing::debug!("session changed during refresh; discarding result");
                    return Err(ClientError::NotSignedIn);
                }

                let snapshot = BalanceSnapshot {
                    amounts: page.amounts,
                    update_time: page.update_time,
                    fetched_at: current_timestamp(),
                };
                {
                    let mut state = self.state.lock().await;
                    state.snapshot = snapshot.clone();
                    state.needs_retry = false;
                }
                self.epoch.fetch_add(1, Ordering::SeqCst);
                let _ = self.tx.send(snapshot.clone());
                tracing::debug!(update_time = snapshot.update_time, "balance refreshed");
                Ok(snapshot)
            }
            Err(err) => {
                // Keep the pre-call snapshot; flag for retry-on-reconnect.
                self.state.lock().await.needs_retry = true;
                tracing::warn!(error = %err, "balance refresh failed; keeping last known good");
                Err(err)
            }
        }
    }

    /// Forget the cached snapshot (sign-out / account switch).
    pub(crate) async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.snapshot = BalanceSnapshot::default();
        state.needs_retry = false;
        let _ = self.tx.send(BalanceSnapshot::default());
    }
}
