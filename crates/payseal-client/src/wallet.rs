//! The client facade.
//!
//! [`Wallet`] constructs one instance of every engine per connection and
//! wires their shared pieces: the single [`Session`], the mutation lock
//! that keeps balance refresh and commit-protect from interleaving, and
//! the cache store. Each mutating operation resynchronizes the local
//! balance and history views afterwards, best-effort.

use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use payseal_crypto::B32;

use crate::account;
use crate::api::{HttpLedger, LedgerApi};
use crate::balance::{BalanceSnapshot, BalanceSync};
use crate::config::{ClientConfig, ProtocolParams};
use crate::error::Result;
use crate::guard::CommitGuard;
use crate::ledger::{to_view, LedgerSync, TransactionView};
use crate::lockbox::{LockboxEngine, LockboxInfo, LockboxTicket};
use crate::session::{CryptoState, Session};
use crate::store::CacheStore;
use crate::util::current_timestamp;
use crate::vault::RecoveryVault;

/// One connected client: session, engines, and local caches.
pub struct Wallet {
    config: ClientConfig,
    params: ProtocolParams,
    session: Arc<Session>,
    store: CacheStore,
    balance: Arc<BalanceSync>,
    ledger: LedgerSync,
    lockbox: LockboxEngine,
    vault: RecoveryVault,
    api: Arc<dyn LedgerApi>,
    guard: Arc<CommitGuard>,
}

impl Wallet {
    /// Connect over HTTP and fetch protocol parameters.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let api: Arc<dyn LedgerApi> = Arc::new(HttpLedger::new(&config)?);
        Self::with_api(config, api).await
    }

    /// Build against an explicit [`LedgerApi`] implementation.
    pub async fn with_api(config: ClientConfig, api: Arc<dyn LedgerApi>) -> Result<Self> {
        let params = api.get_config().await?;

        let session = Arc::new(Session::new());
        let mutation_lock = Arc::new(Mutex::new(()));
        let guard = Arc::new(CommitGuard::new(Arc::clone(&api), mutation_lock.clone()));

        let store = CacheStore::new(&config.data_dir)?;
        let balance = Arc::new(BalanceSync::new(
            Arc::clone(&api),
            Arc::clone(&session),
            params,
            mutation_lock,
        ));
        let ledger = LedgerSync::new(
            Arc::clone(&api),
            Arc::clone(&session),
            CacheStore::new(&config.data_dir)?,
            config.max_ledger_pages,
            config.backfill_batch_size,
            config.recent_batch_size,
        );
        let lockbox = LockboxEngine::new(
            Arc::clone(&api),
            Arc::clone(&session),
            Arc::clone(&guard),
            Arc::clone(&balance),
            params,
            config.token.clone(),
        );
        let vault = RecoveryVault::new(
            Arc::clone(&api),
            Arc::clone(&session),
            Arc::clone(&guard),
            params,
        );

        Ok(Self {
            config,
            params,
            session,
            store,
            balance,
            ledger,
            lockbox,
            vault,
            api,
            guard,
        })
    }

    /// Protocol parameters fetched at connect time.
    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    /// Local configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The active session.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// The recovery vault engine.
    pub fn vault(&self) -> &RecoveryVault {
        &self.vault
    }

    /// The lockbox engine.
    pub fn lockbox(&self) -> &LockboxEngine {
        &self.lockbox
    }

    /// The ledger sync engine.
    pub fn ledger(&self) -> &LedgerSync {
        &self.ledger
    }

    /// The balance sync engine.
    pub fn balance(&self) -> &Arc<BalanceSync> {
        &self.balance
    }

    // ----- account ------------------------------------------------------

    /// Register a new account and sign in.
    pub async fn sign_up(&self, username: &str, password: &str) -> Result<()> {
        account::sign_up(
            &self.api,
            &self.guard,
            &self.session,
            &self.params,
            self.config.session_ttl,
            self.config.signup_deadline,
            username,
            password,
        )
        .await?;
        self.after_sign_in().await
    }

    /// Sign in to an existing account.
    pub async fn sign_in(&self, username: &str, password: &str) -> Result<()> {
        account::sign_in(
            &self.api,
            &self.session,
            &self.params,
            self.config.session_ttl,
            username,
            password,
        )
        .await?;
        self.after_sign_in().await
    }

    /// Sign out and drop local session artifacts.
    pub async fn sign_out(&self) -> Result<()> {
        account::sign_out(&self.session).await;
        self.balance.reset().await;
        self.ledger.deactivate().await;
        self.store.delete(&CacheStore::session_file())
    }

    /// Restore a persisted session from disk. Returns whether a live
    /// session was restored.
    pub async fn restore_session(&self) -> Result<bool> {
        let Some(state) = self
            .store
            .read_json::<CryptoState>(&CacheStore::session_file())?
        else {
            return Ok(false);
        };
        if state.expiry <= current_timestamp() {
            self.store.delete(&CacheStore::session_file())?;
            return Ok(false);
        }

        let account_key = state.salt.to_hex();
        self.session.install(state).await;
        self.ledger.activate_account(&account_key).await?;
        Ok(true)
    }

    /// Change the account password; rotates the recovery vault too.
    pub async fn change_password(&self, new_password: &str) -> Result<()> {
        let (old, new) = account::change_password(
            &self.api,
            &self.guard,
            &self.session,
            &self.params,
            self.config.session_ttl,
            new_password,
        )
        .await?;
        self.vault
            .rotate(&old.input_data, &new.input_data, new_password)
            .await?;
        // The stable account key is the salt, which a re-key replaces.
        self.ledger.activate_account(&new.salt.to_hex()).await?;
        self.persist_session().await
    }

    /// Set up the recovery vault; returns the one-time recovery code.
    pub async fn setup_recovery(&self, password: &str) -> Result<String> {
        self.vault.initialize(password).await
    }

    /// Recover the account password from a recovery code (works signed
    /// out).
    pub async fn recover_password(&self, code: &str) -> Result<String> {
        self.vault.recover_password(code).await
    }

    // ----- payments -----------------------------------------------------

    /// Send a lockbox payment; see [`LockboxEngine::send`].
    pub async fn send(&self, amount: u128, passphrase: Option<&str>) -> Result<LockboxTicket> {
        let ticket = self.lockbox.send(amount, passphrase).await?;
        self.resync().await;
        Ok(ticket)
    }

    /// Send a lockbox payment to an email address.
    pub async fn send_email(
        &self,
        email: &str,
        amount: u128,
        passphrase: Option<&str>,
    ) -> Result<LockboxTicket> {
        let ticket = self.lockbox.send_email(email, amount, passphrase).await?;
        self.resync().await;
        Ok(ticket)
    }

    /// Claim a lockbox into this account.
    pub async fn claim(&self, claim_key: &str, passphrase: &str, code: Option<&str>) -> Result<()> {
        self.lockbox.claim(claim_key, passphrase, code).await?;
        self.resync().await;
        Ok(())
    }

    /// Reclaim an expired lockbox.
    pub async fn reclaim(&self, lockbox_commitment: &B32) -> Result<()> {
        self.lockbox.reclaim(lockbox_commitment).await?;
        self.resync().await;
        Ok(())
    }

    /// Direct transfer to a known commitment.
    pub async fn deposit(&self, to_commitment: &B32, amount: u128) -> Result<()> {
        self.lockbox.deposit(to_commitment, amount).await?;
        self.resync().await;
        Ok(())
    }

    /// Status of a lockbox.
    pub async fn lockbox_status(&self, lockbox_commitment: &B32) -> Result<LockboxInfo> {
        self.lockbox.status(lockbox_commitment).await
    }

    // ----- views --------------------------------------------------------

    /// Refresh and return the balance snapshot.
    pub async fn refresh_balance(&self) -> Result<BalanceSnapshot> {
        let snapshot = self.balance.refresh().await?;
        self.persist_session().await?;
        Ok(snapshot)
    }

    /// The locally cached balance snapshot.
    pub async fn balances(&self) -> BalanceSnapshot {
        self.balance.snapshot().await
    }

    /// Subscribe to balance updates.
    pub fn balance_updates(&self) -> watch::Receiver<BalanceSnapshot> {
        self.balance.subscribe()
    }

    /// Subscribe to history revisions.
    pub fn record_updates(&self) -> watch::Receiver<u64> {
        self.ledger.subscribe()
    }

    /// Display-ready transaction history, newest first. `full` backfills
    /// the entire chain; otherwise only the newest page is polled.
    pub async fn history(&self, full: bool) -> Result<Vec<TransactionView>> {
        if full {
            self.ledger.backfill(0).await?;
        } else {
            self.ledger.poll_recent().await?;
        }
        let session = self.session.snapshot().await?;
        let commitment = session.commitment.to_hex();
        Ok(self
            .ledger
            .records()
            .await
            .iter()
            .map(|entry| to_view(entry, &commitment))
            .collect())
    }

    // ----- internals ----------------------------------------------------

    async fn after_sign_in(&self) -> Result<()> {
        let snapshot = self.session.snapshot().await?;
        self.ledger.activate_account(&snapshot.salt.to_hex()).await?;
        self.persist_session().await?;

        // First balance fetch is best-effort; the retry flag covers it.
        if let Err(err) = self.balance.refresh().await {
            tracing::warn!(error = %err, "initial balance refresh failed");
        }
        Ok(())
    }

    async fn resync(&self) {
        if let Err(err) = self.balance.refresh().await {
            tracing::warn!(error = %err, "balance resync failed");
        }
        if let Err(err) = self.ledger.poll_recent().await {
            tracing::warn!(error = %err, "record resync failed");
        }
        if let Err(err) = self.persist_session().await {
            tracing::warn!(error = %err, "session persist failed");
        }
    }

    async fn persist_session(&self) -> Result<()> {
        let state = self.session.snapshot().await?;
        self.store.write_json(&CacheStore::session_file(), &state)
    }
}
