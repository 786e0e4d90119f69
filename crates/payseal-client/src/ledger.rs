//! Ledger synchronization.
//!
//! The remote event log is a backward-linked list of pages keyed by
//! commitment; each fetch returns a page plus the cursor to the next,
//! terminating at the all-zero sentinel. Fetched pages merge into a
//! per-account cached list that is deduplicated, sorted newest-first, and
//! persisted after every merge so a killed process resumes from the last
//! good snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};

use crate::api::LedgerApi;
use crate::error::{ClientError, Result};
use crate::session::Session;
use crate::store::CacheStore;

/// A raw, immutable ledger event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordEntry {
    /// Action discriminant; see [`TransactionKind`].
    pub action_code: u32,
    /// Source commitment, possibly empty.
    #[serde(default)]
    pub from_commitment: String,
    /// Destination commitment, possibly empty.
    #[serde(default)]
    pub to_commitment: String,
    /// Lockbox commitment for escrow events, possibly empty.
    #[serde(default)]
    pub lockbox_commitment: String,
    /// Token denomination.
    #[serde(default)]
    pub token: String,
    /// Amount in micro-units.
    #[serde(default)]
    pub amount: u128,
    /// Transaction hash; opaque.
    pub tx_hash: String,
    /// Event time, Unix seconds.
    pub timestamp: u64,
}

impl RecordEntry {
    /// The dedup identity of this event.
    pub fn identity_key(&self) -> RecordKey {
        RecordKey {
            action_code: self.action_code,
            tx_hash: self.tx_hash.clone(),
            from_commitment: self.from_commitment.clone(),
            to_commitment: self.to_commitment.clone(),
        }
    }
}

/// Identity key for event dedup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    /// Action discriminant.
    pub action_code: u32,
    /// Transaction hash.
    pub tx_hash: String,
    /// Source commitment.
    pub from_commitment: String,
    /// Destination commitment.
    pub to_commitment: String,
}

/// Display-ready classification of a ledger event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    /// Lockbox payment sent.
    Payment,
    /// Lockbox claimed.
    Claim,
    /// Funds deposited to this account.
    Deposit,
    /// Funds withdrawn from this account.
    Withdrawal,
    /// Expired lockbox reclaimed by its sender.
    Reclaim,
    /// Direct send to a commitment.
    Send,
    /// QR-initiated payment.
    QrPay,
    /// QR-initiated receipt.
    QrReceive,
    /// Credential rotation (e.g. password change).
    SecurityUpdate,
    /// Unrecognized action code, carried through untouched.
    Unknown(u32),
}

impl TransactionKind {
    /// Map a wire action code.
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Payment,
            1 => Self::Claim,
            2 => Self::Deposit,
            3 => Self::Withdrawal,
            4 => Self::Reclaim,
            5 => Self::Send,
            6 => Self::QrPay,
            7 => Self::QrReceive,
            8 => Self::SecurityUpdate,
            other => Self::Unknown(other),
        }
    }
}

/// Money movement relative to the viewing account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Funds arrived.
    Incoming,
    /// Funds left.
    Outgoing,
    /// No balance effect for this account.
    Neutral,
}

/// A display-ready transaction.
#[derive(Debug, Clone)]
pub struct TransactionView {
    /// Classified action.
    pub kind: TransactionKind,
    /// Movement relative to the viewer.
    pub direction: Direction,
    /// Amount in micro-units.
    pub amount: u128,
    /// Token denomination.
    pub token: String,
    /// Transaction hash.
    pub tx_hash: String,
    /// Event time, Unix seconds.
    pub timestamp: u64,
    /// The other side of the transfer, when known.
    pub counterparty: Option<String>,
    /// Lockbox commitment for escrow events.
    pub lockbox_commitment: Option<String>,
}

/// Classify an entry from the perspective of `my_commitment` (0x-hex).
pub fn to_view(entry: &RecordEntry, my_commitment: &str) -> TransactionView {
    let kind = TransactionKind::from_code(entry.action_code);
    let me = my_commitment.to_lowercase();
    let from = entry.from_commitment.to_lowercase();
    let to = entry.to_commitment.to_lowercase();

    let direction = if !from.is_empty() && from == me {
        Direction::Outgoing
    } else if !to.is_empty() && to == me {
        Direction::Incoming
    } else {
        match kind {
            TransactionKind::Deposit
            | TransactionKind::Claim
            | TransactionKind::QrReceive
            | TransactionKind::Reclaim => Direction::Incoming,
            TransactionKind::Payment
            | TransactionKind::Withdrawal
            | TransactionKind::Send
            | TransactionKind::QrPay => Direction::Outgoing,
            TransactionKind::SecurityUpdate | TransactionKind::Unknown(_) => Direction::Neutral,
        }
    };

    let counterparty = match direction {
        Direction::Outgoing if !to.is_empty() => Some(entry.to_commitment.clone()),
        Direction::Incoming if !from.is_empty() => Some(entry.from_commitment.clone()),
        _ => None,
    };

    TransactionView {
        kind,
        direction,
        amount: entry.amount,
        token: entry.token.clone(),
        tx_hash: entry.tx_hash.clone(),
        timestamp: entry.timestamp,
        counterparty,
        lockbox_commitment: if entry.lockbox_commitment.is_empty() {
            None
        } else {
            Some(entry.lockbox_commitment.clone())
        },
    }
}

/// Merge `fetched` into `existing`.
///
/// Identity key wins dedup; a fetched entry replaces a cached one with the
/// same key, but cached entries are never dropped. The result is sorted by
/// timestamp descending (tx hash as a stable tie-break), so merging the
/// same page twice is a no-op.
pub fn merge_records(existing: &[RecordEntry], fetched: &[RecordEntry]) -> Vec<RecordEntry> {
    let mut by_key: HashMap<RecordKey, RecordEntry> =
        HashMap::with_capacity(existing.len() + fetched.len());
    for entry in existing {
        by_key.insert(entry.identity_key(), entry.clone());
    }
    for entry in fetched {
        by_key.insert(entry.identity_key(), entry.clone());
    }

    let mut merged: Vec<RecordEntry> = by_key.into_values().collect();
    merged.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.tx_hash.cmp(&b.tx_hash))
    });
    merged
}

struct LedgerState {
    account_key: Option<String>,
    records: Vec<RecordEntry>,
}

/// Engine maintaining the locally cached transaction history.
pub struct LedgerSync {
    api: Arc<dyn LedgerApi>,
    session: Arc<Session>,
    store: CacheStore,
    catchup_lock: Mutex<()>,
    state: Mutex<LedgerState>,
    revision: watch::Sender<u64>,
    max_pages: u32,
    backfill_batch: u32,
    recent_batch: u32,
}

impl LedgerSync {
    /// Build the engine over `api` with a persistent `store`.
    pub fn new(
        api: Arc<dyn LedgerApi>,
        session: Arc<Session>,
        store: CacheStore,
        max_pages: u32,
        backfill_batch: u32,
        recent_batch: u32,
    ) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            api,
            session,
            store,
            catchup_lock: Mutex::new(()),
            state: Mutex::new(LedgerState {
                account_key: None,
                records: Vec::new(),
            }),
            revision,
            max_pages,
            backfill_batch,
            recent_batch: recent_batch.clamp(2, 8),
        }
    }

    /// Bind the engine to an account and load its cached history.
    ///
    /// Histories are cached per account key, so switching accounts never
    /// mixes lists. A corrupt cache file is treated as empty.
    pub async fn activate_account(&self, account_key: &str) -> Result<()> {
        let key = account_key.to_lowercase();
        let records = self
            .store
            .read_json::<Vec<RecordEntry>>(&CacheStore::records_file(&key))
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "discarding unreadable record cache");
                None
            })
            .unwrap_or_default();

        let mut state = self.state.lock().await;
        state.account_key = Some(key);
        state.records = records;
        drop(state);
        self.revision.send_modify(|r| *r += 1);
        Ok(())
    }

    /// Unbind from the current account.
    pub async fn deactivate(&self) {
        let mut state = self.state.lock().await;
        state.account_key = None;
        state.records.clear();
        drop(state);
        self.revision.send_modify(|r| *r += 1);
    }

    /// The cached, merged history (newest first).
    pub async fn records(&self) -> Vec<RecordEntry> {
        self.state.lock().await.records.clone()
    }

    /// Subscribe to history revisions.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Follow the event chain from the current commitment until exhausted,
    /// `target` entries are cached (`0` = no target), or the iteration cap
    /// is hit. Returns the cached size.
    ///
    /// The cap is a safety valve against a misbehaving server feeding a
    /// cyclic cursor chain.
    pub async fn backfill(&self, target: usize) -> Result<usize> {
        let _serial = self.catchup_lock.lock().await;
        let snapshot = self.session.snapshot().await?;

        let mut cursor = snapshot.commitment;
        let mut hops = 0u32;
        while !cursor.is_zero() && hops < self.max_pages {
            let page = self.api.get_events(&cursor, self.backfill_batch).await?;
            let total = self.merge_and_persist(&page.events).await?;
            if target > 0 && total >= target {
                break;
            }
            cursor = page.commitment;
            hops += 1;
        }
        if hops >= self.max_pages {
            tracing::warn!(hops, "backfill stopped at the iteration cap");
        }

        Ok(self.state.lock().await.records.len())
    }

    /// Fetch only the newest page and prepend the entries not yet cached.
    /// Returns how many entries were genuinely new.
    pub async fn poll_recent(&self) -> Result<usize> {
        let _serial = self.catchup_lock.lock().await;
        let snapshot = self.session.snapshot().await?;

        let page = self
            .api
            .get_events(&snapshot.commitment, self.recent_batch)
            .await?;

        let head_key = {
            let state = self.state.lock().await;
            state.records.first().map(RecordEntry::identity_key)
        };
        let new_count = match head_key {
            None => page.events.len(),
            Some(head) => page
                .events
                .iter()
                .position(|e| e.identity_key() == head)
                .unwrap_or(page.events.len()),
        };

        if new_count > 0 {
            self.merge_and_persist(&page.events[..new_count]).await?;
        }
        Ok(new_count)
    }

    async fn merge_and_persist(&self, fetched: &[RecordEntry]) -> Result<usize> {
        let mut state = self.state.lock().await;
        let key = state
            .account_key
            .clone()
            .ok_or(ClientError::NotSignedIn)?;

        state.records = merge_records(&state.records, fetched);
        self.store
            .write_json(&CacheStore::records_file(&key), &state.records)?;
        let total = state.records.len();
        drop(state);
        self.revision.send_modify(|r| *r += 1);
        Ok(total)
    }
}
