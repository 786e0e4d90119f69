//! In-memory ledger for tests.
//!
//! [`MockLedger`] implements [`LedgerApi`] against process-local state and
//! honors the protocol far enough to exercise every engine: a salt
//! registry, commit tuples (with a "foreign" set to simulate another party
//! winning a race), balances keyed by account, lockboxes keyed by
//! commitment, the vault store, and seedable event pages. Failure
//! injection flags simulate a dead network on read or action endpoints.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use payseal_crypto::{keccak, B32};

use crate::api::{
    BalancePage, ChangePasswordRequest, ClaimRequest, CommitHashes, CommitState, DepositRequest,
    EventPage, LedgerApi, RawLockbox, ReclaimRequest, RegisterRequest, SendEmailRequest,
    SendRequest, TokenAmount, VaultBlob, VaultChangeRequest, VaultInitRequest,
};
use crate::config::ProtocolParams;
use crate::error::{ClientError, Result};
use crate::ledger::RecordEntry;

/// How long a freshly sent lockbox stays locked, in mock seconds.
const LOCKBOX_TTL: u64 = 3600;

#[derive(Default)]
struct MockState {
    /// salt hex -> current rotating salt.
    salts: HashMap<String, B32>,
    /// commitment hex -> account (salt hex).
    commitment_index: HashMap<String, String>,
    /// account -> balances.
    balances: HashMap<String, Vec<TokenAmount>>,
    /// Commit tuples recorded through this ledger.
    commits: HashSet<String>,
    /// Commit tuples held by "someone else".
    foreign_commits: HashSet<String>,
    vault_commits: HashSet<String>,
    foreign_vault_commits: HashSet<String>,
    commit_count: usize,
    /// lockbox commitment hex -> record.
    lockboxes: HashMap<String, RawLockbox>,
    /// vault commitment hex -> recovery pk.
    vault_pks: HashMap<String, B32>,
    /// recovery pk hex -> blob.
    vault_blobs: HashMap<String, VaultBlob>,
    /// cursor commitment hex -> seeded page.
    events: HashMap<String, EventPage>,
    clock: u64,
}

/// In-memory [`LedgerApi`] implementation.
pub struct MockLedger {
    params: ProtocolParams,
    state: Mutex<MockState>,
    /// When set, every read endpoint fails as unreachable.
    pub fail_reads: AtomicBool,
    /// When set, every action endpoint fails as unreachable. Commit
    /// submission itself stays up, which is exactly the partial-failure
    /// window the guard's callers must handle.
    pub fail_actions: AtomicBool,
}

impl MockLedger {
    /// A ledger with default protocol parameters.
    pub fn new() -> Self {
        Self::with_params(ProtocolParams {
            global_salt: B32([0x42; 32]),
            lockbox_salt: B32([0x0b; 32]),
            min_send_amount: 10_000,
            passphrase_free_limit: 10_000_000,
        })
    }

    /// A ledger with explicit protocol parameters.
    pub fn with_params(params: ProtocolParams) -> Self {
        Self {
            params,
            state: Mutex::new(MockState {
                clock: 1_700_000_000,
                ..MockState::default()
            }),
            fail_reads: AtomicBool::new(false),
            fail_actions: AtomicBool::new(false),
        }
    }

    fn check_read(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            Err(ClientError::ServerUnreachable)
        } else {
            Ok(())
        }
    }

    fn check_action(&self) -> Result<()> {
        if self.fail_actions.load(Ordering::SeqCst) {
            Err(ClientError::ServerUnreachable)
        } else {
            Ok(())
        }
    }

    fn tuple_key(hashes: &CommitHashes) -> String {
        format!(
            "{}|{}|{}",
            hashes.ct1,
            hashes.ct2.map(|h| h.to_hex()).unwrap_or_default(),
            hashes.ct3.map(|h| h.to_hex()).unwrap_or_default(),
        )
    }

    /// The commitment an account's proof hashes to, per the protocol rule.
    fn commitment_of_proof(&self, proof: &B32) -> B32 {
        keccak(&proof.to_hex(), &self.params.global_salt).expect("valid hex")
    }

    fn account_of_commitment(state: &MockState, commitment: &B32) -> Result<String> {
        state
            .commitment_index
            .get(&commitment.to_hex())
            .cloned()
            .ok_or_else(|| ClientError::Server {
                status: 404,
                message: "unknown commitment".into(),
            })
    }

    fn credit(state: &mut MockState, account: &str, token: &str, amount: u128) {
        let balances = state.balances.entry(account.to_string()).or_default();
        match balances.iter_mut().find(|a| a.token == token) {
            Some(entry) => entry.amount += amount,
            None => balances.push(TokenAmount {
                token: token.to_string(),
                amount,
            }),
        }
    }

    fn debit(state: &mut MockState, account: &str, token: &str, amount: u128) -> Result<()> {
        let balances = state.balances.entry(account.to_string()).or_default();
        let entry = balances
            .iter_mut()
            .find(|a| a.token == token)
            .filter(|a| a.amount >= amount)
            .ok_or_else(|| ClientError::Server {
                status: 400,
                message: "insufficient funds".into(),
            })?;
        entry.amount -= amount;
        Ok(())
    }

    // ----- test helpers -------------------------------------------------

    /// Credit an account, addressed by any of its commitments.
    pub fn fund(&self, commitment: &B32, token: &str, amount: u128) {
        let mut state = self.state.lock().unwrap();
        let account =
            Self::account_of_commitment(&state, commitment).expect("fund: unknown commitment");
        Self::credit(&mut state, &account, token, amount);
        state.clock += 1;
    }

    /// Seed an event page at a cursor.
    pub fn set_events(&self, cursor: &B32, events: Vec<RecordEntry>, next: B32) {
        let mut state = self.state.lock().unwrap();
        state.events.insert(
            cursor.to_hex(),
            EventPage {
                events,
                commitment: next,
            },
        );
    }

    /// Mark a tuple as committed by another party.
    pub fn add_foreign_commit(&self, hashes: &CommitHashes) {
        let mut state = self.state.lock().unwrap();
        state.foreign_commits.insert(Self::tuple_key(hashes));
    }

    /// Mark a vault tuple as committed by another party.
    pub fn add_foreign_vault_commit(&self, hashes: &CommitHashes) {
        let mut state = self.state.lock().unwrap();
        state.foreign_vault_commits.insert(Self::tuple_key(hashes));
    }

    /// Number of commit submissions received (both chains).
    pub fn commit_count(&self) -> usize {
        self.state.lock().unwrap().commit_count
    }

    /// The registered rotating salt for an account salt.
    pub fn current_salt_of(&self, salt: &B32) -> Option<B32> {
        self.state.lock().unwrap().salts.get(&salt.to_hex()).copied()
    }

    /// Raw lockbox record, if registered.
    pub fn lockbox(&self, commitment: &B32) -> Option<RawLockbox> {
        self.state
            .lock()
            .unwrap()
            .lockboxes
            .get(&commitment.to_hex())
            .cloned()
    }

    /// Force a lockbox's unlock time into the past.
    pub fn expire_lockbox(&self, commitment: &B32) {
        let mut state = self.state.lock().unwrap();
        let now = state.clock;
        if let Some(lockbox) = state.lockboxes.get_mut(&commitment.to_hex()) {
            lockbox.unlock_time = now.saturating_sub(1);
        }
    }

    /// Advance the mock clock.
    pub fn tick(&self, seconds: u64) {
        self.state.lock().unwrap().clock += seconds;
    }
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerApi for MockLedger {
    async fn get_config(&self) -> Result<ProtocolParams> {
        self.check_read()?;
        Ok(self.params)
    }

    async fn get_current_salt(&self, salt: &B32) -> Result<B32> {
        self.check_read()?;
        let state = self.state.lock().unwrap();
        Ok(state.salts.get(&salt.to_hex()).copied().unwrap_or(B32::ZERO))
    }

    async fn has_salt(&self, salt: &B32) -> Result<bool> {
        self.check_read()?;
        Ok(self.state.lock().unwrap().salts.contains_key(&salt.to_hex()))
    }

    async fn has_balance(&self, commitment: &B32) -> Result<bool> {
        self.check_read()?;
        let state = self.state.lock().unwrap();
        let Ok(account) = Self::account_of_commitment(&state, commitment) else {
            return Ok(false);
        };
        Ok(state
            .balances
            .get(&account)
            .is_some_and(|b| b.iter().any(|a| a.amount > 0)))
    }

    async fn has_lockbox(&self, commitment: &B32) -> Result<bool> {
        self.check_read()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .lockboxes
            .contains_key(&commitment.to_hex()))
    }

    async fn get_lockbox(&self, commitment: &B32) -> Result<RawLockbox> {
        self.check_read()?;
        let state = self.state.lock().unwrap();
        let mut lockbox = state
            .lockboxes
            .get(&commitment.to_hex())
            .cloned()
            .ok_or_else(|| ClientError::Server {
                status: 404,
                message: "unknown lockbox".into(),
            })?;
        lockbox.current_time = state.clock;
        Ok(lockbox)
    }

    async fn get_commit_state(&self, hashes: &CommitHashes) -> Result<CommitState> {
        self.check_read()?;
        let state = self.state.lock().unwrap();
        let key = Self::tuple_key(hashes);
        if state.foreign_commits.contains(&key) {
            Ok(CommitState::CommittedByOther)
        } else if state.commits.contains(&key) {
            Ok(CommitState::ValidBySelf)
        } else {
            Ok(CommitState::Open)
        }
    }

    async fn commit(&self, hashes: &CommitHashes) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.commits.insert(Self::tuple_key(hashes));
        state.commit_count += 1;
        Ok(())
    }

    async fn vault_get_commit_state(&self, hashes: &CommitHashes) -> Result<CommitState> {
        self.check_read()?;
        let state = self.state.lock().unwrap();
        let key = Self::tuple_key(hashes);
        if state.foreign_vault_commits.contains(&key) {
            Ok(CommitState::CommittedByOther)
        } else if state.vault_commits.contains(&key) {
            Ok(CommitState::ValidBySelf)
        } else {
            Ok(CommitState::Open)
        }
    }

    async fn vault_commit(&self, hashes: &CommitHashes) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.vault_commits.insert(Self::tuple_key(hashes));
        state.commit_count += 1;
        Ok(())
    }

    async fn get_balance(&self, commitment: &B32) -> Result<BalancePage> {
        self.check_read()?;
        let state = self.state.lock().unwrap();
        let account = Self::account_of_commitment(&state, commitment)?;
        Ok(BalancePage {
            amounts: state.balances.get(&account).cloned().unwrap_or_default(),
            update_time: state.clock,
        })
    }

    async fn get_events(&self, commitment: &B32, _batch_size: u32) -> Result<EventPage> {
        self.check_read()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .events
            .get(&commitment.to_hex())
            .cloned()
            .unwrap_or(EventPage {
                events: Vec::new(),
                commitment: B32::ZERO,
            }))
    }

    async fn register(&self, req: &RegisterRequest) -> Result<()> {
        self.check_action()?;
        let mut state = self.state.lock().unwrap();
        if state.salts.contains_key(&req.salt.to_hex()) {
            return Err(ClientError::Server {
                status: 409,
                message: "salt already registered".into(),
            });
        }
        state.salts.insert(req.salt.to_hex(), req.current_salt);
        state
            .commitment_index
            .insert(req.commitment.to_hex(), req.salt.to_hex());
        Ok(())
    }

    async fn claim(&self, req: &ClaimRequest) -> Result<()> {
        self.check_action()?;
        let lockbox_commitment = self.commitment_of_proof(&req.proof);
        let mut state = self.state.lock().unwrap();
        let now = state.clock;
        let lockbox = state
            .lockboxes
            .get_mut(&lockbox_commitment.to_hex())
            .ok_or_else(|| ClientError::Server {
                status: 404,
                message: "unknown lockbox".into(),
            })?;
        if lockbox.status != 0 || lockbox.unlock_time <= now {
            return Err(ClientError::Server {
                status: 409,
                message: "lockbox not claimable".into(),
            });
        }
        lockbox.status = 1;
        let (token, amount) = (lockbox.token.clone(), lockbox.amount);
        let account = Self::account_of_commitment(&state, &req.commitment)?;
        Self::credit(&mut state, &account, &token, amount);
        state.clock += 1;
        Ok(())
    }

    async fn reclaim(&self, req: &ReclaimRequest) -> Result<()> {
        self.check_action()?;
        let mut state = self.state.lock().unwrap();
        let now = state.clock;
        let lockbox = state
            .lockboxes
            .get_mut(&req.lockbox_commitment.to_hex())
            .ok_or_else(|| ClientError::Server {
                status: 404,
                message: "unknown lockbox".into(),
            })?;
        if lockbox.status != 0 || lockbox.unlock_time > now {
            return Err(ClientError::Server {
                status: 409,
                message: "lockbox not reclaimable".into(),
            });
        }
        lockbox.status = 2;
        state.clock += 1;
        Ok(())
    }

    async fn withdraw_and_send(&self, req: &SendRequest) -> Result<()> {
        self.check_action()?;
        let commitment = self.commitment_of_proof(&req.proof);
        let mut state = self.state.lock().unwrap();
        let account = Self::account_of_commitment(&state, &commitment)?;
        Self::debit(&mut state, &account, &req.token, req.amount)?;

        state.salts.insert(account.clone(), req.next_salt);
        state
            .commitment_index
            .insert(req.next_commitment.to_hex(), account);

        let now = state.clock;
        state.lockboxes.insert(
            req.lockbox_commitment.to_hex(),
            RawLockbox {
                status: 0,
                create_time: now,
                unlock_time: now + LOCKBOX_TTL,
                current_time: now,
                amount: req.amount,
                token: req.token.clone(),
            },
        );
        state.clock += 1;
        Ok(())
    }

    async fn withdraw_and_send_email(&self, req: &SendEmailRequest) -> Result<()> {
        self.withdraw_and_send(&req.send).await
    }

    async fn withdraw_and_deposit(&self, req: &DepositRequest) -> Result<()> {
        self.check_action()?;
        let commitment = self.commitment_of_proof(&req.proof);
        let mut state = self.state.lock().unwrap();
        let from = Self::account_of_commitment(&state, &commitment)?;
        let to = Self::account_of_commitment(&state, &req.to_commitment)?;
        Self::debit(&mut state, &from, &req.token, req.amount)?;
        Self::credit(&mut state, &to, &req.token, req.amount);

        state.salts.insert(from.clone(), req.next_salt);
        state
            .commitment_index
            .insert(req.next_commitment.to_hex(), from);
        state.clock += 1;
        Ok(())
    }

    async fn change_password(&self, req: &ChangePasswordRequest) -> Result<()> {
        self.check_action()?;
        let old_commitment = self.commitment_of_proof(&req.proof);
        let mut state = self.state.lock().unwrap();
        let old_account = Self::account_of_commitment(&state, &old_commitment)?;

        state.salts.remove(&old_account);
        state.salts.insert(req.next_salt.to_hex(), req.next_salt);
        state
            .commitment_index
            .insert(req.next_commitment.to_hex(), req.next_salt.to_hex());
        if let Some(balances) = state.balances.remove(&old_account) {
            state.balances.insert(req.next_salt.to_hex(), balances);
        }
        state.clock += 1;
        Ok(())
    }

    async fn vault_initialize(&self, req: &VaultInitRequest) -> Result<()> {
        self.check_action()?;
        let mut state = self.state.lock().unwrap();
        state
            .vault_pks
            .insert(req.commitment.to_hex(), req.blob.recovery_pk);
        state
            .vault_blobs
            .insert(req.blob.recovery_pk.to_hex(), req.blob.clone());
        Ok(())
    }

    async fn vault_change_password(&self, req: &VaultChangeRequest) -> Result<()> {
        self.check_action()?;
        let old_commitment = self.commitment_of_proof(&req.proof);
        let mut state = self.state.lock().unwrap();
        state.vault_pks.remove(&old_commitment.to_hex());
        state
            .vault_pks
            .insert(req.next_commitment.to_hex(), req.blob.recovery_pk);
        state
            .vault_blobs
            .insert(req.blob.recovery_pk.to_hex(), req.blob.clone());
        Ok(())
    }

    async fn vault_get_recovery_pk(&self, commitment: &B32) -> Result<B32> {
        self.check_read()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .vault_pks
            .get(&commitment.to_hex())
            .copied()
            .unwrap_or(B32::ZERO))
    }

    async fn vault_get_blob(&self, recovery_pk: &B32) -> Result<VaultBlob> {
        self.check_read()?;
        let state = self.state.lock().unwrap();
        state
            .vault_blobs
            .get(&recovery_pk.to_hex())
            .cloned()
            .ok_or_else(|| ClientError::Server {
                status: 404,
                message: "unknown recovery key".into(),
            })
    }
}
