//! Lockbox escrow flows.
//!
//! A send escrows funds behind a commitment until the recipient claims
//! them with the proof, or the sender reclaims after expiry. The claim
//! secret is a random link token shared out of band; amounts above the
//! passphrase-free limit additionally require a claim passphrase.

use std::sync::Arc;

use payseal_crypto::{
    chain, derive_lockbox_commitment, derive_lockbox_proof, B32,
};

use crate::api::{
    ClaimRequest, CommitHashes, DepositRequest, LedgerApi, RawLockbox, ReclaimRequest,
    SendEmailRequest, SendRequest,
};
use crate::balance::BalanceSync;
use crate::config::ProtocolParams;
use crate::error::{ClientError, Result};
use crate::guard::CommitGuard;
use crate::session::Session;
use crate::util::current_timestamp;

/// Derived lifecycle state of a lockbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockboxStatus {
    /// Unclaimed and not yet reclaimable.
    Open,
    /// Unclaimed and past its unlock time; the sender may reclaim.
    Expired,
    /// Claimed by the recipient.
    Claimed,
    /// Reclaimed by the sender.
    Reclaimed,
}

impl LockboxStatus {
    /// Derive status from the raw code and clocks. Code 0 means unset, so
    /// the unlock time against `now` decides between open and expired.
    pub fn derive(status_code: u8, unlock_time: u64, now: u64) -> Self {
        match status_code {
            1 => Self::Claimed,
            2 => Self::Reclaimed,
            _ => {
                if unlock_time > now {
                    Self::Open
                } else {
                    Self::Expired
                }
            }
        }
    }
}

/// A lockbox's derived status plus its raw record.
#[derive(Debug, Clone)]
pub struct LockboxInfo {
    /// Derived lifecycle state.
    pub status: LockboxStatus,
    /// The raw record as returned by the ledger.
    pub raw: RawLockbox,
}

/// Receipt for a sent lockbox.
#[derive(Debug, Clone)]
pub struct LockboxTicket {
    /// What the recipient needs to claim: the random link token, or the
    /// email address for email sends.
    pub claim_key: String,
    /// The registered lockbox commitment.
    pub lockbox_commitment: B32,
    /// Escrowed amount in micro-units.
    pub amount: u128,
    /// Token denomination.
    pub token: String,
}

/// Engine driving lockbox send, claim and reclaim.
pub struct LockboxEngine {
    api: Arc<dyn LedgerApi>,
    session: Arc<Session>,
    guard: Arc<CommitGuard>,
    balance: Arc<BalanceSync>,
    params: ProtocolParams,
    token: String,
}

impl LockboxEngine {
    /// Build the engine.
    pub fn new(
        api: Arc<dyn LedgerApi>,
        session: Arc<Session>,
        guard: Arc<CommitGuard>,
        balance: Arc<BalanceSync>,
        params: ProtocolParams,
        token: String,
    ) -> Self {
        Self {
            api,
            session,
            guard,
            balance,
            params,
            token,
        }
    }

    fn check_amount(&self, amount: u128, available: u128, passphrase: Option<&str>) -> Result<()> {
        if amount < self.params.min_send_amount {
            return Err(ClientError::AmountTooSmall);
        }
        if amount > available {
            return Err(ClientError::InsufficientBalance);
        }
        if amount > self.params.passphrase_free_limit
            && passphrase.map(str::trim).unwrap_or("").is_empty()
        {
            return Err(ClientError::PassphraseRequired);
        }
        Ok(())
    }

    /// Open a lockbox for `amount`, claimable with the returned link token
    /// (plus `passphrase`, when given).
    ///
    /// The session's own chain advance and the lockbox creation are guarded
    /// by a single three-hash commit, so they land atomically or not at
    /// all from the protocol's point of view.
    pub async fn send(&self, amount: u128, passphrase: Option<&str>) -> Result<LockboxTicket> {
        let available = self.balance.snapshot().await.available(&self.token);
        self.check_amount(amount, available, passphrase)?;

        let claim_key = B32::random().to_hex();
        let proof = derive_lockbox_proof(
            &claim_key,
            passphrase.unwrap_or(""),
            None,
            &self.params.lockbox_salt,
            &self.params.global_salt,
        )?;
        let lockbox_commitment = derive_lockbox_commitment(&proof, &self.params.global_salt)?;

        let session = self.session.snapshot().await?;
        let link = chain::advance(
            &session.input_data,
            &session.current_salt,
            &self.params.global_salt,
        )?;

        let hashes = CommitHashes::triple(
            &session.commitment,
            &link.next_commitment,
            &lockbox_commitment,
            &self.params.global_salt,
        )?;
        let request = SendRequest {
            proof: session.proof,
            next_salt: link.next_current_salt,
            next_commitment: link.next_commitment,
            lockbox_commitment,
            token: self.token.clone(),
            amount,
        };
        self.guard
            .protect(&hashes, || async {
                self.api.withdraw_and_send(&request).await
            })
            .await?;

        self.session.advance_to(&link).await?;
        tracing::info!(lockbox = %lockbox_commitment, amount, "lockbox sent");

        Ok(LockboxTicket {
            claim_key,
            lockbox_commitment,
            amount,
            token: self.token.clone(),
        })
    }

    /// Open a lockbox addressed to an email; the ledger mails the claim
    /// code and folds it into the stored commitment.
    pub async fn send_email(
        &self,
        email: &str,
        amount: u128,
        passphrase: Option<&str>,
    ) -> Result<LockboxTicket> {
        let available = self.balance.snapshot().await.available(&self.token);
        self.check_amount(amount, available, passphrase)?;

        let claim_key = email.trim().to_lowercase();
        let proof = derive_lockbox_proof(
            &claim_key,
            passphrase.unwrap_or(""),
            None,
            &self.params.lockbox_salt,
            &self.params.global_salt,
        )?;
        let lockbox_commitment = derive_lockbox_commitment(&proof, &self.params.global_salt)?;

        let session = self.session.snapshot().await?;
        let link = chain::advance(
            &session.input_data,
            &session.current_salt,
            &self.params.global_salt,
        )?;

        let hashes = CommitHashes::triple(
            &session.commitment,
            &link.next_commitment,
            &lockbox_commitment,
            &self.params.global_salt,
        )?;
        let request = SendEmailRequest {
            send: SendRequest {
                proof: session.proof,
                next_salt: link.next_current_salt,
                next_commitment: link.next_commitment,
                lockbox_commitment,
                token: self.token.clone(),
                amount,
            },
            email: claim_key.clone(),
        };
        self.guard
            .protect(&hashes, || async {
                self.api.withdraw_and_send_email(&request).await
            })
            .await?;

        self.session.advance_to(&link).await?;
        tracing::info!(lockbox = %lockbox_commitment, amount, "email lockbox sent");

        Ok(LockboxTicket {
            claim_key,
            lockbox_commitment,
            amount,
            token: self.token.clone(),
        })
    }

    /// Claim a lockbox into the signed-in account.
    ///
    /// `code` is the mailed verification code for email lockboxes.
    pub async fn claim(
        &self,
        claim_key: &str,
        passphrase: &str,
        code: Option<&str>,
    ) -> Result<()> {
        let proof = derive_lockbox_proof(
            claim_key,
            passphrase,
            code,
            &self.params.lockbox_salt,
            &self.params.global_salt,
        )?;

        let session = self.session.snapshot().await?;
        let hashes = CommitHashes::triple(
            &proof,
            &session.salt,
            &session.commitment,
            &self.params.global_salt,
        )?;
        let request = ClaimRequest {
            proof,
            salt: session.salt,
            commitment: session.commitment,
        };
        self.guard
            .protect(&hashes, || async { self.api.claim(&request).await })
            .await?;
        tracing::info!("lockbox claimed");
        Ok(())
    }

    /// Fetch and derive a lockbox's status. The server clock wins when
    /// present; the local clock fills in otherwise.
    pub async fn status(&self, lockbox_commitment: &B32) -> Result<LockboxInfo> {
        let raw = self.api.get_lockbox(lockbox_commitment).await?;
        let now = if raw.current_time > 0 {
            raw.current_time
        } else {
            current_timestamp()
        };
        Ok(LockboxInfo {
            status: LockboxStatus::derive(raw.status, raw.unlock_time, now),
            raw,
        })
    }

    /// Reclaim an expired lockbox back to its sender.
    pub async fn reclaim(&self, lockbox_commitment: &B32) -> Result<()> {
        let info = self.status(lockbox_commitment).await?;
        match info.status {
            LockboxStatus::Expired => {}
            LockboxStatus::Open => return Err(ClientError::LockboxUnavailable("still locked")),
            LockboxStatus::Claimed => {
                return Err(ClientError::LockboxUnavailable("already claimed"))
            }
            LockboxStatus::Reclaimed => {
                return Err(ClientError::LockboxUnavailable("already reclaimed"))
            }
        }

        let hashes = CommitHashes::single(lockbox_commitment, &self.params.global_salt)?;
        let request = ReclaimRequest {
            lockbox_commitment: *lockbox_commitment,
        };
        self.guard
            .protect(&hashes, || async { self.api.reclaim(&request).await })
            .await?;
        tracing::info!(lockbox = %lockbox_commitment, "lockbox reclaimed");
        Ok(())
    }

    /// Direct withdraw-and-deposit to a known commitment (no escrow).
    pub async fn deposit(&self, to_commitment: &B32, amount: u128) -> Result<()> {
        let available = self.balance.snapshot().await.available(&self.token);
        if amount == 0 {
            return Err(ClientError::AmountTooSmall);
        }
        if amount > available {
            return Err(ClientError::InsufficientBalance);
        }

        let session = self.session.snapshot().await?;
        let link = chain::advance(
            &session.input_data,
            &session.current_salt,
            &self.params.global_salt,
        )?;

        let hashes = CommitHashes::pair(
            &session.commitment,
            &link.next_commitment,
            &self.params.global_salt,
        )?;
        let request = DepositRequest {
            proof: session.proof,
            next_salt: link.next_current_salt,
            next_commitment: link.next_commitment,
            to_commitment: *to_commitment,
            token: self.token.clone(),
            amount,
        };
        self.guard
            .protect(&hashes, || async {
                self.api.withdraw_and_deposit(&request).await
            })
            .await?;

        self.session.advance_to(&link).await?;
        tracing::info!(to = %to_commitment, amount, "deposit sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_open_when_unlock_in_future() {
        assert_eq!(LockboxStatus::derive(0, 200, 100), LockboxStatus::Open);
    }

    #[test]
    fn test_status_expired_when_unlock_passed() {
        assert_eq!(LockboxStatus::derive(0, 100, 200), LockboxStatus::Expired);
        // Boundary: unlock_time == now is no longer in the future.
        assert_eq!(LockboxStatus::derive(0, 100, 100), LockboxStatus::Expired);
    }

    #[test]
    fn test_status_claimed_regardless_of_clock() {
        assert_eq!(LockboxStatus::derive(1, 200, 100), LockboxStatus::Claimed);
        assert_eq!(LockboxStatus::derive(1, 100, 200), LockboxStatus::Claimed);
    }

    #[test]
    fn test_status_reclaimed_regardless_of_clock() {
        assert_eq!(LockboxStatus::derive(2, 200, 100), LockboxStatus::Reclaimed);
        assert_eq!(LockboxStatus::derive(2, 100, 200), LockboxStatus::Reclaimed);
    }
}
