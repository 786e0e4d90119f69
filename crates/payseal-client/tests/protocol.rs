//! End-to-end protocol tests over the in-memory ledger.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use payseal_client::testkit::MockLedger;
use payseal_client::{
    ClientConfig, ClientError, CommitGuard, CommitHashes, LedgerApi, RecordEntry, Wallet,
};
use payseal_crypto::B32;

fn config(dir: &tempfile::TempDir) -> ClientConfig {
    let mut config = ClientConfig::with_base_url("http://mock");
    config.data_dir = dir.path().to_path_buf();
    config
}

async fn wallet_on(ledger: &Arc<MockLedger>, dir: &tempfile::TempDir) -> Wallet {
    let api: Arc<dyn LedgerApi> = Arc::clone(ledger) as Arc<dyn LedgerApi>;
    Wallet::with_api(config(dir), api).await.unwrap()
}

fn entry(action: u32, tx: &str, ts: u64) -> RecordEntry {
    RecordEntry {
        action_code: action,
        from_commitment: String::new(),
        to_commitment: String::new(),
        lockbox_commitment: String::new(),
        token: "USD".into(),
        amount: 1_000_000,
        tx_hash: tx.into(),
        timestamp: ts,
    }
}

#[tokio::test]
async fn signup_registers_and_signs_in() {
    let ledger = Arc::new(MockLedger::new());
    let dir = tempfile::tempdir().unwrap();
    let wallet = wallet_on(&ledger, &dir).await;

    wallet.sign_up("alice", "correct horse").await.unwrap();

    let session = wallet.session().snapshot().await.unwrap();
    assert_eq!(session.username, "alice");
    assert_eq!(session.salt, session.current_salt);
    assert_eq!(ledger.current_salt_of(&session.salt), Some(session.salt));
}

#[tokio::test]
async fn signup_duplicate_fails_and_leaves_no_session() {
    let ledger = Arc::new(MockLedger::new());
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();

    let first = wallet_on(&ledger, &dir_a).await;
    first.sign_up("alice", "correct horse").await.unwrap();

    let second = wallet_on(&ledger, &dir_b).await;
    let err = second.sign_up("alice", "correct horse").await.unwrap_err();
    assert!(matches!(err, ClientError::CredentialsAlreadyExist));
    assert!(!second.session().is_active().await);
}

#[tokio::test]
async fn signin_rederives_the_registered_head() {
    let ledger = Arc::new(MockLedger::new());
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();

    let first = wallet_on(&ledger, &dir_a).await;
    first.sign_up("alice", "correct horse").await.unwrap();
    let registered = first.session().snapshot().await.unwrap();

    let second = wallet_on(&ledger, &dir_b).await;
    second.sign_in("alice", "correct horse").await.unwrap();
    let rederived = second.session().snapshot().await.unwrap();

    assert_eq!(rederived.commitment, registered.commitment);
    assert_eq!(rederived.proof, registered.proof);
}

#[tokio::test]
async fn signin_with_wrong_password_fails() {
    let ledger = Arc::new(MockLedger::new());
    let dir = tempfile::tempdir().unwrap();
    let wallet = wallet_on(&ledger, &dir).await;
    wallet.sign_up("alice", "correct horse").await.unwrap();
    wallet.sign_out().await.unwrap();

    let err = wallet.sign_in("alice", "wrong horse").await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidCredentials));
}

#[tokio::test]
async fn guard_retry_takes_valid_by_self_without_double_commit() {
    let ledger = Arc::new(MockLedger::new());
    let api: Arc<dyn LedgerApi> = Arc::clone(&ledger) as Arc<dyn LedgerApi>;
    let guard = CommitGuard::new(api, Arc::new(tokio::sync::Mutex::new(())));

    let global = B32([0x42; 32]);
    let hashes = CommitHashes::pair(&B32([1; 32]), &B32([2; 32]), &global).unwrap();

    let runs = AtomicUsize::new(0);
    guard
        .protect(&hashes, || async {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(ledger.commit_count(), 1);

    // Retried call with the same tuple: action runs exactly once more and
    // no second commit is submitted.
    guard
        .protect(&hashes, || async {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(ledger.commit_count(), 1);
}

#[tokio::test]
async fn guard_conflict_fails_and_leaves_chain_untouched() {
    let ledger = Arc::new(MockLedger::new());
    let dir = tempfile::tempdir().unwrap();
    let wallet = wallet_on(&ledger, &dir).await;

    wallet.sign_up("alice", "correct horse").await.unwrap();
    let before = wallet.session().snapshot().await.unwrap();
    ledger.fund(&before.commitment, "USD", 50_000_000);
    wallet.refresh_balance().await.unwrap();

    // Simulate another device winning the race for the same link: it would
    // derive the identical hash tuple from the shared registry state.
    let session = wallet.session().snapshot().await.unwrap();
    let link = payseal_crypto::chain::advance(
        &session.input_data,
        &session.current_salt,
        &wallet.params().global_salt,
    )
    .unwrap();
    let hashes = CommitHashes::pair(
        &session.commitment,
        &link.next_commitment,
        &wallet.params().global_salt,
    )
    .unwrap();
    ledger.add_foreign_commit(&hashes);

    let err = wallet
        .deposit(&session.commitment, 1_000_000)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::CommittedByAnotherParty));

    let after = wallet.session().snapshot().await.unwrap();
    assert_eq!(after.commitment, before.commitment);
    assert_eq!(after.current_salt, before.current_salt);
}

#[tokio::test]
async fn send_advances_chain_and_opens_lockbox() {
    let ledger = Arc::new(MockLedger::new());
    let dir = tempfile::tempdir().unwrap();
    let wallet = wallet_on(&ledger, &dir).await;

    wallet.sign_up("alice", "correct horse").await.unwrap();
    let before = wallet.session().snapshot().await.unwrap();
    ledger.fund(&before.commitment, "USD", 50_000_000);
    wallet.refresh_balance().await.unwrap();

    let ticket = wallet.send(2_000_000, None).await.unwrap();

    let after = wallet.session().snapshot().await.unwrap();
    assert_ne!(after.commitment, before.commitment);
    assert_ne!(after.current_salt, before.current_salt);
    assert_eq!(after.salt, before.salt);

    let raw = ledger.lockbox(&ticket.lockbox_commitment).unwrap();
    assert_eq!(raw.amount, 2_000_000);
    assert_eq!(raw.status, 0);

    let balances = wallet.balances().await;
    assert_eq!(balances.available("USD"), 48_000_000);
}

#[tokio::test]
async fn send_enforces_amount_and_passphrase_rules() {
    let ledger = Arc::new(MockLedger::new());
    let dir = tempfile::tempdir().unwrap();
    let wallet = wallet_on(&ledger, &dir).await;

    wallet.sign_up("alice", "correct horse").await.unwrap();
    let session = wallet.session().snapshot().await.unwrap();
    ledger.fund(&session.commitment, "USD", 50_000_000);
    wallet.refresh_balance().await.unwrap();

    assert!(matches!(
        wallet.send(1, None).await.unwrap_err(),
        ClientError::AmountTooSmall
    ));
    assert!(matches!(
        wallet.send(60_000_000, None).await.unwrap_err(),
        ClientError::InsufficientBalance
    ));
    // Above the passphrase-free limit, a passphrase becomes mandatory.
    assert!(matches!(
        wallet.send(20_000_000, None).await.unwrap_err(),
        ClientError::PassphraseRequired
    ));
    assert!(wallet.send(20_000_000, Some("open sesame")).await.is_ok());
}

#[tokio::test]
async fn claim_credits_the_claimant() {
    let ledger = Arc::new(MockLedger::new());
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();

    let alice = wallet_on(&ledger, &dir_a).await;
    alice.sign_up("alice", "correct horse").await.unwrap();
    let session = alice.session().snapshot().await.unwrap();
    ledger.fund(&session.commitment, "USD", 50_000_000);
    alice.refresh_balance().await.unwrap();
    let ticket = alice.send(3_000_000, Some("open sesame")).await.unwrap();

    let bob = wallet_on(&ledger, &dir_b).await;
    bob.sign_up("bob", "another horse").await.unwrap();
    bob.claim(&ticket.claim_key, "open sesame", None)
        .await
        .unwrap();

    assert_eq!(bob.balances().await.available("USD"), 3_000_000);
    let raw = ledger.lockbox(&ticket.lockbox_commitment).unwrap();
    assert_eq!(raw.status, 1);
}

#[tokio::test]
async fn claim_with_wrong_passphrase_misses_the_lockbox() {
    let ledger = Arc::new(MockLedger::new());
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();

    let alice = wallet_on(&ledger, &dir_a).await;
    alice.sign_up("alice", "correct horse").await.unwrap();
    let session = alice.session().snapshot().await.unwrap();
    ledger.fund(&session.commitment, "USD", 50_000_000);
    alice.refresh_balance().await.unwrap();
    let ticket = alice.send(3_000_000, Some("open sesame")).await.unwrap();

    let bob = wallet_on(&ledger, &dir_b).await;
    bob.sign_up("bob", "another horse").await.unwrap();
    // A wrong passphrase derives a different proof, so the ledger has no
    // matching lockbox.
    let err = bob
        .claim(&ticket.claim_key, "wrong", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Server { status: 404, .. }));
}

#[tokio::test]
async fn reclaim_only_after_expiry() {
    let ledger = Arc::new(MockLedger::new());
    let dir = tempfile::tempdir().unwrap();
    let wallet = wallet_on(&ledger, &dir).await;

    wallet.sign_up("alice", "correct horse").await.unwrap();
    let session = wallet.session().snapshot().await.unwrap();
    ledger.fund(&session.commitment, "USD", 50_000_000);
    wallet.refresh_balance().await.unwrap();
    let ticket = wallet.send(2_000_000, None).await.unwrap();

    let err = wallet.reclaim(&ticket.lockbox_commitment).await.unwrap_err();
    assert!(matches!(err, ClientError::LockboxUnavailable("still locked")));

    ledger.expire_lockbox(&ticket.lockbox_commitment);
    wallet.reclaim(&ticket.lockbox_commitment).await.unwrap();
    assert_eq!(ledger.lockbox(&ticket.lockbox_commitment).unwrap().status, 2);
}

#[tokio::test]
async fn balance_refresh_rolls_back_on_failure() {
    let ledger = Arc::new(MockLedger::new());
    let dir = tempfile::tempdir().unwrap();
    let wallet = wallet_on(&ledger, &dir).await;

    wallet.sign_up("alice", "correct horse").await.unwrap();
    let session = wallet.session().snapshot().await.unwrap();
    ledger.fund(&session.commitment, "USD", 7_000_000);
    let good = wallet.refresh_balance().await.unwrap();
    assert_eq!(good.available("USD"), 7_000_000);

    ledger.fail_reads.store(true, Ordering::SeqCst);
    let err = wallet.balance().refresh().await.unwrap_err();
    assert!(matches!(err, ClientError::ServerUnreachable));

    // Last-known-good survives; the retry flag is raised.
    let kept = wallet.balances().await;
    assert_eq!(kept.available("USD"), 7_000_000);
    assert_eq!(kept.update_time, good.update_time);
    assert!(wallet.balance().needs_retry().await);

    // Connectivity returns: the pending retry clears the flag.
    ledger.fail_reads.store(false, Ordering::SeqCst);
    let retried = wallet.balance().retry_pending().await.unwrap();
    assert!(retried.is_some());
    assert!(!wallet.balance().needs_retry().await);
}

#[tokio::test]
async fn balance_refresh_after_signout_is_discarded() {
    let ledger = Arc::new(MockLedger::new());
    let dir = tempfile::tempdir().unwrap();
    let wallet = wallet_on(&ledger, &dir).await;

    wallet.sign_up("alice", "correct horse").await.unwrap();
    wallet.sign_out().await.unwrap();

    let err = wallet.balance().refresh().await.unwrap_err();
    assert!(matches!(err, ClientError::NotSignedIn));
    assert!(!wallet.session().is_active().await);
}

#[tokio::test]
async fn partial_send_failure_retries_idempotently() {
    let ledger = Arc::new(MockLedger::new());
    let dir = tempfile::tempdir().unwrap();
    let wallet = wallet_on(&ledger, &dir).await;

    wallet.sign_up("alice", "correct horse").await.unwrap();
    let before = wallet.session().snapshot().await.unwrap();
    ledger.fund(&before.commitment, "USD", 50_000_000);
    wallet.refresh_balance().await.unwrap();
    let commits_after_setup = ledger.commit_count();

    // The commit lands, then the action endpoint dies: the classic
    // partial-failure window.
    ledger.fail_actions.store(true, Ordering::SeqCst);
    let err = wallet.deposit(&before.commitment, 1_000_000).await.unwrap_err();
    assert!(matches!(err, ClientError::ServerUnreachable));
    assert_eq!(ledger.commit_count(), commits_after_setup + 1);

    // The chain was not advanced locally, so the retry re-derives the same
    // link, sees ValidBySelf, and does not double-submit the commit.
    let mid = wallet.session().snapshot().await.unwrap();
    assert_eq!(mid.commitment, before.commitment);

    ledger.fail_actions.store(false, Ordering::SeqCst);
    wallet.deposit(&before.commitment, 1_000_000).await.unwrap();
    assert_eq!(ledger.commit_count(), commits_after_setup + 1);

    let after = wallet.session().snapshot().await.unwrap();
    assert_ne!(after.commitment, before.commitment);
}

#[tokio::test]
async fn backfill_follows_cursors_and_persists() {
    let ledger = Arc::new(MockLedger::new());
    let dir = tempfile::tempdir().unwrap();
    let wallet = wallet_on(&ledger, &dir).await;

    wallet.sign_up("alice", "correct horse").await.unwrap();
    let session = wallet.session().snapshot().await.unwrap();

    let second_page = B32([0xb2; 32]);
    ledger.set_events(
        &session.commitment,
        vec![entry(0, "t3", 30), entry(1, "t2", 20)],
        second_page,
    );
    ledger.set_events(&second_page, vec![entry(2, "t1", 10)], B32::ZERO);

    let total = wallet.ledger().backfill(0).await.unwrap();
    assert_eq!(total, 3);
    let records = wallet.ledger().records().await;
    assert_eq!(
        records.iter().map(|r| r.tx_hash.as_str()).collect::<Vec<_>>(),
        vec!["t3", "t2", "t1"]
    );

    // A fresh wallet over the same data dir resumes from the cache without
    // a single fetch.
    let resumed = wallet_on(&ledger, &dir).await;
    assert!(resumed.restore_session().await.unwrap());
    assert_eq!(resumed.ledger().records().await.len(), 3);
}

#[tokio::test]
async fn backfill_stops_at_the_iteration_cap_on_cycles() {
    let ledger = Arc::new(MockLedger::new());
    let dir = tempfile::tempdir().unwrap();
    let wallet = wallet_on(&ledger, &dir).await;

    wallet.sign_up("alice", "correct horse").await.unwrap();
    let session = wallet.session().snapshot().await.unwrap();

    // A buggy server that keeps pointing back at the same page.
    ledger.set_events(
        &session.commitment,
        vec![entry(0, "loop", 10)],
        session.commitment,
    );

    let total = wallet.ledger().backfill(0).await.unwrap();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn poll_recent_prepends_only_the_delta() {
    let ledger = Arc::new(MockLedger::new());
    let dir = tempfile::tempdir().unwrap();
    let wallet = wallet_on(&ledger, &dir).await;

    wallet.sign_up("alice", "correct horse").await.unwrap();
    let session = wallet.session().snapshot().await.unwrap();

    ledger.set_events(
        &session.commitment,
        vec![entry(0, "t2", 20), entry(1, "t1", 10)],
        B32::ZERO,
    );
    assert_eq!(wallet.ledger().poll_recent().await.unwrap(), 2);

    // One new event lands; the cached head sits mid-page.
    ledger.set_events(
        &session.commitment,
        vec![entry(2, "t3", 30), entry(0, "t2", 20), entry(1, "t1", 10)],
        B32::ZERO,
    );
    assert_eq!(wallet.ledger().poll_recent().await.unwrap(), 1);

    let records = wallet.ledger().records().await;
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].tx_hash, "t3");

    // Nothing new: polling again is a no-op.
    assert_eq!(wallet.ledger().poll_recent().await.unwrap(), 0);
}

#[tokio::test]
async fn vault_roundtrip_recovers_the_password() {
    let ledger = Arc::new(MockLedger::new());
    let dir = tempfile::tempdir().unwrap();
    let wallet = wallet_on(&ledger, &dir).await;

    wallet.sign_up("alice", "correct horse").await.unwrap();
    let code = wallet.setup_recovery("correct horse").await.unwrap();
    assert_eq!(code.len(), 50);

    let recovered = wallet.recover_password(&code).await.unwrap();
    assert_eq!(recovered, "correct horse");

    // A wrong code derives a different keypair and finds nothing.
    let err = wallet.recover_password("not the code").await.unwrap_err();
    assert!(matches!(err, ClientError::Server { status: 404, .. }));
}

#[tokio::test]
async fn vault_setup_requires_the_real_password() {
    let ledger = Arc::new(MockLedger::new());
    let dir = tempfile::tempdir().unwrap();
    let wallet = wallet_on(&ledger, &dir).await;

    wallet.sign_up("alice", "correct horse").await.unwrap();
    let err = wallet.setup_recovery("wrong horse").await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidCredentials));
}

#[tokio::test]
async fn change_password_rekeys_account_and_vault() {
    let ledger = Arc::new(MockLedger::new());
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();

    let wallet = wallet_on(&ledger, &dir_a).await;
    wallet.sign_up("alice", "correct horse").await.unwrap();
    let session = wallet.session().snapshot().await.unwrap();
    ledger.fund(&session.commitment, "USD", 5_000_000);
    let code = wallet.setup_recovery("correct horse").await.unwrap();

    wallet.change_password("fresh stallion").await.unwrap();

    // The old credentials are gone from the registry.
    let other = wallet_on(&ledger, &dir_b).await;
    assert!(matches!(
        other.sign_in("alice", "correct horse").await.unwrap_err(),
        ClientError::InvalidCredentials
    ));

    // New credentials work and the balance followed the re-key.
    other.sign_in("alice", "fresh stallion").await.unwrap();
    assert_eq!(other.balances().await.available("USD"), 5_000_000);

    // The same recovery code now yields the new password.
    assert_eq!(
        wallet.recover_password(&code).await.unwrap(),
        "fresh stallion"
    );
}

#[tokio::test]
async fn session_restore_roundtrips_and_expires() {
    let ledger = Arc::new(MockLedger::new());
    let dir = tempfile::tempdir().unwrap();

    let wallet = wallet_on(&ledger, &dir).await;
    wallet.sign_up("alice", "correct horse").await.unwrap();

    let resumed = wallet_on(&ledger, &dir).await;
    assert!(resumed.restore_session().await.unwrap());
    assert_eq!(
        resumed.session().snapshot().await.unwrap().username,
        "alice"
    );

    resumed.sign_out().await.unwrap();
    let fresh = wallet_on(&ledger, &dir).await;
    assert!(!fresh.restore_session().await.unwrap());
}
