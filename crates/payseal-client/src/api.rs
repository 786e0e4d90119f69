//! Ledger API boundary.
//!
//! Every remote interaction goes through [`LedgerApi`], an opaque
//! request/response seam. [`HttpLedger`] is the production implementation;
//! tests drive the engines against the in-memory ledger in
//! [`crate::testkit`]. Wire field names are load-bearing and preserved
//! exactly.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use payseal_crypto::B32;

use crate::config::{ClientConfig, ProtocolParams};
use crate::error::{ClientError, Result};
use crate::ledger::RecordEntry;

/// Remote commit state for a hash tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    /// Nobody has committed this tuple.
    Open,
    /// This exact commit was already recorded (by us; retried request).
    ValidBySelf,
    /// Another party holds the commit; the mutation is lost.
    CommittedByOther,
}

impl CommitState {
    fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Self::Open),
            1 => Ok(Self::ValidBySelf),
            2 => Ok(Self::CommittedByOther),
            other => Err(ClientError::InvalidResponse(format!(
                "unknown commit_state {other}"
            ))),
        }
    }
}

/// A tuple of one to three commitment hashes guarding a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommitHashes {
    /// Hash of the current commitment (or the only guarded value).
    pub ct1: B32,
    /// Hash of the next commitment, when the chain advances.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ct2: Option<B32>,
    /// Hash of a third domain value, e.g. a lockbox commitment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ct3: Option<B32>,
}

/// One token's balance in micro-units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAmount {
    /// Token denomination.
    pub token: String,
    /// Balance in micro-units.
    pub amount: u128,
}

/// Response of a balance fetch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BalancePage {
    /// Per-token balances.
    pub amounts: Vec<TokenAmount>,
    /// Server-side time of the last balance mutation, Unix seconds.
    pub update_time: u64,
}

/// One page of ledger events plus the cursor to the next page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPage {
    /// Events in this page, newest first.
    pub events: Vec<RecordEntry>,
    /// Cursor to the next page; all-zero when exhausted.
    pub commitment: B32,
}

/// Raw lockbox state as stored by the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLockbox {
    /// 0 = unset, 1 = claimed, 2 = reclaimed.
    pub status: u8,
    /// Creation time, Unix seconds.
    pub create_time: u64,
    /// Time after which the sender may reclaim, Unix seconds.
    pub unlock_time: u64,
    /// Server clock at response time; 0 when unavailable.
    pub current_time: u64,
    /// Escrowed amount in micro-units.
    pub amount: u128,
    /// Token denomination of the escrowed amount.
    pub token: String,
}

/// Encrypted vault payload stored alongside a recovery public key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultBlob {
    /// Recovery public key the payload is encrypted to.
    #[serde(rename = "recoveryPk")]
    pub recovery_pk: B32,
    /// Sender-side ephemeral public key for the ECDH exchange.
    #[serde(rename = "ephemeralPk")]
    pub ephemeral_pk: B32,
    /// AEAD ciphertext, hex.
    pub ciphertext: String,
    /// AEAD tag, hex.
    pub tag: String,
    /// AEAD nonce, hex.
    pub nonce: String,
}

/// Registration body for a new account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Registry key: `H(input_data)`.
    pub salt: B32,
    /// Initial rotating salt (equal to `salt` at creation).
    pub current_salt: B32,
    /// Initial commitment.
    pub commitment: B32,
}

/// Claim body: reveal the lockbox proof, credit the claimant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRequest {
    /// Lockbox proof being revealed.
    pub proof: B32,
    /// Claimant's account salt.
    pub salt: B32,
    /// Claimant's commitment to credit.
    pub commitment: B32,
}

/// Reclaim body for an expired lockbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReclaimRequest {
    /// Commitment of the lockbox being reclaimed.
    pub lockbox_commitment: B32,
}

/// Withdraw-and-send body: advance the sender's chain and open a lockbox
/// in one protocol step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    /// Sender's current proof.
    pub proof: B32,
    /// Sender's next rotating salt.
    pub next_salt: B32,
    /// Sender's next commitment.
    pub next_commitment: B32,
    /// Commitment of the lockbox being opened.
    pub lockbox_commitment: B32,
    /// Token denomination.
    pub token: String,
    /// Amount in micro-units.
    pub amount: u128,
}

/// Email variant of [`SendRequest`]; the ledger mails a claim code and
/// folds it into the stored commitment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendEmailRequest {
    /// The plain send fields.
    #[serde(flatten)]
    pub send: SendRequest,
    /// Recipient email address.
    pub email: String,
}

/// Withdraw-and-deposit body: direct transfer to a known commitment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRequest {
    /// Sender's current proof.
    pub proof: B32,
    /// Sender's next rotating salt.
    pub next_salt: B32,
    /// Sender's next commitment.
    pub next_commitment: B32,
    /// Receiving commitment.
    pub to_commitment: B32,
    /// Token denomination.
    pub token: String,
    /// Amount in micro-units.
    pub amount: u128,
}

/// Change-password body: re-key the salt registry to a new chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangePasswordRequest {
    /// Proof for the old chain head.
    pub proof: B32,
    /// Registry key of the new chain.
    pub next_salt: B32,
    /// Initial commitment of the new chain.
    pub next_commitment: B32,
}

/// Vault initialization body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultInitRequest {
    /// Vault chain commitment.
    pub commitment: B32,
    /// Encrypted payload and recovery key.
    #[serde(flatten)]
    pub blob: VaultBlob,
}

/// Vault rotation body for a password change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultChangeRequest {
    /// Proof for the old vault commitment.
    pub proof: B32,
    /// New vault commitment.
    pub next_commitment: B32,
    /// Re-encrypted payload under the same recovery key.
    #[serde(flatten)]
    pub blob: VaultBlob,
}

/// The ledger's remote interface.
#[async_trait]
pub trait LedgerApi: Send + Sync {
    /// Protocol parameters, fetched once at connect time.
    async fn get_config(&self) -> Result<ProtocolParams>;

    /// Current rotating salt registered for `salt`; all-zero when unknown.
    async fn get_current_salt(&self, salt: &B32) -> Result<B32>;
    /// Whether `salt` is registered at all.
    async fn has_salt(&self, salt: &B32) -> Result<bool>;
    /// Whether `commitment` holds any balance.
    async fn has_balance(&self, commitment: &B32) -> Result<bool>;
    /// Whether a lockbox exists for `commitment`.
    async fn has_lockbox(&self, commitment: &B32) -> Result<bool>;
    /// Raw lockbox state for `commitment`.
    async fn get_lockbox(&self, commitment: &B32) -> Result<RawLockbox>;

    /// Commit-protect read for the primary chain.
    async fn get_commit_state(&self, hashes: &CommitHashes) -> Result<CommitState>;
    /// Commit-protect write for the primary chain.
    async fn commit(&self, hashes: &CommitHashes) -> Result<()>;
    /// Commit-protect read for the recovery-vault chain.
    async fn vault_get_commit_state(&self, hashes: &CommitHashes) -> Result<CommitState>;
    /// Commit-protect write for the recovery-vault chain.
    async fn vault_commit(&self, hashes: &CommitHashes) -> Result<()>;

    /// Balances for `commitment`.
    async fn get_balance(&self, commitment: &B32) -> Result<BalancePage>;
    /// One page of events starting at `commitment`.
    async fn get_events(&self, commitment: &B32, batch_size: u32) -> Result<EventPage>;

    /// Register a new account.
    async fn register(&self, req: &RegisterRequest) -> Result<()>;
    /// Claim a lockbox.
    async fn claim(&self, req: &ClaimRequest) -> Result<()>;
    /// Reclaim an expired lockbox.
    async fn reclaim(&self, req: &ReclaimRequest) -> Result<()>;
    /// Open a lockbox, withdrawing from the sender's chain.
    async fn withdraw_and_send(&self, req: &SendRequest) -> Result<()>;
    /// Email variant of [`LedgerApi::withdraw_and_send`].
    async fn withdraw_and_send_email(&self, req: &SendEmailRequest) -> Result<()>;
    /// Direct transfer to a known commitment.
    async fn withdraw_and_deposit(&self, req: &DepositRequest) -> Result<()>;
    /// Re-key the salt registry for a password change.
    async fn change_password(&self, req: &ChangePasswordRequest) -> Result<()>;

    /// Initialize the recovery vault.
    async fn vault_initialize(&self, req: &VaultInitRequest) -> Result<()>;
    /// Rotate the vault payload for a password change.
    async fn vault_change_password(&self, req: &VaultChangeRequest) -> Result<()>;
    /// Recovery public key for a vault commitment; all-zero when unset.
    async fn vault_get_recovery_pk(&self, commitment: &B32) -> Result<B32>;
    /// Fetch the vault payload by its recovery public key.
    async fn vault_get_blob(&self, recovery_pk: &B32) -> Result<VaultBlob>;
}

/// HTTP implementation of [`LedgerApi`].
pub struct HttpLedger {
    client: Client,
    base_url: String,
}

#[derive(Deserialize, Debug)]
struct ServerErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl HttpLedger {
    /// Build a client from the configuration's URL and timeouts.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|_| ClientError::ServerUnreachable)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn handle<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30);
            return Err(ClientError::RateLimited {
                retry_after: Duration::from_secs(retry_after),
            });
        }

        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| ClientError::InvalidResponse(e.to_string()));
        }

        let code = status.as_u16();
        let message = match response.json::<ServerErrorBody>().await {
            Ok(body) => body
                .error
                .or(body.message)
                .unwrap_or_else(|| format!("HTTP {code}")),
            Err(_) => format!("HTTP {code}"),
        };
        Err(ClientError::Server {
            status: code,
            message,
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self.client.get(self.url(path)).send().await?;
        self.handle(resp).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let resp = self.client.post(self.url(path)).json(body).send().await?;
        self.handle(resp).await
    }

    async fn post_ack<B: Serialize>(&self, path: &str, body: &B) -> Result<()> {
        let resp = self.client.post(self.url(path)).json(body).send().await?;
        let _: serde_json::Value = self.handle(resp).await?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct ConfigResponse {
    global_salt: B32,
    lockbox_salt: B32,
    min_amount: u128,
    passphrase_free_limit: u128,
}

#[derive(Deserialize)]
struct CurrentSaltResponse {
    current_salt: B32,
}

#[derive(Deserialize)]
struct HasSaltResponse {
    has_salt: bool,
}

#[derive(Deserialize)]
struct HasBalanceResponse {
    has_balance: bool,
}

#[derive(Deserialize)]
struct HasLockboxResponse {
    has_lockbox: bool,
}

#[derive(Deserialize)]
struct CommitStateResponse {
    commit_state: u8,
}

#[derive(Serialize)]
struct CommitmentBody<'a> {
    commitment: &'a B32,
}

#[derive(Serialize)]
struct EventsBody<'a> {
    commitment: &'a B32,
    batch_size: u32,
}

#[derive(Deserialize)]
struct RecoveryPkResponse {
    #[serde(rename = "recoveryPk")]
    recovery_pk: B32,
}

#[derive(Serialize)]
struct RecoveryPkBody<'a> {
    recovery_pk: &'a B32,
}

#[async_trait]
impl LedgerApi for HttpLedger {
    async fn get_config(&self) -> Result<ProtocolParams> {
        let resp: ConfigResponse = self.get("/pm_get_config").await?;
        Ok(ProtocolParams {
            global_salt: resp.global_salt,
            lockbox_salt: resp.lockbox_salt,
            min_send_amount: resp.min_amount,
            passphrase_free_limit: resp.passphrase_free_limit,
        })
    }

    async fn get_current_salt(&self, salt: &B32) -> Result<B32> {
        let resp: CurrentSaltResponse = self
            .get(&format!("/pm_get_current_salt?salt={}", salt.to_hex()))
            .await?;
        Ok(resp.current_salt)
    }

    async fn has_salt(&self, salt: &B32) -> Result<bool> {
        let resp: HasSaltResponse = self
            .get(&format!("/pm_has_salt?salt={}", salt.to_hex()))
            .await?;
        Ok(resp.has_salt)
    }

    async fn has_balance(&self, commitment: &B32) -> Result<bool> {
        let resp: HasBalanceResponse = self
            .get(&format!("/pm_has_balance?commitment={}", commitment.to_hex()))
            .await?;
        Ok(resp.has_balance)
    }

    async fn has_lockbox(&self, commitment: &B32) -> Result<bool> {
        let resp: HasLockboxResponse = self
            .get(&format!("/pm_has_lockbox?commitment={}", commitment.to_hex()))
            .await?;
        Ok(resp.has_lockbox)
    }

    async fn get_lockbox(&self, commitment: &B32) -> Result<RawLockbox> {
        self.post("/pm_get_lockbox", &CommitmentBody { commitment })
            .await
    }

    async fn get_commit_state(&self, hashes: &CommitHashes) -> Result<CommitState> {
        let resp: CommitStateResponse = self.post("/pm_get_commit_state", hashes).await?;
        CommitState::from_code(resp.commit_state)
    }

    async fn commit(&self, hashes: &CommitHashes) -> Result<()> {
        self.post_ack("/pm_commit", hashes).await
    }

    async fn vault_get_commit_state(&self, hashes: &CommitHashes) -> Result<CommitState> {
        let resp: CommitStateResponse = self.post("/rv_get_commit_state", hashes).await?;
        CommitState::from_code(resp.commit_state)
    }

    async fn vault_commit(&self, hashes: &CommitHashes) -> Result<()> {
        self.post_ack("/rv_commit", hashes).await
    }

    async fn get_balance(&self, commitment: &B32) -> Result<BalancePage> {
        self.post("/pm_get_balance", &CommitmentBody { commitment })
            .await
    }

    async fn get_events(&self, commitment: &B32, batch_size: u32) -> Result<EventPage> {
        self.post(
            "/pm_get_events",
            &EventsBody {
                commitment,
                batch_size,
            },
        )
        .await
    }

    async fn register(&self, req: &RegisterRequest) -> Result<()> {
        self.post_ack("/pm_register", req).await
    }

    async fn claim(&self, req: &ClaimRequest) -> Result<()> {
        self.post_ack("/pm_claim", req).await
    }

    async fn reclaim(&self, req: &ReclaimRequest) -> Result<()> {
        self.post_ack("/pm_reclaim", req).await
    }

    async fn withdraw_and_send(&self, req: &SendRequest) -> Result<()> {
        self.post_ack("/pm_withdraw_and_send", req).await
    }

    async fn withdraw_and_send_email(&self, req: &SendEmailRequest) -> Result<()> {
        self.post_ack("/pm_withdraw_and_send_email", req).await
    }

    async fn withdraw_and_deposit(&self, req: &DepositRequest) -> Result<()> {
        self.post_ack("/pm_withdraw_and_deposit", req).await
    }

    async fn change_password(&self, req: &ChangePasswordRequest) -> Result<()> {
        self.post_ack("/pm_change_password", req).await
    }

    async fn vault_initialize(&self, req: &VaultInitRequest) -> Result<()> {
        self.post_ack("/rv_initialize", req).await
    }

    async fn vault_change_password(&self, req: &VaultChangeRequest) -> Result<()> {
        self.post_ack("/rv_change_password", req).await
    }

    async fn vault_get_recovery_pk(&self, commitment: &B32) -> Result<B32> {
        let resp: RecoveryPkResponse = self
            .post("/rv_get_recovery_pk", &CommitmentBody { commitment })
            .await?;
        Ok(resp.recovery_pk)
    }

    async fn vault_get_blob(&self, recovery_pk: &B32) -> Result<VaultBlob> {
        self.post("/rv_get_vault", &RecoveryPkBody { recovery_pk })
            .await
    }
}
