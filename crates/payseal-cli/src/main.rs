use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;

use payseal_client::amounts::{format_micro, to_micro};
use payseal_client::ledger::Direction;
use payseal_client::{ClientConfig, Wallet};
use payseal_crypto::B32;

#[derive(Parser)]
#[command(name = "payseal", about = "Wallet for the payseal ledger", version)]
struct Cli {
    /// Ledger server URL (overrides PAYSEAL_SERVER)
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new account
    Signup { username: String },
    /// Sign in to an existing account
    Login { username: String },
    /// Sign out and forget the local session
    Logout,
    /// Show balances
    Balance {
        /// Fetch fresh balances from the ledger first
        #[arg(long)]
        refresh: bool,
    },
    /// Send a lockbox payment; prints the claim token
    Send {
        /// Amount, e.g. "12.50"
        amount: String,
        /// Require a claim passphrase (prompted)
        #[arg(long)]
        passphrase: bool,
        /// Send to an email address instead of a link token
        #[arg(long)]
        email: Option<String>,
    },
    /// Claim a lockbox with its token or email plus passphrase
    Claim {
        claim_key: String,
        /// Verification code for email lockboxes
        #[arg(long)]
        code: Option<String>,
    },
    /// Reclaim an expired lockbox you sent
    Reclaim { lockbox: String },
    /// Show the status of a lockbox
    Status { lockbox: String },
    /// Show transaction history
    History {
        /// Backfill the full chain instead of only the newest page
        #[arg(long)]
        full: bool,
    },
    /// Change the account password
    ChangePassword,
    /// Set up the recovery vault; prints the one-time recovery code
    RecoverySetup,
    /// Recover a forgotten password with a recovery code
    Recover { code: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::from_env()?;
    if let Some(server) = &cli.server {
        config.base_url = server.trim_end_matches('/').to_string();
    }
    let decimals = config.decimals;

    let wallet = Wallet::connect(config)
        .await
        .context("Failed to connect to the ledger server")?;

    match cli.command {
        Command::Signup { username } => {
            let password = prompt_new_password()?;
            wallet.sign_up(&username, &password).await?;
            println!("{}", "Account created and signed in.".green());
        }

        Command::Login { username } => {
            let password = rpassword::prompt_password("Password: ")?;
            wallet.sign_in(&username, &password).await?;
            println!("{}", "Signed in.".green());
        }

        Command::Logout => {
            require_session(&wallet).await?;
            wallet.sign_out().await?;
            println!("Signed out.");
        }

        Command::Balance { refresh } => {
            require_session(&wallet).await?;
            let snapshot = if refresh {
                wallet.refresh_balance().await?
            } else {
                wallet.balances().await
            };
            if snapshot.amounts.is_empty() {
                println!("No balances.");
            }
            for entry in &snapshot.amounts {
                println!(
                    "{}  {}",
                    format_micro(entry.amount, decimals).bold(),
                    entry.token
                );
            }
        }

        Command::Send {
            amount,
            passphrase,
            email,
        } => {
            require_session(&wallet).await?;
            let micro = to_micro(&amount, decimals)?;
            let passphrase = if passphrase {
                Some(rpassword::prompt_password("Claim passphrase: ")?)
            } else {
                None
            };

            let ticket = match &email {
                Some(email) => {
                    wallet
                        .send_email(email, micro, passphrase.as_deref())
                        .await?
                }
                None => wallet.send(micro, passphrase.as_deref()).await?,
            };

            println!(
                "{} {} {}",
                "Sent".green(),
                format_micro(ticket.amount, decimals),
                ticket.token
            );
            println!("Lockbox:     {}", ticket.lockbox_commitment);
            match email {
                Some(_) => println!("The recipient will receive a claim code by email."),
                None => {
                    println!("Claim token: {}", ticket.claim_key.bold());
                    println!(
                        "{}",
                        "Share the claim token (and passphrase, if set) with the recipient."
                            .yellow()
                    );
                }
            }
        }

        Command::Claim { claim_key, code } => {
            require_session(&wallet).await?;
            let passphrase = rpassword::prompt_password("Claim passphrase (empty if none): ")?;
            wallet
                .claim(&claim_key, &passphrase, code.as_deref())
                .await?;
            println!("{}", "Lockbox claimed.".green());
        }

        Command::Reclaim { lockbox } => {
            require_session(&wallet).await?;
            let commitment: B32 = lockbox.parse().context("Invalid lockbox commitment")?;
            wallet.reclaim(&commitment).await?;
            println!("{}", "Lockbox reclaimed.".green());
        }

        Command::Status { lockbox } => {
            let commitment: B32 = lockbox.parse().context("Invalid lockbox commitment")?;
            let info = wallet.lockbox_status(&commitment).await?;
            println!(
                "{:?}  {} {}  (unlocks at {})",
                info.status,
                format_micro(info.raw.amount, decimals),
                info.raw.token,
                info.raw.unlock_time
            );
        }

        Command::History { full } => {
            require_session(&wallet).await?;
            let views = wallet.history(full).await?;
            if views.is_empty() {
                println!("No transactions.");
            }
            for view in views {
                let sign = match view.direction {
                    Direction::Incoming => "+".green(),
                    Direction::Outgoing => "-".red(),
                    Direction::Neutral => " ".normal(),
                };
                println!(
                    "{}  {}{} {}  {:?}  {}",
                    view.timestamp,
                    sign,
                    format_micro(view.amount, decimals),
                    view.token,
                    view.kind,
                    view.tx_hash
                );
            }
        }

        Command::ChangePassword => {
            require_session(&wallet).await?;
            let new_password = prompt_new_password()?;
            wallet.change_password(&new_password).await?;
            println!("{}", "Password changed.".green());
        }

        Command::RecoverySetup => {
            require_session(&wallet).await?;
            let password = rpassword::prompt_password("Confirm your password: ")?;
            let code = wallet.setup_recovery(&password).await?;
            println!("{}", "Recovery vault initialized.".green());
            println!();
            println!("Recovery code: {}", code.bold());
            println!(
                "{}",
                "Store it somewhere safe. It will NOT be shown again.".red().bold()
            );
        }

        Command::Recover { code } => {
            let password = wallet.recover_password(&code).await?;
            println!("Your password is: {}", password.bold());
        }
    }

    Ok(())
}

async fn require_session(wallet: &Wallet) -> Result<()> {
    if !wallet.restore_session().await? {
        bail!("Not signed in. Run 'payseal login <username>' first.");
    }
    Ok(())
}

fn prompt_new_password() -> Result<String> {
    loop {
        let password = rpassword::prompt_password("New password: ")?;
        if password.len() < 8 {
            println!("Password must be at least 8 characters. Please try again.");
            continue;
        }
        let confirm = rpassword::prompt_password("Confirm password: ")?;
        if password != confirm {
            println!("Passwords do not match. Please try again.");
            continue;
        }
        return Ok(password);
    }
}
