use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use std::path::PathBuf;

use pippin::{config, metrics, Engine, WalletError};

#[derive(Parser)]
#[command(author, version, about = "pippin: custodial Nano/Banano wallet engine")]
struct Cli {
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Create a wallet, optionally from an existing 64-hex-char seed
    WalletCreate {
        #[arg(long)]
        seed: Option<String>,
    },
    WalletList,
    WalletDestroy {
        #[arg(long)]
        wallet: String,
    },
    /// Encrypt the wallet seed with a password (empty password decrypts)
    WalletEncrypt {
        #[arg(long)]
        wallet: String,
    },
    WalletViewSeed {
        #[arg(long)]
        wallet: String,
        /// Include ad-hoc private keys
        #[arg(long, default_value_t = false)]
        all_keys: bool,
    },
    AccountCreate {
        #[arg(long)]
        wallet: String,
        #[arg(long)]
        index: Option<u32>,
    },
    AccountsCreate {
        #[arg(long)]
        wallet: String,
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// Add an account by raw private key
    AdhocAdd {
        #[arg(long)]
        wallet: String,
        #[arg(long)]
        key: String,
    },
    AccountList {
        #[arg(long)]
        wallet: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    Balances {
        #[arg(long)]
        wallet: String,
    },
    /// Send raw amount from one of the wallet's accounts
    Send {
        #[arg(long)]
        wallet: String,
        #[arg(long)]
        source: String,
        #[arg(long)]
        destination: String,
        /// Amount in raw
        #[arg(long)]
        amount: String,
        /// Idempotency id; repeating it replays the first send
        #[arg(long)]
        id: Option<String>,
    },
    ReceiveAll {
        #[arg(long)]
        wallet: String,
        #[arg(long)]
        account: String,
    },
    RepresentativeSet {
        #[arg(long)]
        wallet: String,
        #[arg(long)]
        representative: String,
        /// Also publish change blocks for existing accounts
        #[arg(long, default_value_t = false)]
        update_existing: bool,
    },
    WorkGenerate {
        #[arg(long)]
        hash: String,
        #[arg(long)]
        difficulty: Option<String>,
    },
}

/// Password from `PIPPIN_PASSWORD`, else an interactive prompt.
fn obtain_password(prompt: &str) -> anyhow::Result<String> {
    if let Ok(p) = std::env::var("PIPPIN_PASSWORD") {
        return Ok(p);
    }
    if atty::is(atty::Stream::Stdin) {
        rpassword::prompt_password(prompt).context("Failed to read password")
    } else {
        Err(anyhow!("PIPPIN_PASSWORD is required in non-interactive mode"))
    }
}

/// Unlock the wallet first if it is encrypted and not in the cache.
fn unlock_if_needed(engine: &Engine, wallet: &str) -> anyhow::Result<()> {
    if engine.wallets.is_locked(wallet)? {
        let password = obtain_password("Enter wallet password: ")?;
        engine.wallets.unlock(wallet, &password).map_err(|e| match e {
            WalletError::DecryptionError => anyhow!("🔒 invalid password"),
            other => other.into(),
        })?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    // A missing file means defaults; a present but broken one is fatal.
    let cfg = if cli.config.exists() {
        config::load(&cli.config)?
    } else {
        eprintln!("⚠️  {} not found; using defaults", cli.config.display());
        config::Config::default()
    };
    if cfg.metrics.enabled {
        metrics::serve(cfg.metrics.clone())?;
    }

    let engine = Engine::init(&cfg).await.context("failed to start wallet engine")?;
    let result = run(&engine, cli.cmd).await;
    engine.shutdown().await?;
    result
}

async fn run(engine: &Engine, cmd: Cmd) -> anyhow::Result<()> {
    match cmd {
        Cmd::WalletCreate { seed } => {
            let wallet = engine.wallets.wallet_create(seed.as_deref())?;
            let first = engine.wallets.account_list(&wallet.id, Some(1))?;
            println!("✨ Wallet created: {}", wallet.id);
            if let Some(a) = first.first() {
                println!("📍 Account 0: {a}");
            }
        }
        Cmd::WalletList => {
            for w in engine.wallets.list_wallets()? {
                let accounts = engine.wallets.account_list(&w.id, None)?;
                println!(
                    "👛 {}  accounts: {}  encrypted: {}",
                    w.id,
                    accounts.len(),
                    w.encrypted
                );
            }
        }
        Cmd::WalletDestroy { wallet } => {
            engine.wallets.wallet_destroy(&wallet)?;
            println!("🗑️  Wallet {wallet} destroyed");
        }
        Cmd::WalletEncrypt { wallet } => {
            if engine.wallets.is_encrypted(&wallet)? {
                unlock_if_needed(engine, &wallet)?;
            }
            let password = obtain_password("New password (empty to decrypt): ")?;
            engine.wallets.encrypt(&wallet, &password)?;
            println!("🔐 Wallet {wallet} updated");
        }
        Cmd::WalletViewSeed { wallet, all_keys } => {
            unlock_if_needed(engine, &wallet)?;
            let record = engine.wallets.wallet(&wallet)?;
            let seed = engine.wallets.seed_hex(&record)?;
            println!("🌱 Seed: {}", seed.as_str());
            if all_keys {
                for address in engine.wallets.account_list(&wallet, None)? {
                    let key = engine.wallets.account_key(&record, &address)?;
                    if key.adhoc {
                        println!("🔑 {address}: {}", hex::encode_upper(*key.private));
                    }
                }
            }
        }
        Cmd::AccountCreate { wallet, index } => {
            unlock_if_needed(engine, &wallet)?;
            let address = engine.wallets.account_create(&wallet, index).await?;
            println!("📍 {address}");
        }
        Cmd::AccountsCreate { wallet, count } => {
            unlock_if_needed(engine, &wallet)?;
            for address in engine.wallets.accounts_create(&wallet, count).await? {
                println!("📍 {address}");
            }
        }
        Cmd::AdhocAdd { wallet, key } => {
            let password = if engine.wallets.is_encrypted(&wallet)? {
                Some(obtain_password("Enter wallet password: ")?)
            } else {
                None
            };
            let address = engine.wallets.adhoc_account_create(&wallet, &key, password.as_deref()).await?;
            println!("➕ {address}");
        }
        Cmd::AccountList { wallet, limit } => {
            for address in engine.wallets.account_list(&wallet, limit)? {
                println!("{address}");
            }
        }
        Cmd::Balances { wallet } => {
            let mut balances: Vec<_> = engine.wallets.wallet_balances(&wallet).await?.into_iter().collect();
            balances.sort_by(|a, b| a.0.cmp(&b.0));
            for (account, b) in balances {
                println!("💰 {account}  balance: {}  pending: {}", b.balance, b.pending);
            }
        }
        Cmd::Send { wallet, source, destination, amount, id } => {
            unlock_if_needed(engine, &wallet)?;
            let amount = pippin::block::parse_raw(&amount)?;
            let hash = engine
                .blocks
                .send(&wallet, &source, &destination, amount, id.as_deref(), None)
                .await?;
            println!("📤 Sent: {hash}");
        }
        Cmd::ReceiveAll { wallet, account } => {
            unlock_if_needed(engine, &wallet)?;
            let count = engine.blocks.receive_all(&wallet, &account).await?;
            println!("📥 Received {count} block(s)");
        }
        Cmd::RepresentativeSet { wallet, representative, update_existing } => {
            if update_existing {
                unlock_if_needed(engine, &wallet)?;
            }
            let changed = engine
                .blocks
                .wallet_representative_set(&wallet, &representative, update_existing)
                .await?;
            println!("🗳️  Representative set; {changed} change block(s) published");
        }
        Cmd::WorkGenerate { hash, difficulty } => {
            let work = engine.work_generate(&hash, difficulty.as_deref()).await?;
            println!("⛏️  {work}");
        }
    }
    Ok(())
}
