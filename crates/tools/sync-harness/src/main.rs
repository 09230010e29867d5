//! CLI harness for the ledger mirror
//!
//! This tool allows:
//! - Registering watch-only wallets in a store
//! - Syncing a wallet against an HTTP indexer
//! - Printing balances
//! - Exporting and importing store dumps
//! - Running an offline demo against the in-memory indexer

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use mirror_core::{
    ChainTransaction, TxInput, TxOutput, TxState, UtxoKey, WalletHandle, WalletId, WalletKind,
    WatchOnlyWallet,
};
use mirror_params::{Network, NetworkType};
use mirror_storage_sqlite::{
    export_dump, get_balance, restore_dump, AddressRecord, Database, Repository, StoreDump,
    WalletRecord,
};
use mirror_sync::{
    HttpIndexerClient, HttpIndexerConfig, IndexerClient, MockIndexer, SyncConfig, SyncEngine,
    SyncReport,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "sync-harness")]
#[command(about = "Ledger mirror sync harness", long_about = None)]
struct Cli {
    /// Store path
    #[arg(long, env = "MIRROR_DB_PATH", default_value = "mirror.db", global = true)]
    db: PathBuf,

    /// Network: mainnet, testnet or preprod
    #[arg(long, default_value = "mainnet", global = true)]
    network: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a watch-only wallet
    AddWallet {
        /// Wallet id
        #[arg(long)]
        id: String,

        /// Display name
        #[arg(long)]
        name: Option<String>,

        /// Addresses to watch
        #[arg(long = "address", required = true)]
        addresses: Vec<String>,
    },

    /// Sync a wallet against an indexer
    Sync {
        /// Wallet id
        #[arg(long)]
        wallet: String,

        /// Indexer base URL (defaults to the network's public indexer)
        #[arg(long)]
        indexer: Option<String>,

        /// Request timeout in seconds
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Print a wallet's balance
    Balance {
        /// Wallet id
        #[arg(long)]
        wallet: String,
    },

    /// Write the whole store to a JSON dump
    Export {
        /// Output file
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Replace the store's contents with a JSON dump
    Import {
        /// Input file
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Sync, roll back and resync against the in-memory indexer
    Demo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let network = Network::from_type(NetworkType::from_name(&cli.network)?);

    match cli.command {
        Commands::AddWallet {
            id,
            name,
            addresses,
        } => add_wallet(&cli.db, id, name, addresses),
        Commands::Sync {
            wallet,
            indexer,
            timeout,
        } => run_sync(&cli.db, &network, wallet, indexer, timeout).await,
        Commands::Balance { wallet } => show_balance(&cli.db, &network, wallet),
        Commands::Export { out } => export(&cli.db, &out),
        Commands::Import { input } => import(&cli.db, &input),
        Commands::Demo => run_demo(&network).await,
    }
}

fn add_wallet(
    path: &Path,
    id: String,
    name: Option<String>,
    addresses: Vec<String>,
) -> anyhow::Result<()> {
    let db = Database::open(path)?;
    let id = WalletId::new(id);
    let repo = Repository::new(&db);
    repo.create_wallet(&WalletRecord::new(
        id.clone(),
        name.unwrap_or_else(|| id.to_string()),
        WalletKind::WatchOnly,
    ))?;
    for hash in &addresses {
        repo.insert_address(&AddressRecord {
            wallet_id: id.clone(),
            hash: hash.clone(),
            chain: None,
            derivation_index: None,
            used: false,
        })?;
    }
    info!("Registered wallet {} with {} addresses", id, addresses.len());
    Ok(())
}

/// Open a stored wallet. Only watch-only wallets can be opened here: HD
/// wallets need a key-backed deriver the harness does not have.
fn open_wallet(db: &Database, id: &str) -> anyhow::Result<WalletHandle> {
    let id = WalletId::new(id);
    let record = Repository::new(db).require_wallet(&id)?;
    match record.kind {
        WalletKind::WatchOnly => Ok(WalletHandle::WatchOnly(WatchOnlyWallet::new(id))),
        other => bail!("wallet {} is {}; the harness only opens watch-only wallets", id, other.as_str()),
    }
}

async fn run_sync(
    path: &Path,
    network: &Network,
    wallet: String,
    indexer: Option<String>,
    timeout: u64,
) -> anyhow::Result<()> {
    let mut db = Database::open(path)?;
    let handle = open_wallet(&db, &wallet)?;

    let mut config = HttpIndexerConfig::for_network(network);
    if let Some(url) = indexer {
        config.base_url = url;
    }
    config.timeout = Duration::from_secs(timeout);
    info!("Indexer: {}", config.base_url);

    let engine = SyncEngine::new(HttpIndexerClient::new(config)?, SyncConfig::from_network(network));
    let report = sync_with_progress(&engine, &mut db, &handle).await?;
    print_report(&report);
    show_balance(path, network, wallet)
}

async fn sync_with_progress<C: IndexerClient>(
    engine: &SyncEngine<C>,
    db: &mut Database,
    wallet: &WalletHandle,
) -> anyhow::Result<SyncReport> {
    let progress = engine.progress();
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("[{elapsed_precise}] {spinner} {msg}")
            .context("progress template")?,
    );
    pb.enable_steady_tick(Duration::from_millis(120));

    let sync = engine.sync_wallet(db, wallet);
    tokio::pin!(sync);
    let result = loop {
        tokio::select! {
            result = &mut sync => break result,
            _ = tokio::time::sleep(Duration::from_millis(200)) => {
                let snapshot = progress.snapshot();
                let tip = snapshot
                    .tip_height
                    .map(|h| format!("tip {}", h))
                    .unwrap_or_default();
                pb.set_message(format!("{} {}", snapshot.stage.name(), tip));
            }
        }
    };
    pb.finish_and_clear();
    Ok(result?)
}

fn print_report(report: &SyncReport) {
    info!("Synced {} to height {}", report.wallet, report.tip.height);
    info!(
        "  UTXOs: +{} / -{}",
        report.utxos_added, report.utxos_removed
    );
    info!(
        "  Transactions: {} new, {} updated, {} replaced, {} failed",
        report.transactions_inserted,
        report.transactions_updated,
        report.transactions_replaced,
        report.transactions_failed
    );
    if report.rollbacks > 0 {
        info!("  Recovered from {} rollback(s)", report.rollbacks);
    }
    if let Some(height) = report.safe_point_height {
        info!("  New safe point at height {}", height);
    }
}

fn show_balance(path: &Path, network: &Network, wallet: String) -> anyhow::Result<()> {
    let mut db = Database::open(path)?;
    let balance = get_balance(&mut db, &WalletId::new(wallet.clone()))?;
    info!(
        "Balance of {}: {} {}",
        wallet,
        balance.format_default(network),
        network.default_token.ticker
    );
    for (token, amount) in balance.amounts() {
        if !token.is_empty() {
            info!("  {}: {}", token, amount);
        }
    }
    Ok(())
}

fn export(path: &Path, out: &Path) -> anyhow::Result<()> {
    let mut db = Database::open(path)?;
    let dump = export_dump(&mut db)?;
    std::fs::write(out, dump.to_json()?)
        .with_context(|| format!("writing {}", out.display()))?;
    info!("Exported store (schema v{}) to {}", dump.schema_version, out.display());
    Ok(())
}

fn import(path: &Path, input: &Path) -> anyhow::Result<()> {
    let json =
        std::fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?;
    let dump = StoreDump::from_json(&json)?;
    let mut db = Database::open(path)?;
    restore_dump(&mut db, dump)?;
    info!("Imported {} into {}", input.display(), path.display());
    Ok(())
}

fn payment(hash: &str, from: (&str, &UtxoKey, u64), outputs: &[(&str, u64)]) -> ChainTransaction {
    ChainTransaction {
        hash: hash.to_string(),
        state: TxState::Pending,
        block: None,
        ordinal: None,
        last_update: 0,
        inputs: vec![TxInput {
            address: from.0.to_string(),
            tx_hash: from.1.tx_hash.clone(),
            output_index: from.1.output_index,
            amount: from.2,
            assets: vec![],
        }],
        outputs: outputs
            .iter()
            .map(|(address, amount)| TxOutput {
                address: address.to_string(),
                amount: *amount,
                assets: vec![],
            })
            .collect(),
    }
}

async fn run_demo(network: &Network) -> anyhow::Result<()> {
    info!("Starting offline demo");
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("demo.db");
    let mut db = Database::open(&path)?;

    add_wallet(
        &path,
        "demo".to_string(),
        None,
        vec!["demo_receive".to_string(), "demo_change".to_string()],
    )?;
    let wallet = open_wallet(&db, "demo")?;

    let indexer = Arc::new(MockIndexer::new());
    indexer.mine(vec![payment(
        "deposit",
        ("faucet", &UtxoKey::new("genesis_funds", 0), 4_000_000),
        &[("demo_receive", 4_000_000)],
    )]);
    indexer.mine(vec![payment(
        "purchase",
        ("demo_receive", &UtxoKey::new("deposit", 0), 4_000_000),
        &[("demo_change", 2_100_000), ("merchant", 1_731_391)],
    )]);
    indexer.mine_empty(4);

    let engine = SyncEngine::new(indexer.clone(), SyncConfig::from_network(network));
    let report = sync_with_progress(&engine, &mut db, &wallet).await?;
    print_report(&report);
    show_balance(&path, network, "demo".to_string())?;

    info!("Rolling back the last 5 blocks and mining a different fork");
    indexer.rollback(5);
    indexer.mine_empty(6);
    let report = sync_with_progress(&engine, &mut db, &wallet).await?;
    print_report(&report);
    show_balance(&path, network, "demo".to_string())?;

    Ok(())
}
