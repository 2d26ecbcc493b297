use clap::Parser;
use loyalty_transfer::application::config::{ConcurrencyMode, EngineConfig};
use loyalty_transfer::application::engine::TransferEngine;
use loyalty_transfer::domain::ports::StoreHandle;
use loyalty_transfer::error::TransferError;
use loyalty_transfer::infrastructure::in_memory::InMemoryStore;
use loyalty_transfer::interfaces::csv::account_reader::AccountReader;
use loyalty_transfer::interfaces::csv::account_writer::AccountWriter;
use loyalty_transfer::interfaces::csv::request_reader::TransferRequestReader;
use loyalty_transfer::logging::init_logging;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Transfers CSV file (token,from,to,amount,note)
    input: PathBuf,

    /// Opening balances CSV file (account,balance)
    #[arg(long)]
    accounts: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    #[arg(long, default_value = "pessimistic")]
    concurrency: ConcurrencyMode,

    /// Maximum wait for account locks, in milliseconds
    #[arg(long, default_value_t = 5000)]
    lock_timeout_ms: u64,

    /// Extra attempts after a concurrent-modification conflict
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            concurrency: self.concurrency,
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
            max_conflict_retries: self.max_retries,
            ..EngineConfig::default()
        }
    }
}

#[cfg(feature = "storage-rocksdb")]
fn open_store(db_path: Option<&PathBuf>) -> Result<StoreHandle> {
    use loyalty_transfer::infrastructure::rocksdb::RocksDBStore;

    match db_path {
        Some(path) => Ok(Arc::new(RocksDBStore::open(path).into_diagnostic()?)),
        None => Ok(Arc::new(InMemoryStore::new())),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_store(db_path: Option<&PathBuf>) -> Result<StoreHandle> {
    if db_path.is_some() {
        miette::bail!("--db-path requires the storage-rocksdb feature");
    }
    Ok(Arc::new(InMemoryStore::new()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let store = open_store(cli.db_path.as_ref())?;
    let engine = TransferEngine::with_config(store, cli.engine_config());

    if let Some(path) = &cli.accounts {
        let file = File::open(path).into_diagnostic()?;
        for row in AccountReader::new(file).accounts() {
            match row {
                Ok(opening) => match engine.open_account(opening.account, opening.balance).await {
                    Ok(_) => {}
                    Err(TransferError::AccountExists(account)) => {
                        warn!(%account, "account already exists, keeping stored balance");
                    }
                    Err(e) => warn!(error = %e, "failed to open account"),
                },
                Err(e) => warn!(error = %e, "skipping malformed account row"),
            }
        }
    }

    let file = File::open(&cli.input).into_diagnostic()?;
    let mut completed = 0usize;
    let mut failed = 0usize;
    for request in TransferRequestReader::new(file).requests() {
        match request {
            Ok(request) => match engine.submit(request).await {
                Ok(_) => completed += 1,
                Err(e) => {
                    failed += 1;
                    warn!(code = e.code(), error = %e, "transfer rejected");
                }
            },
            Err(e) => {
                failed += 1;
                warn!(error = %e, "skipping malformed transfer row");
            }
        }
    }
    info!(completed, failed, "batch finished");

    let accounts = engine.accounts().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = AccountWriter::new(stdout.lock());
    writer.write_accounts(accounts).into_diagnostic()?;

    Ok(())
}
