#![allow(dead_code)]

use loyalty_transfer::application::config::{ConcurrencyMode, EngineConfig};
use loyalty_transfer::application::engine::TransferEngine;
use loyalty_transfer::domain::account::AccountId;
use loyalty_transfer::infrastructure::in_memory::InMemoryStore;
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub fn config(mode: ConcurrencyMode) -> EngineConfig {
    EngineConfig {
        concurrency: mode,
        lock_timeout: Duration::from_secs(10),
        // Optimistic units under heavy contention need room to retry.
        max_conflict_retries: 1_000,
        ..EngineConfig::default()
    }
}

pub async fn engine_with(mode: ConcurrencyMode, accounts: &[(u64, u64)]) -> Arc<TransferEngine> {
    let engine = TransferEngine::with_config(Arc::new(InMemoryStore::new()), config(mode));
    for (id, balance) in accounts {
        engine.open_account(AccountId(*id), *balance).await.unwrap();
    }
    Arc::new(engine)
}

pub fn write_accounts_csv(path: &Path, accounts: &[(u64, u64)]) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);
    wtr.write_record(["account", "balance"])?;
    for (id, balance) in accounts {
        wtr.write_record([id.to_string(), balance.to_string()])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes `rows` transfers of one point each, alternating direction between
/// accounts 1 and 2.
pub fn generate_transfers_csv(path: &Path, rows: usize) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);
    wtr.write_record(["token", "from", "to", "amount", "note"])?;
    for i in 1..=rows {
        let (from, to) = if i % 2 == 0 { ("2", "1") } else { ("1", "2") };
        wtr.write_record([format!("gen-{i}").as_str(), from, to, "1", ""])?;
    }
    wtr.flush()?;
    Ok(())
}
