use crate::domain::account::{Account, AccountId, Balance};
use crate::domain::changes::{ChangeSet, Committed, TransferWrite, apply_transition};
use crate::domain::ledger::LedgerEntry;
use crate::domain::ports::{AccountGuard, AccountStore, Ledger, TransactionalStore, TransferStore};
use crate::domain::transfer::{IdempotencyToken, Transfer};
use crate::error::{Result, TransferError};
use crate::infrastructure::locks::AccountLocks;
use async_trait::async_trait;
use chrono::Utc;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Column Family for account balances, keyed by account id.
pub const CF_ACCOUNTS: &str = "accounts";
/// Column Family for transfer records, keyed by transfer id.
pub const CF_TRANSFERS: &str = "transfers";
/// Unique index: idempotency token -> transfer id.
pub const CF_TOKENS: &str = "transfer_tokens";
/// Index: (account id, transfer id) for sender and receiver.
pub const CF_ACCOUNT_TRANSFERS: &str = "account_transfers";
/// Column Family for ledger entries, keyed by entry id.
pub const CF_LEDGER: &str = "ledger_entries";
/// Index: (account id, entry id).
pub const CF_ACCOUNT_LEDGER: &str = "account_ledger";
/// Index: (transfer id, entry id).
pub const CF_TRANSFER_LEDGER: &str = "transfer_ledger";
/// Id sequences.
pub const CF_META: &str = "meta";

const SEQ_TRANSFER: &[u8] = b"seq:transfer";
const SEQ_LEDGER: &[u8] = b"seq:ledger";

const COLUMN_FAMILIES: [&str; 8] = [
    CF_ACCOUNTS,
    CF_TRANSFERS,
    CF_TOKENS,
    CF_ACCOUNT_TRANSFERS,
    CF_LEDGER,
    CF_ACCOUNT_LEDGER,
    CF_TRANSFER_LEDGER,
    CF_META,
];

fn pair_key(a: u64, b: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&a.to_be_bytes());
    key[8..].copy_from_slice(&b.to_be_bytes());
    key
}

fn decode_u64(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| TransferError::internal("corrupt 8-byte key or sequence value"))?;
    Ok(u64::from_be_bytes(raw))
}

/// A persistent transactional store using RocksDB.
///
/// Every commit is a single `WriteBatch`, so a change set lands entirely or
/// not at all. Commits are serialised through `commit_lock`, which makes the
/// validation reads and the batch write one isolated step. Secondary indexes
/// use big-endian composite keys so a prefix scan returns rows in id order.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    commit_lock: Arc<Mutex<()>>,
    locks: AccountLocks,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating
    /// any missing column family.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            commit_lock: Arc::new(Mutex::new(())),
            locks: AccountLocks::new(),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| TransferError::internal(format!("{name} column family not found")))
    }

    fn read<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Ids stored in the second half of every composite key under `prefix`.
    fn index_scan(&self, cf: &str, prefix: u64) -> Result<Vec<u64>> {
        let prefix = prefix.to_be_bytes();
        let mut ids = Vec::new();
        let iter = self
            .db
            .iterator_cf(self.cf(cf)?, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            ids.push(decode_u64(&key[8..])?);
        }
        Ok(ids)
    }

    fn next_sequence(&self, name: &[u8]) -> Result<u64> {
        match self.db.get_cf(self.cf(CF_META)?, name)? {
            Some(bytes) => decode_u64(&bytes),
            None => Ok(1),
        }
    }

    fn load_balance(&self, account: AccountId) -> Result<Option<Balance>> {
        self.read(CF_ACCOUNTS, &account.0.to_be_bytes())
    }

    fn load_transfer(&self, id: u64) -> Result<Transfer> {
        self.read(CF_TRANSFERS, &id.to_be_bytes())?
            .ok_or_else(|| TransferError::internal(format!("transfer index points at missing row {id}")))
    }

    fn load_entry(&self, id: u64) -> Result<LedgerEntry> {
        self.read(CF_LEDGER, &id.to_be_bytes())?
            .ok_or_else(|| TransferError::internal(format!("ledger index points at missing row {id}")))
    }

    fn put<T: Serialize>(&self, batch: &mut WriteBatch, cf: &str, key: &[u8], value: &T) -> Result<()> {
        batch.put_cf(self.cf(cf)?, key, serde_json::to_vec(value)?);
        Ok(())
    }

    /// Validates and writes a change set. Callers must hold `commit_lock`.
    fn commit_locked(&self, changes: ChangeSet) -> Result<Committed> {
        let at = Utc::now();
        let balances = changes.resolve_balances(|account| self.load_balance(account))?;

        let mut batch = WriteBatch::default();
        for (account, balance) in &balances {
            self.put(&mut batch, CF_ACCOUNTS, &account.0.to_be_bytes(), balance)?;
        }

        let mut staged_transfer_id = None;
        let mut committed_transfer = None;
        match changes.transfer {
            Some(TransferWrite::Insert(new)) => {
                if self.db.get_pinned_cf(self.cf(CF_TOKENS)?, new.token.as_str())?.is_some() {
                    return Err(TransferError::DuplicateToken(new.token.to_string()));
                }
                let id = self.next_sequence(SEQ_TRANSFER)?;
                let transfer = new.into_transfer(id, at);
                self.put(&mut batch, CF_TRANSFERS, &id.to_be_bytes(), &transfer)?;
                batch.put_cf(self.cf(CF_TOKENS)?, transfer.token.as_str(), id.to_be_bytes());
                for account in [transfer.from, transfer.to] {
                    batch.put_cf(self.cf(CF_ACCOUNT_TRANSFERS)?, pair_key(account.0, id), b"");
                }
                batch.put_cf(self.cf(CF_META)?, SEQ_TRANSFER, (id + 1).to_be_bytes());
                staged_transfer_id = Some(id);
                committed_transfer = Some(transfer);
            }
            Some(TransferWrite::Transition {
                token,
                from,
                to,
                fail_reason,
            }) => {
                let stored = self
                    .get_transfer_by_token(&token)?
                    .ok_or_else(|| TransferError::TransferNotFound(token.to_string()))?;
                let next = apply_transition(&stored, from, to, fail_reason, at)?;
                self.put(&mut batch, CF_TRANSFERS, &next.id.to_be_bytes(), &next)?;
                staged_transfer_id = Some(next.id);
                committed_transfer = Some(next);
            }
            None => {}
        }

        let mut next_entry_id = self.next_sequence(SEQ_LEDGER)?;
        let mut entries = Vec::with_capacity(changes.entries.len());
        for new in changes.entries {
            let entry = new.into_entry(next_entry_id, staged_transfer_id, at);
            self.put(&mut batch, CF_LEDGER, &entry.id.to_be_bytes(), &entry)?;
            batch.put_cf(self.cf(CF_ACCOUNT_LEDGER)?, pair_key(entry.account.0, entry.id), b"");
            if let Some(transfer_id) = entry.transfer_id {
                batch.put_cf(self.cf(CF_TRANSFER_LEDGER)?, pair_key(transfer_id, entry.id), b"");
            }
            next_entry_id += 1;
            entries.push(entry);
        }
        if !entries.is_empty() {
            batch.put_cf(self.cf(CF_META)?, SEQ_LEDGER, next_entry_id.to_be_bytes());
        }

        self.db.write(batch)?;

        Ok(Committed {
            balances,
            entries,
            transfer: committed_transfer,
        })
    }

    fn get_transfer_by_token(&self, token: &IdempotencyToken) -> Result<Option<Transfer>> {
        match self.db.get_cf(self.cf(CF_TOKENS)?, token.as_str())? {
            Some(id) => Ok(Some(self.load_transfer(decode_u64(&id)?)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl AccountStore for RocksDBStore {
    async fn balance(&self, account: AccountId) -> Result<Option<Balance>> {
        self.load_balance(account)
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        let mut accounts = Vec::new();
        let iter = self.db.iterator_cf(self.cf(CF_ACCOUNTS)?, IteratorMode::Start);
        for item in iter {
            let (key, value) = item?;
            accounts.push(Account {
                id: AccountId(decode_u64(&key)?),
                balance: serde_json::from_slice(&value)?,
            });
        }
        Ok(accounts)
    }

    async fn lock(&self, accounts: &[AccountId], wait: Duration) -> Result<AccountGuard> {
        self.locks.acquire(accounts, wait).await
    }
}

#[async_trait]
impl Ledger for RocksDBStore {
    async fn entries_for_account(&self, account: AccountId) -> Result<Vec<LedgerEntry>> {
        self.index_scan(CF_ACCOUNT_LEDGER, account.0)?
            .into_iter()
            .map(|id| self.load_entry(id))
            .collect()
    }

    async fn entries_for_transfer(&self, transfer_id: u64) -> Result<Vec<LedgerEntry>> {
        self.index_scan(CF_TRANSFER_LEDGER, transfer_id)?
            .into_iter()
            .map(|id| self.load_entry(id))
            .collect()
    }
}

#[async_trait]
impl TransferStore for RocksDBStore {
    async fn get_by_token(&self, token: &IdempotencyToken) -> Result<Option<Transfer>> {
        self.get_transfer_by_token(token)
    }

    async fn list_for_account(
        &self,
        account: AccountId,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<Transfer>, usize)> {
        let ids = self.index_scan(CF_ACCOUNT_TRANSFERS, account.0)?;
        let total = ids.len();
        let items = ids
            .into_iter()
            .rev()
            .skip(offset)
            .take(limit)
            .map(|id| self.load_transfer(id))
            .collect::<Result<Vec<_>>>()?;
        Ok((items, total))
    }
}

#[async_trait]
impl TransactionalStore for RocksDBStore {
    async fn commit(&self, changes: ChangeSet) -> Result<Committed> {
        let _serialised = self.commit_lock.lock().await;
        self.commit_locked(changes)
    }
}
