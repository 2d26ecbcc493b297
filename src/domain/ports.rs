use super::account::{Account, AccountId, Balance};
use super::changes::{ChangeSet, Committed};
use super::ledger::LedgerEntry;
use super::transfer::{IdempotencyToken, Transfer};
use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Exclusive hold on a set of accounts, released when dropped.
///
/// The lock implementation stays with the adapter; the guard only keeps it
/// alive and records which accounts it covers.
pub struct AccountGuard {
    accounts: Vec<AccountId>,
    _held: Option<Box<dyn Send + Sync>>,
}

impl AccountGuard {
    /// `held` is whatever releases the locks on drop.
    pub fn new(mut accounts: Vec<AccountId>, held: impl Send + Sync + 'static) -> Self {
        accounts.sort_unstable();
        accounts.dedup();
        Self {
            accounts,
            _held: Some(Box::new(held)),
        }
    }

    /// A guard holding no locks, used by optimistic units of work.
    pub fn empty() -> Self {
        Self {
            accounts: Vec::new(),
            _held: None,
        }
    }

    pub fn covers(&self, account: AccountId) -> bool {
        self.accounts.binary_search(&account).is_ok()
    }

    pub fn accounts(&self) -> &[AccountId] {
        &self.accounts
    }
}

impl fmt::Debug for AccountGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountGuard")
            .field("accounts", &self.accounts)
            .finish()
    }
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn balance(&self, account: AccountId) -> Result<Option<Balance>>;
    async fn all_accounts(&self) -> Result<Vec<Account>>;

    /// Acquires exclusive per-account locks, in ascending id order, waiting
    /// at most `wait`. The locks are released when the guard drops.
    async fn lock(&self, accounts: &[AccountId], wait: Duration) -> Result<AccountGuard>;
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Entries of one account in creation order.
    async fn entries_for_account(&self, account: AccountId) -> Result<Vec<LedgerEntry>>;
    async fn entries_for_transfer(&self, transfer_id: u64) -> Result<Vec<LedgerEntry>>;
}

#[async_trait]
pub trait TransferStore: Send + Sync {
    async fn get_by_token(&self, token: &IdempotencyToken) -> Result<Option<Transfer>>;

    /// Transfers where `account` is sender or receiver, newest first,
    /// together with the total number of matches.
    async fn list_for_account(
        &self,
        account: AccountId,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<Transfer>, usize)>;
}

/// A store that can apply a [`ChangeSet`] as one atomic unit.
///
/// `commit` must reject the whole change set when any expected prior
/// balance is stale (`Conflict`), a balance would go negative
/// (`InsufficientFunds`), an account is missing (`AccountNotFound`), or an
/// inserted transfer reuses a token (`DuplicateToken`).
#[async_trait]
pub trait TransactionalStore: AccountStore + Ledger + TransferStore {
    async fn commit(&self, changes: ChangeSet) -> Result<Committed>;
}

pub type StoreHandle = Arc<dyn TransactionalStore>;
pub type StoreFactory = Box<dyn Fn() -> StoreHandle + Send + Sync>;
