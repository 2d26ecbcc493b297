use super::config::{ConcurrencyMode, EngineConfig};
use crate::domain::account::{AccountId, Balance};
use crate::domain::changes::{BalanceWrite, ChangeSet, Committed, TransferWrite};
use crate::domain::ledger::NewLedgerEntry;
use crate::domain::ports::{AccountGuard, TransactionalStore};
use crate::domain::transfer::{IdempotencyToken, NewTransfer, Transfer, TransferStatus};
use crate::error::{Result, TransferError};
use std::collections::BTreeMap;

/// The atomic, isolated boundary of one engine operation.
///
/// Reads go to the store, writes are staged into a [`ChangeSet`]. `commit`
/// hands the change set to the store in one call; dropping the unit instead
/// discards it. In pessimistic mode the account locks are held from `begin`
/// until the unit is committed or dropped.
pub struct UnitOfWork<'a> {
    store: &'a dyn TransactionalStore,
    guard: AccountGuard,
    balances: BTreeMap<AccountId, Balance>,
    changes: ChangeSet,
}

impl<'a> UnitOfWork<'a> {
    pub async fn begin(
        store: &'a dyn TransactionalStore,
        accounts: &[AccountId],
        config: &EngineConfig,
    ) -> Result<Self> {
        let guard = match config.concurrency {
            ConcurrencyMode::Pessimistic => store.lock(accounts, config.lock_timeout).await?,
            ConcurrencyMode::Optimistic => AccountGuard::empty(),
        };
        Ok(Self {
            store,
            guard,
            balances: BTreeMap::new(),
            changes: ChangeSet::new(),
        })
    }

    pub fn is_locked(&self, account: AccountId) -> bool {
        self.guard.covers(account)
    }

    /// Current balance as seen by this unit, including its own staged writes.
    pub async fn balance(&mut self, account: AccountId) -> Result<Balance> {
        if let Some(balance) = self.balances.get(&account) {
            return Ok(*balance);
        }
        let balance = self
            .store
            .balance(account)
            .await?
            .ok_or(TransferError::AccountNotFound(account))?;
        self.balances.insert(account, balance);
        Ok(balance)
    }

    /// Looks up a committed transfer through the unit's store.
    pub async fn transfer(&self, token: &IdempotencyToken) -> Result<Option<Transfer>> {
        self.store.get_by_token(token).await
    }

    pub async fn open(&mut self, account: AccountId) -> Result<()> {
        if self.balances.contains_key(&account) || self.store.balance(account).await?.is_some() {
            return Err(TransferError::AccountExists(account));
        }
        self.changes.opens.push(account);
        self.balances.insert(account, Balance::ZERO);
        Ok(())
    }

    /// Stages a conditional balance update and returns the new balance.
    ///
    /// The balance must have been read through this unit first. The write is
    /// staged with the observed balance as its expected prior, so the store
    /// rejects it if anything else changed the account in between.
    pub fn apply_delta(
        &mut self,
        account: AccountId,
        delta: i64,
        expected_prior: Option<Balance>,
    ) -> Result<Balance> {
        let current = *self.balances.get(&account).ok_or_else(|| {
            TransferError::internal(format!("balance of account {account} written before read"))
        })?;
        if let Some(expected) = expected_prior
            && expected != current
        {
            return Err(TransferError::Conflict(format!(
                "balance of account {account} is {current}, expected {expected}"
            )));
        }
        let next = current.apply(account, delta)?;
        self.changes.balances.push(BalanceWrite {
            account,
            delta,
            expected_prior: Some(current),
        });
        self.balances.insert(account, next);
        Ok(next)
    }

    pub fn append(&mut self, entry: NewLedgerEntry) {
        self.changes.entries.push(entry);
    }

    pub fn insert_transfer(&mut self, transfer: NewTransfer) {
        self.changes.transfer = Some(TransferWrite::Insert(transfer));
    }

    pub fn transition(
        &mut self,
        token: IdempotencyToken,
        from: TransferStatus,
        to: TransferStatus,
        fail_reason: Option<String>,
    ) -> Result<()> {
        from.transition(to)?;
        self.changes.transfer = Some(TransferWrite::Transition {
            token,
            from,
            to,
            fail_reason,
        });
        Ok(())
    }

    pub async fn commit(self) -> Result<Committed> {
        let committed = self.store.commit(self.changes).await?;
        drop(self.guard);
        Ok(committed)
    }
}
