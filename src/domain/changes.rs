//! Staged mutations committed atomically by a [`TransactionalStore`].
//!
//! A unit of work never touches the store directly. It accumulates a
//! [`ChangeSet`] and hands it over in one `commit` call; the store either
//! applies every part of it or none, and stamps the commit time itself so
//! id order and creation order agree.
//!
//! [`TransactionalStore`]: crate::domain::ports::TransactionalStore

use super::account::{AccountId, Balance};
use super::ledger::{LedgerEntry, NewLedgerEntry};
use super::transfer::{IdempotencyToken, NewTransfer, Transfer, TransferStatus};
use crate::error::{Result, TransferError};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Conditional balance update. With `expected_prior` set, the store rejects
/// the write with `Conflict` unless the balance still has that value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceWrite {
    pub account: AccountId,
    pub delta: i64,
    pub expected_prior: Option<Balance>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferWrite {
    Insert(NewTransfer),
    Transition {
        token: IdempotencyToken,
        from: TransferStatus,
        to: TransferStatus,
        fail_reason: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChangeSet {
    pub opens: Vec<AccountId>,
    pub balances: Vec<BalanceWrite>,
    pub entries: Vec<NewLedgerEntry>,
    pub transfer: Option<TransferWrite>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.opens.is_empty()
            && self.balances.is_empty()
            && self.entries.is_empty()
            && self.transfer.is_none()
    }

    /// Computes the final balance of every written account, checking
    /// existence, expected priors and non-negativity along the way.
    ///
    /// `current` returns the committed balance of an account. Accounts in
    /// `opens` start at zero and must not exist yet.
    pub fn resolve_balances<F>(&self, mut current: F) -> Result<BTreeMap<AccountId, Balance>>
    where
        F: FnMut(AccountId) -> Result<Option<Balance>>,
    {
        let mut resolved = BTreeMap::new();
        for account in &self.opens {
            if current(*account)?.is_some() || resolved.contains_key(account) {
                return Err(TransferError::AccountExists(*account));
            }
            resolved.insert(*account, Balance::ZERO);
        }
        for write in &self.balances {
            let base = match resolved.get(&write.account) {
                Some(balance) => *balance,
                None => current(write.account)?.ok_or(TransferError::AccountNotFound(write.account))?,
            };
            if let Some(expected) = write.expected_prior
                && expected != base
            {
                return Err(TransferError::Conflict(format!(
                    "balance of account {} changed from {} to {}",
                    write.account, expected, base
                )));
            }
            resolved.insert(write.account, base.apply(write.account, write.delta)?);
        }
        Ok(resolved)
    }
}

/// Applies a staged status transition to a copy of the stored transfer.
///
/// `from` is the status the unit of work observed; a different stored status
/// means another unit got there first.
pub fn apply_transition(
    stored: &Transfer,
    from: TransferStatus,
    to: TransferStatus,
    fail_reason: Option<String>,
    at: DateTime<Utc>,
) -> Result<Transfer> {
    if stored.status != from {
        return Err(TransferError::Conflict(format!(
            "transfer {} is {} but {} was expected",
            stored.token, stored.status, from
        )));
    }
    let mut next = stored.clone();
    next.status = from.transition(to)?;
    next.updated_at = at;
    if to == TransferStatus::Completed {
        next.completed_at = Some(at);
    }
    if fail_reason.is_some() {
        next.fail_reason = fail_reason;
    }
    Ok(next)
}

/// What a successful commit produced, with store-assigned ids.
#[derive(Debug, Clone, PartialEq)]
pub struct Committed {
    pub balances: BTreeMap<AccountId, Balance>,
    pub entries: Vec<LedgerEntry>,
    pub transfer: Option<Transfer>,
}
