use crate::domain::account::{Account, AccountId, Balance};
use crate::domain::changes::{ChangeSet, Committed, TransferWrite, apply_transition};
use crate::domain::ledger::LedgerEntry;
use crate::domain::ports::{AccountGuard, AccountStore, Ledger, TransactionalStore, TransferStore};
use crate::domain::transfer::{IdempotencyToken, Transfer};
use crate::error::{Result, TransferError};
use crate::infrastructure::locks::AccountLocks;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    accounts: BTreeMap<AccountId, Balance>,
    /// Indexed by `id - 1`.
    transfers: Vec<Transfer>,
    tokens: HashMap<IdempotencyToken, usize>,
    transfers_by_account: HashMap<AccountId, Vec<usize>>,
    /// Indexed by `id - 1`.
    ledger: Vec<LedgerEntry>,
    ledger_by_account: HashMap<AccountId, Vec<usize>>,
    ledger_by_transfer: HashMap<u64, Vec<usize>>,
}

impl State {
    fn transfer_index(&self, token: &IdempotencyToken) -> Result<usize> {
        self.tokens
            .get(token)
            .copied()
            .ok_or_else(|| TransferError::TransferNotFound(token.to_string()))
    }
}

/// A thread-safe in-memory transactional store.
///
/// All state sits behind one `RwLock`; `commit` validates a whole change set
/// under the write lock before applying any of it. Per-account locks for
/// pessimistic units of work live in a separate [`AccountLocks`] table.
/// Ideal for testing or single-process deployments without persistence.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
    locks: AccountLocks,
}

impl InMemoryStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for InMemoryStore {
    async fn balance(&self, account: AccountId) -> Result<Option<Balance>> {
        let state = self.state.read().await;
        Ok(state.accounts.get(&account).copied())
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        let state = self.state.read().await;
        Ok(state
            .accounts
            .iter()
            .map(|(id, balance)| Account {
                id: *id,
                balance: *balance,
            })
            .collect())
    }

    async fn lock(&self, accounts: &[AccountId], wait: Duration) -> Result<AccountGuard> {
        self.locks.acquire(accounts, wait).await
    }
}

#[async_trait]
impl Ledger for InMemoryStore {
    async fn entries_for_account(&self, account: AccountId) -> Result<Vec<LedgerEntry>> {
        let state = self.state.read().await;
        Ok(state
            .ledger_by_account
            .get(&account)
            .map(|indexes| indexes.iter().map(|i| state.ledger[*i].clone()).collect())
            .unwrap_or_default())
    }

    async fn entries_for_transfer(&self, transfer_id: u64) -> Result<Vec<LedgerEntry>> {
        let state = self.state.read().await;
        Ok(state
            .ledger_by_transfer
            .get(&transfer_id)
            .map(|indexes| indexes.iter().map(|i| state.ledger[*i].clone()).collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl TransferStore for InMemoryStore {
    async fn get_by_token(&self, token: &IdempotencyToken) -> Result<Option<Transfer>> {
        let state = self.state.read().await;
        Ok(state.tokens.get(token).map(|i| state.transfers[*i].clone()))
    }

    async fn list_for_account(
        &self,
        account: AccountId,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<Transfer>, usize)> {
        let state = self.state.read().await;
        let Some(indexes) = state.transfers_by_account.get(&account) else {
            return Ok((Vec::new(), 0));
        };
        let items = indexes
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .map(|i| state.transfers[*i].clone())
            .collect();
        Ok((items, indexes.len()))
    }
}

#[async_trait]
impl TransactionalStore for InMemoryStore {
    async fn commit(&self, changes: ChangeSet) -> Result<Committed> {
        let mut state = self.state.write().await;
        let at = Utc::now();

        // Validate everything before the first mutation.
        let balances = changes.resolve_balances(|account| Ok(state.accounts.get(&account).copied()))?;
        let transition = match &changes.transfer {
            Some(TransferWrite::Insert(new)) => {
                if state.tokens.contains_key(&new.token) {
                    return Err(TransferError::DuplicateToken(new.token.to_string()));
                }
                None
            }
            Some(TransferWrite::Transition {
                token,
                from,
                to,
                fail_reason,
            }) => {
                let index = state.transfer_index(token)?;
                let next = apply_transition(&state.transfers[index], *from, *to, fail_reason.clone(), at)?;
                Some((index, next))
            }
            None => None,
        };

        for (account, balance) in &balances {
            state.accounts.insert(*account, *balance);
        }

        let mut staged_transfer_id = None;
        let mut committed_transfer = None;
        match changes.transfer {
            Some(TransferWrite::Insert(new)) => {
                let index = state.transfers.len();
                let transfer = new.into_transfer(index as u64 + 1, at);
                state.tokens.insert(transfer.token.clone(), index);
                for account in [transfer.from, transfer.to] {
                    state.transfers_by_account.entry(account).or_default().push(index);
                }
                staged_transfer_id = Some(transfer.id);
                committed_transfer = Some(transfer.clone());
                state.transfers.push(transfer);
            }
            Some(TransferWrite::Transition { .. }) => {
                if let Some((index, next)) = transition {
                    staged_transfer_id = Some(next.id);
                    committed_transfer = Some(next.clone());
                    state.transfers[index] = next;
                }
            }
            None => {}
        }

        let mut entries = Vec::with_capacity(changes.entries.len());
        for new in changes.entries {
            let index = state.ledger.len();
            let entry = new.into_entry(index as u64 + 1, staged_transfer_id, at);
            state.ledger_by_account.entry(entry.account).or_default().push(index);
            if let Some(transfer_id) = entry.transfer_id {
                state.ledger_by_transfer.entry(transfer_id).or_default().push(index);
            }
            entries.push(entry.clone());
            state.ledger.push(entry);
        }

        Ok(Committed {
            balances,
            entries,
            transfer: committed_transfer,
        })
    }
}
