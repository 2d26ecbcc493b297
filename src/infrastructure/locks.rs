use crate::domain::account::AccountId;
use crate::domain::ports::AccountGuard;
use crate::error::{Result, TransferError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockTable = Arc<Mutex<HashMap<AccountId, Arc<AsyncMutex<()>>>>>;

/// Per-account exclusive locks shared by every unit of work on one store.
///
/// Locks are always taken in ascending account order, so two transfers that
/// are mirror images of each other cannot deadlock. An entry lives only while
/// some unit holds or waits for it.
#[derive(Default, Clone)]
pub struct AccountLocks {
    table: LockTable,
}

/// The mutex guards behind an [`AccountGuard`]. Dropping it releases the
/// locks and prunes table entries nobody else references.
struct HeldLocks {
    table: LockTable,
    accounts: Vec<AccountId>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl Drop for HeldLocks {
    fn drop(&mut self) {
        self.guards.clear();
        prune(&self.table, &self.accounts);
    }
}

/// Removes entries whose only remaining reference is the table's own.
fn prune(table: &LockTable, accounts: &[AccountId]) {
    let mut table = table.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    for account in accounts {
        if table.get(account).is_some_and(|m| Arc::strong_count(m) == 1) {
            table.remove(account);
        }
    }
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, account: AccountId) -> Arc<AsyncMutex<()>> {
        let mut table = self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        table.entry(account).or_default().clone()
    }

    pub async fn acquire(&self, accounts: &[AccountId], wait: Duration) -> Result<AccountGuard> {
        let mut ordered = accounts.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        let handles: Vec<_> = ordered.iter().map(|a| self.handle(*a)).collect();
        let acquire = async move {
            let mut guards = Vec::with_capacity(handles.len());
            for handle in handles {
                guards.push(handle.lock_owned().await);
            }
            guards
        };

        // Guards already taken are dropped with the future on timeout.
        let guards = match tokio::time::timeout(wait, acquire).await {
            Ok(guards) => guards,
            Err(_) => {
                prune(&self.table, &ordered);
                return Err(TransferError::Timeout(wait));
            }
        };

        let held = HeldLocks {
            table: self.table.clone(),
            accounts: ordered.clone(),
            guards,
        };
        Ok(AccountGuard::new(ordered, held))
    }
}
