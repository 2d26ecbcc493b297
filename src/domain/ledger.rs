use super::account::{AccountId, Balance};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TransferOut,
    TransferIn,
    Adjust,
    Earn,
    Redeem,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::TransferOut => "transfer_out",
            EventKind::TransferIn => "transfer_in",
            EventKind::Adjust => "adjust",
            EventKind::Earn => "earn",
            EventKind::Redeem => "redeem",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one balance-affecting event on one account.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct LedgerEntry {
    pub id: u64,
    pub account: AccountId,
    pub delta: i64,
    pub balance_after: Balance,
    pub kind: EventKind,
    pub transfer_id: Option<u64>,
    pub reference: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Link from a staged ledger entry to the transfer it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferLink {
    None,
    /// An already persisted transfer.
    Existing(u64),
    /// The transfer inserted by the same unit of work.
    Staged,
}

/// A ledger entry staged in a unit of work, before the store assigns its id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLedgerEntry {
    pub account: AccountId,
    pub delta: i64,
    pub balance_after: Balance,
    pub kind: EventKind,
    pub transfer: TransferLink,
    pub reference: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl NewLedgerEntry {
    pub fn into_entry(self, id: u64, staged_transfer: Option<u64>, at: DateTime<Utc>) -> LedgerEntry {
        let transfer_id = match self.transfer {
            TransferLink::None => None,
            TransferLink::Existing(id) => Some(id),
            TransferLink::Staged => staged_transfer,
        };
        LedgerEntry {
            id,
            account: self.account,
            delta: self.delta,
            balance_after: self.balance_after,
            kind: self.kind,
            transfer_id,
            reference: self.reference,
            metadata: self.metadata,
            created_at: at,
        }
    }
}

/// Result of replaying an account's ledger against its stored balance.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub account: AccountId,
    pub balance: Balance,
    pub ledger_sum: i128,
    pub entries: Vec<LedgerEntry>,
}

impl Reconciliation {
    pub fn new(account: AccountId, balance: Balance, entries: Vec<LedgerEntry>) -> Self {
        let ledger_sum = entries.iter().map(|e| e.delta as i128).sum();
        Self {
            account,
            balance,
            ledger_sum,
            entries,
        }
    }

    /// True when the deltas sum to the balance and every `balance_after`
    /// equals the running total at that point.
    pub fn is_consistent(&self) -> bool {
        let mut running: i128 = 0;
        for entry in &self.entries {
            running += entry.delta as i128;
            if running != entry.balance_after.0 as i128 {
                return false;
            }
        }
        running == self.balance.0 as i128
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64, delta: i64, after: u64) -> LedgerEntry {
        LedgerEntry {
            id,
            account: AccountId(1),
            delta,
            balance_after: Balance::new(after),
            kind: EventKind::Adjust,
            transfer_id: None,
            reference: None,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_event_kind_names() {
        assert_eq!(
            serde_json::to_string(&EventKind::TransferOut).unwrap(),
            "\"transfer_out\""
        );
        assert_eq!(EventKind::TransferIn.to_string(), "transfer_in");
    }

    #[test]
    fn test_reconciliation_consistent() {
        let rec = Reconciliation::new(
            AccountId(1),
            Balance::new(70),
            vec![entry(1, 100, 100), entry(2, -30, 70)],
        );
        assert_eq!(rec.ledger_sum, 70);
        assert!(rec.is_consistent());
    }

    #[test]
    fn test_reconciliation_detects_drift() {
        let rec = Reconciliation::new(AccountId(1), Balance::new(80), vec![entry(1, 100, 100), entry(2, -30, 70)]);
        assert!(!rec.is_consistent());

        let bad_after = Reconciliation::new(AccountId(1), Balance::new(70), vec![entry(1, 100, 100), entry(2, -30, 60)]);
        assert!(!bad_after.is_consistent());
    }

    #[test]
    fn test_staged_link_resolution() {
        let staged = NewLedgerEntry {
            account: AccountId(1),
            delta: -5,
            balance_after: Balance::new(5),
            kind: EventKind::TransferOut,
            transfer: TransferLink::Staged,
            reference: None,
            metadata: None,
        };
        assert_eq!(staged.into_entry(9, Some(4), Utc::now()).transfer_id, Some(4));
    }
}
