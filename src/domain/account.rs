use crate::error::TransferError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a points account. Valid identifiers start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub u64);

impl AccountId {
    pub fn validate(self) -> Result<Self, TransferError> {
        if self.0 >= 1 {
            Ok(self)
        } else {
            Err(TransferError::ValidationError(
                "Account id must be greater than 0".to_string(),
            ))
        }
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current point balance of an account. Never negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Balance(pub u64);

/// Positive number of points moved by a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Amount(u64);

impl Amount {
    pub fn new(value: u64) -> Result<Self, TransferError> {
        if value == 0 {
            Err(TransferError::ValidationError(
                "Amount must be greater than 0".to_string(),
            ))
        } else if value > i64::MAX as u64 {
            Err(TransferError::ValidationError(
                "Amount is too large".to_string(),
            ))
        } else {
            Ok(Self(value))
        }
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Signed delta for the debit side.
    pub fn debit(&self) -> i64 {
        -(self.0 as i64)
    }

    /// Signed delta for the credit side.
    pub fn credit(&self) -> i64 {
        self.0 as i64
    }
}

impl TryFrom<u64> for Amount {
    type Error = TransferError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for u64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl Balance {
    pub const ZERO: Self = Self(0);

    pub fn new(points: u64) -> Self {
        Self(points)
    }

    /// Applies a signed delta. Fails when the result would go below zero
    /// or overflow.
    pub fn apply(self, account: AccountId, delta: i64) -> Result<Self, TransferError> {
        let next = if delta >= 0 {
            self.0.checked_add(delta.unsigned_abs()).ok_or_else(|| {
                TransferError::ValidationError(format!("Balance overflow on account {account}"))
            })?
        } else {
            self.0
                .checked_sub(delta.unsigned_abs())
                .ok_or(TransferError::InsufficientFunds {
                    account,
                    available: self.0,
                    required: delta.unsigned_abs(),
                })?
        };
        Ok(Self(next))
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The state of one points account as held by the account store.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Account {
    pub id: AccountId,
    pub balance: Balance,
}

impl Account {
    pub fn new(id: AccountId) -> Self {
        Self {
            id,
            balance: Balance::ZERO,
        }
    }
}
