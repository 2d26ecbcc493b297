use super::account::{AccountId, Amount};
use crate::error::TransferError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

const MAX_TOKEN_LEN: usize = 128;

/// Client-visible key that makes a transfer submission replayable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyToken(String);

impl IdempotencyToken {
    pub fn new(token: impl Into<String>) -> Result<Self, TransferError> {
        let token = token.into();
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(TransferError::ValidationError(
                "Idempotency key must not be empty".to_string(),
            ));
        }
        if trimmed.len() > MAX_TOKEN_LEN {
            return Err(TransferError::ValidationError(format!(
                "Idempotency key must be at most {MAX_TOKEN_LEN} characters"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Generates a fresh random (UUIDv4) token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IdempotencyToken {
    type Error = TransferError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<IdempotencyToken> for String {
    fn from(token: IdempotencyToken) -> Self {
        token.0
    }
}

impl fmt::Display for IdempotencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a transfer.
///
/// The synchronous flow persists transfers directly as `Completed`; the
/// intermediate states exist for queued processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Reversed,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Failed | TransferStatus::Cancelled | TransferStatus::Reversed
        )
    }

    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
                | (Completed, Reversed)
        )
    }

    pub fn transition(self, next: TransferStatus) -> Result<TransferStatus, TransferError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransferError::InvalidStateTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Processing => "processing",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
            TransferStatus::Cancelled => "cancelled",
            TransferStatus::Reversed => "reversed",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A points movement between two accounts, keyed by its idempotency token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// Store-assigned identifier.
    pub id: u64,
    pub token: IdempotencyToken,
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Amount,
    pub status: TransferStatus,
    pub note: Option<String>,
    pub fail_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A transfer staged in a unit of work, before the store assigns its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransfer {
    pub token: IdempotencyToken,
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Amount,
    pub status: TransferStatus,
    pub note: Option<String>,
    pub fail_reason: Option<String>,
}

impl NewTransfer {
    pub fn into_transfer(self, id: u64, at: DateTime<Utc>) -> Transfer {
        let completed_at = (self.status == TransferStatus::Completed).then_some(at);
        Transfer {
            id,
            token: self.token,
            from: self.from,
            to: self.to,
            amount: self.amount,
            status: self.status,
            note: self.note,
            fail_reason: self.fail_reason,
            created_at: at,
            updated_at: at,
            completed_at,
        }
    }
}

/// What a client asks for when submitting a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub token: Option<IdempotencyToken>,
    pub from: AccountId,
    pub to: AccountId,
    pub amount: u64,
    pub note: Option<String>,
}

impl TransferRequest {
    pub fn new(from: AccountId, to: AccountId, amount: u64) -> Self {
        Self {
            token: None,
            from,
            to,
            amount,
            note: None,
        }
    }

    pub fn with_token(mut self, token: IdempotencyToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Checks the request shape. Self-transfer is reported before amount
    /// problems so it fails the same way regardless of amount.
    pub fn validate(&self) -> Result<Amount, TransferError> {
        self.from.validate()?;
        self.to.validate()?;
        if self.from == self.to {
            return Err(TransferError::SelfTransfer);
        }
        Amount::new(self.amount)
    }

    /// Whether a stored transfer was produced by an identical request.
    pub fn matches(&self, transfer: &Transfer) -> bool {
        self.from == transfer.from
            && self.to == transfer.to
            && self.amount == transfer.amount.value()
            && self.note == transfer.note
    }
}
