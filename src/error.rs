use crate::domain::account::AccountId;
use crate::domain::transfer::TransferStatus;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransferError>;

/// Coarse classification of a [`TransferError`].
///
/// This is what callers branch on: it decides retry policy and the status
/// reported to external clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    AccountNotFound,
    InsufficientFunds,
    Conflict,
    NotFound,
    Internal,
}

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Cannot transfer to yourself")]
    SelfTransfer,

    #[error("Account {0} not found")]
    AccountNotFound(AccountId),

    #[error("Account {0} already exists")]
    AccountExists(AccountId),

    #[error("Insufficient points on account {account}. Available: {available}, Required: {required}")]
    InsufficientFunds {
        account: AccountId,
        available: u64,
        required: u64,
    },

    #[error("Concurrent modification: {0}")]
    Conflict(String),

    /// The idempotency token is already bound to a committed transfer.
    #[error("Idempotency token {0} already used")]
    DuplicateToken(String),

    #[error("Transfer {0} not found")]
    TransferNotFound(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: TransferStatus,
        to: TransferStatus,
    },

    #[error("Timed out after {0:?} waiting for account locks")]
    Timeout(Duration),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl TransferError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError(Box::new(std::io::Error::other(message.into())))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::ValidationError(_)
            | TransferError::SelfTransfer
            | TransferError::AccountExists(_)
            | TransferError::InvalidStateTransition { .. }
            | TransferError::CsvError(_) => ErrorKind::Validation,
            TransferError::AccountNotFound(_) => ErrorKind::AccountNotFound,
            TransferError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            TransferError::Conflict(_) | TransferError::DuplicateToken(_) => ErrorKind::Conflict,
            TransferError::TransferNotFound(_) => ErrorKind::NotFound,
            TransferError::Timeout(_) | TransferError::InternalError(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::ValidationError(_) | TransferError::CsvError(_) => "VALIDATION_ERROR",
            TransferError::SelfTransfer => "BUSINESS_RULE_VIOLATION",
            TransferError::AccountNotFound(_) => "NOT_FOUND",
            TransferError::AccountExists(_) => "ACCOUNT_EXISTS",
            TransferError::InsufficientFunds { .. } => "INSUFFICIENT_POINTS",
            TransferError::Conflict(_) | TransferError::DuplicateToken(_) => "CONFLICT",
            TransferError::TransferNotFound(_) => "NOT_FOUND",
            TransferError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            TransferError::Timeout(_) | TransferError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            TransferError::ValidationError(_) | TransferError::CsvError(_) => 400,
            TransferError::AccountNotFound(_) | TransferError::TransferNotFound(_) => 404,
            TransferError::InsufficientFunds { .. }
            | TransferError::AccountExists(_)
            | TransferError::Conflict(_)
            | TransferError::DuplicateToken(_) => 409,
            TransferError::SelfTransfer | TransferError::InvalidStateTransition { .. } => 422,
            TransferError::Timeout(_) | TransferError::InternalError(_) => 500,
        }
    }

    /// Message safe to show to external callers. Internal failures are
    /// reported generically so store error text never leaks.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => "Internal error, retry with the same idempotency key".to_string(),
            _ => self.to_string(),
        }
    }

    /// Whether the whole submission may be retried as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Conflict | ErrorKind::Internal)
    }
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        TransferError::InternalError(Box::new(err))
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for TransferError {
    fn from(err: rocksdb::Error) -> Self {
        TransferError::InternalError(Box::new(err))
    }
}

impl From<serde_json::Error> for TransferError {
    fn from(err: serde_json::Error) -> Self {
        TransferError::InternalError(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(TransferError::ValidationError("x".into()).http_status(), 400);
        assert_eq!(TransferError::AccountNotFound(AccountId(7)).http_status(), 404);
        assert_eq!(
            TransferError::InsufficientFunds {
                account: AccountId(1),
                available: 70,
                required: 80
            }
            .http_status(),
            409
        );
        assert_eq!(TransferError::SelfTransfer.http_status(), 422);
        assert_eq!(TransferError::internal("disk on fire").http_status(), 500);
    }

    #[test]
    fn test_internal_text_is_not_public() {
        let err = TransferError::internal("sqlite: database is locked");
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!err.public_message().contains("sqlite"));
        assert_eq!(err.code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_retry_policy() {
        assert!(TransferError::Conflict("stale".into()).is_retryable());
        assert!(TransferError::Timeout(Duration::from_millis(5)).is_retryable());
        assert!(!TransferError::SelfTransfer.is_retryable());
        assert!(
            !TransferError::InsufficientFunds {
                account: AccountId(1),
                available: 0,
                required: 1
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_insufficient_funds_message() {
        let err = TransferError::InsufficientFunds {
            account: AccountId(1),
            available: 70,
            required: 80,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient points on account 1. Available: 70, Required: 80"
        );
    }
}
