use super::config::EngineConfig;
use super::unit_of_work::UnitOfWork;
use crate::domain::account::{Account, AccountId, Amount, Balance};
use crate::domain::ledger::{EventKind, LedgerEntry, NewLedgerEntry, Reconciliation, TransferLink};
use crate::domain::ports::StoreHandle;
use crate::domain::transfer::{
    IdempotencyToken, NewTransfer, Transfer, TransferRequest, TransferStatus,
};
use crate::error::{ErrorKind, Result, TransferError};
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use tracing::{debug, info, warn};

const OPENING_BALANCE_REFERENCE: &str = "opening-balance";
const REVERSAL_REFERENCE: &str = "reversal";

/// One page of an account's transfer history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferPage {
    pub items: Vec<Transfer>,
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
}

/// A balance change that does not come from a transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct Adjustment {
    pub account: AccountId,
    pub delta: i64,
    pub kind: EventKind,
    pub reference: Option<String>,
    pub metadata: Option<serde_json::Value>,
    /// Reject with `Conflict` unless the balance is still this value.
    pub expected_prior: Option<Balance>,
}

impl Adjustment {
    pub fn new(account: AccountId, delta: i64, kind: EventKind) -> Self {
        Self {
            account,
            delta,
            kind,
            reference: None,
            metadata: None,
            expected_prior: None,
        }
    }

    fn validate(&self) -> Result<()> {
        self.account.validate()?;
        let valid = match self.kind {
            EventKind::Earn => self.delta > 0,
            EventKind::Redeem => self.delta < 0,
            EventKind::Adjust => self.delta != 0,
            EventKind::TransferOut | EventKind::TransferIn => {
                return Err(TransferError::ValidationError(
                    "transfer events are only recorded by transfers".to_string(),
                ));
            }
        };
        if valid {
            Ok(())
        } else {
            Err(TransferError::ValidationError(format!(
                "delta {} is not valid for a {} event",
                self.delta, self.kind
            )))
        }
    }
}

enum Submitted {
    Committed(Transfer),
    Replayed(Transfer),
}

/// Moves points between accounts.
///
/// Every mutating operation runs inside one [`UnitOfWork`]: validation,
/// balance writes, ledger appends and the transfer record are committed
/// together or not at all. The engine holds no mutable state of its own, so
/// one instance can be shared across tasks behind an `Arc`.
pub struct TransferEngine {
    store: StoreHandle,
    config: EngineConfig,
}

impl TransferEngine {
    pub fn new(store: StoreHandle) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: StoreHandle, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Submits a transfer.
    ///
    /// A request carrying a token that is already bound to a transfer
    /// returns that transfer unchanged. Without a token a fresh one is
    /// generated and returned on the transfer.
    pub async fn submit(&self, request: TransferRequest) -> Result<Transfer> {
        let amount = request.validate().inspect_err(|err| {
            warn!(from = %request.from, to = %request.to, amount = request.amount, error = %err, "Transfer rejected");
        })?;
        let token = request.token.clone().unwrap_or_else(IdempotencyToken::generate);

        if let Some(existing) = self.store.get_by_token(&token).await? {
            return Ok(self.replayed(&request, existing));
        }

        let result = self
            .with_conflict_retries("submit", || self.try_submit(&token, &request, amount))
            .await;

        match result {
            Ok(Submitted::Committed(transfer)) => {
                info!(
                    token = %transfer.token,
                    id = transfer.id,
                    from = %transfer.from,
                    to = %transfer.to,
                    amount = transfer.amount.value(),
                    "Transfer completed"
                );
                Ok(transfer)
            }
            Ok(Submitted::Replayed(transfer)) => Ok(self.replayed(&request, transfer)),
            Err(TransferError::DuplicateToken(_)) => {
                // Lost a race on the same token; the winner's row is committed.
                let existing = self.store.get_by_token(&token).await?.ok_or_else(|| {
                    TransferError::internal(format!("token {token} reported as used but not found"))
                })?;
                Ok(self.replayed(&request, existing))
            }
            Err(err) => {
                warn!(token = %token, from = %request.from, to = %request.to, error = %err, "Transfer failed");
                Err(err)
            }
        }
    }

    async fn try_submit(
        &self,
        token: &IdempotencyToken,
        request: &TransferRequest,
        amount: Amount,
    ) -> Result<Submitted> {
        let mut unit = UnitOfWork::begin(self.store.as_ref(), &[request.from, request.to], &self.config).await?;

        let sender = unit.balance(request.from).await?;
        unit.balance(request.to).await?;

        // Checked after the balance reads: a commit that already changed these
        // balances is visible here together with its token.
        if let Some(existing) = unit.transfer(token).await? {
            return Ok(Submitted::Replayed(existing));
        }

        if sender.0 < amount.value() {
            return Err(TransferError::InsufficientFunds {
                account: request.from,
                available: sender.0,
                required: amount.value(),
            });
        }

        let sender_after = unit.apply_delta(request.from, amount.debit(), Some(sender))?;
        let receiver_after = unit.apply_delta(request.to, amount.credit(), None)?;

        unit.append(NewLedgerEntry {
            account: request.from,
            delta: amount.debit(),
            balance_after: sender_after,
            kind: EventKind::TransferOut,
            transfer: TransferLink::Staged,
            reference: None,
            metadata: None,
        });
        unit.append(NewLedgerEntry {
            account: request.to,
            delta: amount.credit(),
            balance_after: receiver_after,
            kind: EventKind::TransferIn,
            transfer: TransferLink::Staged,
            reference: None,
            metadata: None,
        });
        unit.insert_transfer(NewTransfer {
            token: token.clone(),
            from: request.from,
            to: request.to,
            amount,
            status: TransferStatus::Completed,
            note: request.note.clone(),
            fail_reason: None,
        });

        let committed = unit.commit().await?;
        committed
            .transfer
            .map(Submitted::Committed)
            .ok_or_else(|| TransferError::internal("commit returned no transfer"))
    }

    fn replayed(&self, request: &TransferRequest, transfer: Transfer) -> Transfer {
        if request.matches(&transfer) {
            debug!(token = %transfer.token, "Replayed transfer");
        } else {
            warn!(
                token = %transfer.token,
                "Idempotency key reused with different parameters; returning the original transfer"
            );
        }
        transfer
    }

    pub async fn get_by_token(&self, token: &IdempotencyToken) -> Result<Transfer> {
        self.store
            .get_by_token(token)
            .await?
            .ok_or_else(|| TransferError::TransferNotFound(token.to_string()))
    }

    /// Transfers sent or received by `account`, newest first.
    pub async fn list_for_account(
        &self,
        account: AccountId,
        page: usize,
        page_size: usize,
    ) -> Result<TransferPage> {
        account.validate()?;
        let (page, page_size) = self.config.clamp_page(page, page_size);
        let offset = (page - 1).saturating_mul(page_size);
        let (items, total) = self.store.list_for_account(account, offset, page_size).await?;
        Ok(TransferPage {
            items,
            page,
            page_size,
            total,
        })
    }

    /// Creates an account. A positive opening balance is booked as an
    /// `earn` entry so the ledger reconciles from the first row.
    pub async fn open_account(&self, account: AccountId, opening_balance: u64) -> Result<Account> {
        account.validate()?;
        let opening = i64::try_from(opening_balance)
            .map_err(|_| TransferError::ValidationError("Opening balance is too large".to_string()))?;

        let mut unit = UnitOfWork::begin(self.store.as_ref(), &[account], &self.config).await?;
        unit.open(account).await?;
        if opening > 0 {
            let after = unit.apply_delta(account, opening, Some(Balance::ZERO))?;
            unit.append(NewLedgerEntry {
                account,
                delta: opening,
                balance_after: after,
                kind: EventKind::Earn,
                transfer: TransferLink::None,
                reference: Some(OPENING_BALANCE_REFERENCE.to_string()),
                metadata: None,
            });
        }
        let committed = unit.commit().await?;
        let balance = committed.balances.get(&account).copied().unwrap_or(Balance::ZERO);
        info!(account = %account, balance = %balance, "Account opened");
        Ok(Account { id: account, balance })
    }

    pub async fn balance(&self, account: AccountId) -> Result<Balance> {
        self.store
            .balance(account)
            .await?
            .ok_or(TransferError::AccountNotFound(account))
    }

    pub async fn accounts(&self) -> Result<Vec<Account>> {
        self.store.all_accounts().await
    }

    /// Applies an `earn`, `redeem` or `adjust` event to one account.
    pub async fn adjust(&self, adjustment: Adjustment) -> Result<LedgerEntry> {
        adjustment.validate()?;
        // A caller-pinned prior balance is a precondition, not a race to retry.
        let result = if adjustment.expected_prior.is_some() {
            self.try_adjust(&adjustment).await
        } else {
            self.with_conflict_retries("adjust", || self.try_adjust(&adjustment))
                .await
        };
        let entry = result.inspect_err(|err| {
            warn!(account = %adjustment.account, delta = adjustment.delta, error = %err, "Adjustment failed");
        })?;
        info!(account = %entry.account, delta = entry.delta, kind = %entry.kind, "Balance adjusted");
        Ok(entry)
    }

    async fn try_adjust(&self, adjustment: &Adjustment) -> Result<LedgerEntry> {
        let mut unit = UnitOfWork::begin(self.store.as_ref(), &[adjustment.account], &self.config).await?;
        unit.balance(adjustment.account).await?;
        let after = unit.apply_delta(adjustment.account, adjustment.delta, adjustment.expected_prior)?;
        unit.append(NewLedgerEntry {
            account: adjustment.account,
            delta: adjustment.delta,
            balance_after: after,
            kind: adjustment.kind,
            transfer: TransferLink::None,
            reference: adjustment.reference.clone(),
            metadata: adjustment.metadata.clone(),
        });
        unit.commit()
            .await?
            .entries
            .pop()
            .ok_or_else(|| TransferError::internal("commit returned no ledger entry"))
    }

    /// Compensates a completed transfer: moves the amount back from receiver
    /// to sender and marks the transfer `reversed`. Each transfer can be
    /// reversed once.
    pub async fn reverse(&self, token: &IdempotencyToken, reason: &str) -> Result<Transfer> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(TransferError::ValidationError(
                "A reversal reason is required".to_string(),
            ));
        }
        let transfer = self
            .with_conflict_retries("reverse", || self.try_reverse(token, reason))
            .await
            .inspect_err(|err| warn!(token = %token, error = %err, "Reversal failed"))?;
        info!(token = %transfer.token, id = transfer.id, amount = transfer.amount.value(), "Transfer reversed");
        Ok(transfer)
    }

    async fn try_reverse(&self, token: &IdempotencyToken, reason: &str) -> Result<Transfer> {
        let original = self.get_by_token(token).await?;
        original.status.transition(TransferStatus::Reversed)?;

        let mut unit = UnitOfWork::begin(self.store.as_ref(), &[original.from, original.to], &self.config).await?;
        // Re-read under the unit: another reversal may have won meanwhile.
        let current = unit
            .transfer(token)
            .await?
            .ok_or_else(|| TransferError::TransferNotFound(token.to_string()))?;
        current.status.transition(TransferStatus::Reversed)?;

        unit.balance(current.to).await?;
        unit.balance(current.from).await?;
        let receiver_after = unit.apply_delta(current.to, current.amount.debit(), None)?;
        let sender_after = unit.apply_delta(current.from, current.amount.credit(), None)?;

        let metadata = json!({ "reason": reason, "token": current.token.as_str() });
        for (account, delta, balance_after) in [
            (current.to, current.amount.debit(), receiver_after),
            (current.from, current.amount.credit(), sender_after),
        ] {
            unit.append(NewLedgerEntry {
                account,
                delta,
                balance_after,
                kind: EventKind::Adjust,
                transfer: TransferLink::Existing(current.id),
                reference: Some(REVERSAL_REFERENCE.to_string()),
                metadata: Some(metadata.clone()),
            });
        }
        unit.transition(
            current.token.clone(),
            TransferStatus::Completed,
            TransferStatus::Reversed,
            None,
        )?;

        unit.commit()
            .await?
            .transfer
            .ok_or_else(|| TransferError::internal("commit returned no transfer"))
    }

    pub async fn ledger(&self, account: AccountId) -> Result<Vec<LedgerEntry>> {
        self.store.entries_for_account(account).await
    }

    pub async fn ledger_for_transfer(&self, token: &IdempotencyToken) -> Result<Vec<LedgerEntry>> {
        let transfer = self.get_by_token(token).await?;
        self.store.entries_for_transfer(transfer.id).await
    }

    /// Replays an account's ledger against its balance.
    ///
    /// Balance and entries are separate reads, so the entry list is read on
    /// both sides of the balance and the snapshot is retried until they agree.
    pub async fn reconcile(&self, account: AccountId) -> Result<Reconciliation> {
        for _ in 0..=self.config.max_conflict_retries {
            let before = self.store.entries_for_account(account).await?;
            let balance = self.balance(account).await?;
            let after = self.store.entries_for_account(account).await?;
            if before.len() == after.len() {
                return Ok(Reconciliation::new(account, balance, after));
            }
        }
        Err(TransferError::Conflict(format!(
            "account {account} kept changing during reconciliation"
        )))
    }

    /// Runs `attempt` again while it fails with a retryable conflict, up to
    /// the configured bound. A duplicate token is never retried.
    async fn with_conflict_retries<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0;
        loop {
            match attempt().await {
                Err(err)
                    if err.kind() == ErrorKind::Conflict
                        && !matches!(err, TransferError::DuplicateToken(_))
                        && retries < self.config.max_conflict_retries =>
                {
                    retries += 1;
                    warn!(operation, retries, error = %err, "Retrying after conflict");
                    tokio::task::yield_now().await;
                }
                other => return other,
            }
        }
    }
}
