//! Wire contract for exposing the engine over HTTP.
//!
//! No server is bundled; these types fix the JSON shapes, the header name
//! and the error-to-status mapping so any router can mount the engine
//! without re-deciding them.

use crate::application::engine::TransferPage;
use crate::domain::account::AccountId;
use crate::domain::transfer::{IdempotencyToken, Transfer, TransferRequest, TransferStatus};
use crate::error::{Result, TransferError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request header carrying the caller-supplied idempotency token.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferCreateRequest {
    pub from_user_id: u64,
    pub to_user_id: u64,
    pub amount: u64,
    #[serde(default)]
    pub note: Option<String>,
}

impl TransferCreateRequest {
    /// Builds the engine request. A missing or blank header value lets the
    /// engine generate a token.
    pub fn into_request(self, idempotency_key: Option<&str>) -> Result<TransferRequest> {
        let mut request = TransferRequest::new(
            AccountId(self.from_user_id),
            AccountId(self.to_user_id),
            self.amount,
        );
        if let Some(key) = idempotency_key.filter(|k| !k.trim().is_empty()) {
            request = request.with_token(IdempotencyToken::new(key)?);
        }
        if let Some(note) = self.note {
            request = request.with_note(note);
        }
        Ok(request)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferView {
    pub idem_key: String,
    pub transfer_id: u64,
    pub from_user_id: u64,
    pub to_user_id: u64,
    pub amount: u64,
    pub status: TransferStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_reason: Option<String>,
}

impl From<Transfer> for TransferView {
    fn from(transfer: Transfer) -> Self {
        Self {
            idem_key: transfer.token.as_str().to_string(),
            transfer_id: transfer.id,
            from_user_id: transfer.from.0,
            to_user_id: transfer.to.0,
            amount: transfer.amount.value(),
            status: transfer.status,
            note: transfer.note,
            created_at: transfer.created_at,
            updated_at: transfer.updated_at,
            completed_at: transfer.completed_at,
            fail_reason: transfer.fail_reason,
        }
    }
}

/// Body of create (201) and get-by-token (200) responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferResponse {
    pub transfer: TransferView,
}

impl From<Transfer> for TransferResponse {
    fn from(transfer: Transfer) -> Self {
        Self {
            transfer: transfer.into(),
        }
    }
}

/// A successful create: `201`, the token echoed in [`IDEMPOTENCY_HEADER`]
/// and the transfer body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    pub status: u16,
    pub idempotency_key: String,
    pub body: TransferResponse,
}

impl From<Transfer> for Created {
    fn from(transfer: Transfer) -> Self {
        Self {
            status: 201,
            idempotency_key: transfer.token.as_str().to_string(),
            body: transfer.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferListResponse {
    pub data: Vec<TransferView>,
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
}

impl From<TransferPage> for TransferListResponse {
    fn from(page: TransferPage) -> Self {
        Self {
            data: page.items.into_iter().map(TransferView::from).collect(),
            page: page.page,
            page_size: page.page_size,
            total: page.total,
        }
    }
}

/// Raw list query as it arrives in the query string.
///
/// Paging values stay raw: anything missing, unparsable or below 1 falls
/// back to the default instead of failing the request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferListQuery {
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub page: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub page_size: Option<String>,
}

impl TransferListQuery {
    /// Returns the account, the page (1 when invalid) and the page size
    /// (0, meaning the engine default, when invalid). Oversized pages are
    /// capped by the engine.
    pub fn parse(&self) -> Result<(AccountId, usize, usize)> {
        let raw = self
            .user_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| TransferError::ValidationError("userId is required".to_string()))?;
        let id = raw
            .parse::<u64>()
            .map_err(|_| TransferError::ValidationError(format!("Invalid userId: {raw}")))?;
        let account = AccountId(id).validate()?;
        let page = positive(self.page.as_deref()).unwrap_or(1);
        let page_size = positive(self.page_size.as_deref()).unwrap_or(0);
        Ok((account, page, page_size))
    }
}

fn positive(raw: Option<&str>) -> Option<usize> {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
        .filter(|n| *n >= 1)
        .and_then(|n| usize::try_from(n).ok())
}

/// Accepts a query value as a string or a JSON number.
fn lenient<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
    }
    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
        Raw::Float(f) => f.to_string(),
    }))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}

impl From<&TransferError> for ErrorResponse {
    fn from(err: &TransferError) -> Self {
        Self {
            error: err.code(),
            message: err.public_message(),
        }
    }
}

/// Status code and body for a failed request.
pub fn error_response(err: &TransferError) -> (u16, ErrorResponse) {
    (err.http_status(), ErrorResponse::from(err))
}
