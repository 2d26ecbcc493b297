use crate::domain::account::AccountId;
use crate::domain::transfer::{IdempotencyToken, TransferRequest};
use crate::error::{Result, TransferError};
use serde::Deserialize;
use std::io::Read;

/// One line of a transfer batch: `token, from, to, amount, note`.
/// Empty `token` or `note` fields mean "not supplied".
#[derive(Debug, Deserialize, PartialEq)]
struct TransferRow {
    token: Option<String>,
    from: u64,
    to: u64,
    amount: u64,
    note: Option<String>,
}

impl TryFrom<TransferRow> for TransferRequest {
    type Error = TransferError;

    fn try_from(row: TransferRow) -> Result<Self> {
        let mut request = TransferRequest::new(AccountId(row.from), AccountId(row.to), row.amount);
        if let Some(token) = row.token {
            request = request.with_token(IdempotencyToken::new(token)?);
        }
        if let Some(note) = row.note.filter(|n| !n.is_empty()) {
            request = request.with_note(note);
        }
        Ok(request)
    }
}

/// Reads transfer requests from a CSV source.
///
/// This reader wraps `csv::Reader` and provides an iterator over
/// `Result<TransferRequest>`. It trims whitespace and tolerates a missing
/// trailing note column.
pub struct TransferRequestReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> TransferRequestReader<R> {
    /// Creates a new reader from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily reads and converts requests, one line at a time.
    pub fn requests(self) -> impl Iterator<Item = Result<TransferRequest>> {
        self.reader
            .into_deserialize::<TransferRow>()
            .map(|row| row.map_err(TransferError::from).and_then(TransferRequest::try_from))
    }
}
