use crate::domain::account::AccountId;
use crate::error::{Result, TransferError};
use serde::Deserialize;
use std::io::Read;

/// Opening balance for one account: `account, balance`.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
pub struct OpeningBalance {
    pub account: AccountId,
    pub balance: u64,
}

pub struct AccountReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> AccountReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(source);
        Self { reader }
    }

    pub fn accounts(self) -> impl Iterator<Item = Result<OpeningBalance>> {
        self.reader
            .into_deserialize()
            .map(|row| row.map_err(TransferError::from))
    }
}
