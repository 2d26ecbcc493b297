//! Domain model: accounts, transfers, ledger entries and the storage ports
//! the engine depends on.

pub mod account;
pub mod changes;
pub mod ledger;
pub mod ports;
pub mod transfer;
