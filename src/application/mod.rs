//! Application layer containing the transfer orchestration.
//!
//! This module defines the `TransferEngine`, the primary entry point for
//! moving points, and the `UnitOfWork` that gives each engine operation its
//! all-or-nothing boundary over the injected store.

pub mod config;
pub mod engine;
pub mod unit_of_work;
