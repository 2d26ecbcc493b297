//! Outer adapters: CSV batch input/output and the HTTP contract types.

pub mod csv;
pub mod http;
