//! CONVOY: multi-wallet buy-then-sell trade runner.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod actors;
pub mod catalog;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod types;
