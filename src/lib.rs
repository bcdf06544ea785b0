//! Coin ledger core: a publisher-signed chain of blocks over unspent
//! outputs with accruing coin hours.
//!
//! This library implements:
//! - The chain, its unspent-output index and block execution
//! - A pool of unconfirmed transactions with soft and hard constraint checks
//! - A rebuildable history index over every confirmed output and transaction
//! - The `Ledger` orchestrator that runs each operation in one store transaction

pub mod core;
pub mod crypto;
pub mod wallet;
pub mod storage;
pub mod cli;
pub mod consensus;
pub mod ledger;
pub mod error;
pub mod config;

pub use error::{LedgerError, Result};
pub use ledger::Ledger;
