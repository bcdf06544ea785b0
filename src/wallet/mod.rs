//! Wallet-facing capabilities of the ledger

pub mod balance;
pub mod scanner;

pub use balance::{Balance, BalancePair};
pub use scanner::{AddressScanner, TransactionsFinder};
