//! Command line interface for the ledger node

pub mod commands;

pub use commands::run_cli;
