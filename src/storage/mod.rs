//! Transactional storage over sled

pub mod database;

pub use database::{Database, ReadTxn, Tx, TxExt, WriteTxn};
