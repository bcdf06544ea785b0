use crate::crypto::hash::Hash256;
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Blockchain error: {0}")]
    Blockchain(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("{0}")]
    Constraint(#[from] ConstraintViolation),

    #[error("Arithmetic error: {0}")]
    Arithmetic(#[from] ArithmeticError),

    #[error("Unspent output does not exist: {0}")]
    UnspentNotExist(Hash256),

    #[error("Block not found: {0}")]
    BlockNotFound(String),

    #[error("No transactions")]
    NoTransactions,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("History index has not parsed block {0} yet")]
    HistoryNotParsed(u64),

    #[error("Duplicate addresses not allowed")]
    DuplicateAddress,

    #[error("Unsupported address: {0}")]
    UnsupportedAddress(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl LedgerError {
    /// True when the error describes an invalid transaction or block rather
    /// than a failure to perform the operation.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, LedgerError::Constraint(_))
    }

    pub fn violation(&self) -> Option<&ConstraintViolation> {
        match self {
            LedgerError::Constraint(v) => Some(v),
            _ => None,
        }
    }
}

/// Checked coin and coin-hour arithmetic failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticError {
    #[error("uint64 addition overflow")]
    AdditionOverflow,

    #[error("uint64 subtraction underflow")]
    SubtractionUnderflow,

    #[error("uint64 multiplication overflow")]
    MultiplicationOverflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ViolationKind {
    /// Consensus rule, never waivable.
    Hard,
    /// Policy rule, advisory on the foreign relay path.
    Soft,
    /// Local submission rule.
    User,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationKind::Hard => write!(f, "hard"),
            ViolationKind::Soft => write!(f, "soft"),
            ViolationKind::User => write!(f, "user"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[error("Transaction violates {kind} constraint: {reason}")]
pub struct ConstraintViolation {
    pub kind: ViolationKind,
    pub reason: String,
}

impl ConstraintViolation {
    pub fn hard(reason: impl Into<String>) -> Self {
        Self { kind: ViolationKind::Hard, reason: reason.into() }
    }

    pub fn soft(reason: impl Into<String>) -> Self {
        Self { kind: ViolationKind::Soft, reason: reason.into() }
    }

    pub fn user(reason: impl Into<String>) -> Self {
        Self { kind: ViolationKind::User, reason: reason.into() }
    }

    pub fn is_hard(&self) -> bool {
        self.kind == ViolationKind::Hard
    }

    pub fn is_soft(&self) -> bool {
        self.kind == ViolationKind::Soft
    }
}

impl From<bincode::Error> for LedgerError {
    fn from(err: bincode::Error) -> Self {
        LedgerError::Storage(format!("Encoding failed: {}", err))
    }
}

impl From<hex::FromHexError> for LedgerError {
    fn from(err: hex::FromHexError) -> Self {
        LedgerError::InvalidInput(format!("Invalid hex: {}", err))
    }
}
