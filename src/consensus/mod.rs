//! Transaction rules and monetary policy

pub mod monetary;
pub mod validation;

pub use monetary::{Distribution, VerifyPolicy, VerifyTxnParams};
pub use validation::TxnSigned;
