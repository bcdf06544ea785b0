//! Coin supply, precision and coin-hour fee rules.

use crate::core::transaction::Transaction;
use crate::core::uxout::{self, UxOut, DROPLETS_PER_COIN};
use crate::crypto::keys::Address;
use crate::error::{ArithmeticError, ConstraintViolation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Maximum number of decimal places a coin amount can carry.
pub const MAX_DROPLET_PRECISION: u8 = 6;

pub const DEFAULT_BURN_FACTOR: u32 = 10;
pub const DEFAULT_MAX_TRANSACTION_SIZE: u32 = 32 * 1024;
pub const DEFAULT_MAX_DROPLET_PRECISION: u8 = 3;
pub const DEFAULT_MAX_BLOCK_SIZE: u32 = 32 * 1024;
pub const DEFAULT_MAX_BLOCK_TRANSACTIONS: usize = 1000;

/// Policy applied by the soft constraint checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyTxnParams {
    /// 1/burn_factor of the input hours must be burned as fee.
    pub burn_factor: u32,
    pub max_transaction_size: u32,
    pub max_droplet_precision: u8,
}

impl Default for VerifyTxnParams {
    fn default() -> Self {
        Self {
            burn_factor: DEFAULT_BURN_FACTOR,
            max_transaction_size: DEFAULT_MAX_TRANSACTION_SIZE,
            max_droplet_precision: DEFAULT_MAX_DROPLET_PRECISION,
        }
    }
}

impl VerifyTxnParams {
    pub fn validate(&self) -> Result<(), String> {
        if self.burn_factor < 2 {
            return Err("burn factor must be at least 2".to_string());
        }
        if self.max_droplet_precision > MAX_DROPLET_PRECISION {
            return Err(format!("droplet precision cannot exceed {}", MAX_DROPLET_PRECISION));
        }
        if self.max_transaction_size == 0 {
            return Err("max transaction size must be positive".to_string());
        }
        Ok(())
    }
}

/// Which caller path a verification runs for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VerifyPolicy {
    /// Pool admission and refresh; soft violations are advisory.
    Unconfirmed,
    /// Candidate filtering when the publisher builds a block.
    CreateBlock,
    /// Locally submitted transactions; soft violations are fatal.
    User,
}

/// Genesis coin distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    pub max_coin_supply: u64,
    /// Addresses whose outputs cannot be spent yet.
    pub locked_addresses: Vec<Address>,
    /// Distribution addresses already released.
    pub unlocked_addresses: Vec<Address>,
}

impl Default for Distribution {
    fn default() -> Self {
        Self {
            max_coin_supply: 100_000_000 * DROPLETS_PER_COIN,
            locked_addresses: Vec::new(),
            unlocked_addresses: Vec::new(),
        }
    }
}

impl Distribution {
    pub fn locked_set(&self) -> HashSet<Address> {
        self.locked_addresses.iter().copied().collect()
    }

    pub fn all_addresses(&self) -> HashSet<Address> {
        self.locked_addresses
            .iter()
            .chain(self.unlocked_addresses.iter())
            .copied()
            .collect()
    }
}

/// Rejects amounts with more than `precision` decimal places.
pub fn droplet_precision_check(precision: u8, coins: u64) -> Result<(), ConstraintViolation> {
    if precision > MAX_DROPLET_PRECISION {
        return Err(ConstraintViolation::soft("invalid droplet precision"));
    }
    let divisor = 10u64.pow(u32::from(MAX_DROPLET_PRECISION - precision));
    if coins % divisor != 0 {
        return Err(ConstraintViolation::soft("invalid amount, too many decimal places"));
    }
    Ok(())
}

/// Minimum fee for spending `hours`, rounded up.
pub fn required_fee(hours: u64, burn_factor: u32) -> u64 {
    let burn_factor = u64::from(burn_factor);
    let fee = hours / burn_factor;
    if hours % burn_factor == 0 {
        fee
    } else {
        fee + 1
    }
}

/// Hours burned by `tx` when its inputs are valued at `head_time`.
pub fn transaction_fee(tx: &Transaction, head_time: u64, inputs: &[UxOut]) -> Result<u64, ConstraintViolation> {
    let hours_in = uxout::total_hours(inputs, head_time).map_err(fee_overflow)?;
    let hours_out = tx.output_hours().map_err(fee_overflow)?;

    hours_in
        .checked_sub(hours_out)
        .ok_or_else(|| ConstraintViolation::hard("insufficient coin hours"))
}

fn fee_overflow(err: ArithmeticError) -> ConstraintViolation {
    ConstraintViolation::hard(format!("coin hours overflow: {}", err))
}

/// Checks that `fee` burns enough of the hours flowing through `tx`.
pub fn verify_transaction_fee(tx: &Transaction, fee: u64, burn_factor: u32) -> Result<(), ConstraintViolation> {
    let hours_out = tx.output_hours().map_err(fee_overflow)?;
    let total = hours_out.checked_add(fee).ok_or_else(|| fee_overflow(ArithmeticError::AdditionOverflow))?;

    if fee == 0 {
        return Err(ConstraintViolation::soft("zero fee"));
    }
    if fee < required_fee(total, burn_factor) {
        return Err(ConstraintViolation::soft("insufficient coin hours burned as fee"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::uxout::{UxBody, UxHead};
    use crate::crypto::hash::Hash256;
    use crate::error::ViolationKind;

    #[test]
    fn test_required_fee_rounds_up() {
        assert_eq!(required_fee(0, 10), 0);
        assert_eq!(required_fee(10, 10), 1);
        assert_eq!(required_fee(11, 10), 2);
        assert_eq!(required_fee(99, 2), 50);
    }

    #[test]
    fn test_droplet_precision() {
        assert!(droplet_precision_check(3, 1_001_000).is_ok());
        assert!(droplet_precision_check(3, 1_000_100).is_err());
        assert!(droplet_precision_check(0, 5 * DROPLETS_PER_COIN).is_ok());
        assert!(droplet_precision_check(0, 5 * DROPLETS_PER_COIN + 1).is_err());
        assert!(droplet_precision_check(6, 1).is_ok());
        assert!(droplet_precision_check(7, 1).is_err());
    }

    #[test]
    fn test_transaction_fee() {
        let input = UxOut {
            head: UxHead { time: 0, bk_seq: 0 },
            body: UxBody {
                src_transaction: Hash256::zero(),
                address: Address::null(),
                coins: DROPLETS_PER_COIN,
                hours: 100,
            },
        };

        let mut tx = Transaction::new();
        tx.push_output(Address::null(), DROPLETS_PER_COIN, 80);
        assert_eq!(transaction_fee(&tx, 0, &[input.clone()]), Ok(20));

        // One coin for an hour accrues one more hour
        assert_eq!(transaction_fee(&tx, 3600, &[input.clone()]), Ok(21));

        tx.outputs[0].hours = 101;
        let err = transaction_fee(&tx, 0, &[input]).unwrap_err();
        assert_eq!(err.kind, ViolationKind::Hard);
    }

    #[test]
    fn test_verify_transaction_fee() {
        let mut tx = Transaction::new();
        tx.push_output(Address::null(), DROPLETS_PER_COIN, 90);

        // 100 hours in, 10 burned: exactly 1/10
        assert!(verify_transaction_fee(&tx, 10, 10).is_ok());
        assert!(verify_transaction_fee(&tx, 9, 10).is_err());
        assert!(verify_transaction_fee(&tx, 0, 10).unwrap_err().is_soft());
    }

    #[test]
    fn test_params_validation() {
        assert!(VerifyTxnParams::default().validate().is_ok());
        let bad = VerifyTxnParams { burn_factor: 1, ..Default::default() };
        assert!(bad.validate().is_err());
        let bad = VerifyTxnParams { max_droplet_precision: 7, ..Default::default() };
        assert!(bad.validate().is_err());
    }
}
