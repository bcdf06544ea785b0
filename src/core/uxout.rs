//! Unspent outputs and coin-hour accrual.

use crate::core::block::BlockHeader;
use crate::core::transaction::Transaction;
use crate::crypto::hash::{Hash256, Hashable};
use crate::crypto::keys::Address;
use crate::error::ArithmeticError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub const DROPLETS_PER_COIN: u64 = 1_000_000;
const SECONDS_PER_HOUR: u64 = 3600;

/// Where and when an output was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UxHead {
    pub time: u64,
    pub bk_seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UxBody {
    pub src_transaction: Hash256,
    pub address: Address,
    pub coins: u64,
    pub hours: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UxOut {
    pub head: UxHead,
    pub body: UxBody,
}

pub type UxArray = Vec<UxOut>;
pub type AddressUxOuts = HashMap<Address, UxArray>;

impl Hashable for UxBody {
    fn hash(&self) -> Hash256 {
        let mut data = Vec::with_capacity(32 + 21 + 16);
        data.extend_from_slice(self.src_transaction.as_bytes());
        data.extend_from_slice(&self.address.to_bytes());
        data.extend_from_slice(&self.coins.to_le_bytes());
        data.extend_from_slice(&self.hours.to_le_bytes());
        Hash256::hash(&data)
    }
}

impl UxOut {
    /// Output id. Depends only on the body, so it is known before the
    /// creating block exists.
    pub fn hash(&self) -> Hash256 {
        self.body.hash()
    }

    pub fn address(&self) -> Address {
        self.body.address
    }

    pub fn coins(&self) -> u64 {
        self.body.coins
    }

    /// Coin hours held at time `t`.
    ///
    /// Whole coins and droplets accrue separately so that large balances
    /// overflow only when the result itself would not fit in a u64.
    pub fn coin_hours(&self, t: u64) -> Result<u64, ArithmeticError> {
        if t <= self.head.time {
            return Ok(self.body.hours);
        }

        let seconds = t - self.head.time;

        let whole_coins = self.body.coins / DROPLETS_PER_COIN;
        let whole_coin_seconds = seconds
            .checked_mul(whole_coins)
            .ok_or(ArithmeticError::MultiplicationOverflow)?;

        let droplets = self.body.coins % DROPLETS_PER_COIN;
        let droplet_seconds = seconds
            .checked_mul(droplets)
            .ok_or(ArithmeticError::MultiplicationOverflow)?;

        let coin_seconds = whole_coin_seconds
            .checked_add(droplet_seconds / DROPLETS_PER_COIN)
            .ok_or(ArithmeticError::AdditionOverflow)?;

        self.body
            .hours
            .checked_add(coin_seconds / SECONDS_PER_HOUR)
            .ok_or(ArithmeticError::AdditionOverflow)
    }
}

/// Outputs `tx` creates when it lands in the block headed by `head`.
pub fn create_unspents(head: &BlockHeader, tx: &Transaction) -> UxArray {
    let src_transaction = tx.hash();
    tx.outputs
        .iter()
        .map(|o| UxOut {
            head: UxHead {
                time: head.time,
                bk_seq: head.seq,
            },
            body: UxBody {
                src_transaction,
                address: o.address,
                coins: o.coins,
                hours: o.hours,
            },
        })
        .collect()
}

pub fn total_coins(uxs: &[UxOut]) -> Result<u64, ArithmeticError> {
    uxs.iter().try_fold(0u64, |total, ux| {
        total.checked_add(ux.body.coins).ok_or(ArithmeticError::AdditionOverflow)
    })
}

pub fn total_hours(uxs: &[UxOut], t: u64) -> Result<u64, ArithmeticError> {
    uxs.iter().try_fold(0u64, |total, ux| {
        total.checked_add(ux.coin_hours(t)?).ok_or(ArithmeticError::AdditionOverflow)
    })
}

/// `a` without the outputs present in `b`, compared by id.
pub fn subtract(a: &[UxOut], b: &[UxOut]) -> UxArray {
    let remove: HashSet<Hash256> = b.iter().map(UxOut::hash).collect();
    a.iter().filter(|ux| !remove.contains(&ux.hash())).cloned().collect()
}

/// `a` plus the outputs of `b` not already present.
pub fn union(a: &[UxOut], b: &[UxOut]) -> UxArray {
    let mut seen: HashSet<Hash256> = a.iter().map(UxOut::hash).collect();
    let mut out = a.to_vec();
    for ux in b {
        if seen.insert(ux.hash()) {
            out.push(ux.clone());
        }
    }
    out
}
