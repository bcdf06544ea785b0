use crate::core::uxout::{self, UxOut};
use crate::error::ArithmeticError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Balance {
    pub coins: u64,
    pub hours: u64,
}

/// Balance as confirmed by the chain, and as it would be once the pool confirms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BalancePair {
    pub confirmed: Balance,
    pub predicted: Balance,
}

impl Balance {
    pub fn new(coins: u64, hours: u64) -> Self {
        Self { coins, hours }
    }

    /// Coins and coin hours held by `outs` at `head_time`.
    pub fn from_outputs(outs: &[UxOut], head_time: u64) -> Result<Self, ArithmeticError> {
        Ok(Self {
            coins: uxout::total_coins(outs)?,
            hours: uxout::total_hours(outs, head_time)?,
        })
    }

    pub fn add(&self, other: &Balance) -> Result<Self, ArithmeticError> {
        Ok(Self {
            coins: self.coins.checked_add(other.coins).ok_or(ArithmeticError::AdditionOverflow)?,
            hours: self.hours.checked_add(other.hours).ok_or(ArithmeticError::AdditionOverflow)?,
        })
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.coins / uxout::DROPLETS_PER_COIN;
        let frac = self.coins % uxout::DROPLETS_PER_COIN;
        write!(f, "{}.{:06} coins, {} hours", whole, frac, self.hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_is_checked() {
        let a = Balance::new(10, 5);
        let b = Balance::new(3, 7);

        assert_eq!(a.add(&b), Ok(Balance::new(13, 12)));
        assert_eq!(
            Balance::new(u64::MAX, 0).add(&Balance::new(1, 0)),
            Err(ArithmeticError::AdditionOverflow)
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Balance::new(1_500_000, 3).to_string(), "1.500000 coins, 3 hours");
    }
}
