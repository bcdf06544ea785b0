use super::Ledger;
use crate::crypto::keys::Address;
use crate::wallet::TransactionsFinder;
use crate::{LedgerError, Result};
use std::collections::HashMap;

/// The ledger's view of address activity, handed to wallet scanners.
pub struct LedgerTransactionsFinder<'a> {
    ledger: &'a Ledger,
}

impl<'a> LedgerTransactionsFinder<'a> {
    pub fn new(ledger: &'a Ledger) -> Self {
        Self { ledger }
    }
}

impl TransactionsFinder for LedgerTransactionsFinder<'_> {
    fn addresses_activity(&self, addresses: &[Address]) -> Result<Vec<bool>> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(bad) = addresses.iter().find(|a| !a.is_supported()) {
            return Err(LedgerError::UnsupportedAddress(bad.to_string()));
        }

        let positions: HashMap<Address, usize> = addresses.iter().enumerate().map(|(i, a)| (*a, i)).collect();
        if positions.len() != addresses.len() {
            return Err(LedgerError::DuplicateAddress);
        }

        let mut active = vec![false; addresses.len()];
        let rtx = self.ledger.db.read()?;

        // Wallets derive addresses in order, so the newest confirmed one is enough.
        for (i, address) in addresses.iter().enumerate().rev() {
            if self.ledger.history.address_seen(&rtx, address)? {
                active[i] = true;
                break;
            }
        }

        // Inputs need no check: a spent address already shows up in history.
        self.ledger.pool.for_each(&rtx, &mut |utx| {
            for output in &utx.transaction.outputs {
                if let Some(&i) = positions.get(&output.address) {
                    active[i] = true;
                }
            }
            Ok(())
        })?;

        Ok(active)
    }
}

impl Ledger {
    pub fn transactions_finder(&self) -> LedgerTransactionsFinder<'_> {
        LedgerTransactionsFinder::new(self)
    }

    /// Asks the configured scanner for up to `num` more addresses of `wallet_id`.
    pub fn scan_wallet_addresses(&self, wallet_id: &str, num: u64) -> Result<Vec<Address>> {
        let scanner = self
            .scanner
            .as_ref()
            .ok_or_else(|| LedgerError::Wallet("no address scanner configured".to_string()))?;
        scanner.scan_addresses(wallet_id, num, &self.transactions_finder())
    }
}
