use super::Ledger;
use crate::core::uxout::{self, UxArray};
use crate::crypto::keys::Address;
use crate::storage::Tx;
use crate::wallet::{Balance, BalancePair};
use crate::Result;

impl Ledger {
    /// Confirmed and predicted balance of each address, in input order.
    ///
    /// Predicted balances drop the outputs pooled transactions spend and add
    /// the outputs they create. Any overflow fails the whole call with
    /// [`LedgerError::Arithmetic`](crate::LedgerError::Arithmetic).
    pub fn get_balance_of_addresses(&self, addresses: &[Address]) -> Result<Vec<BalancePair>> {
        let rtx = self.db.read()?;
        self.balances_within(&rtx, addresses)
    }

    fn balances_within(&self, tx: &dyn Tx, addresses: &[Address]) -> Result<Vec<BalancePair>> {
        let head = self.require_head(tx)?;
        let head_time = head.time();

        let confirmed = self.chain.unspent().get_for_addresses(tx, addresses)?;
        let outgoing = self.spends_of_addresses(tx, addresses)?;
        let incoming = self.pool.recv_of_addresses(tx, head.header(), addresses)?;

        let mut balances = Vec::with_capacity(addresses.len());
        for address in addresses {
            let held = confirmed.get(address).map(Vec::as_slice).unwrap_or_default();
            let spent = outgoing.get(address).map(Vec::as_slice).unwrap_or_default();
            let received = incoming.get(address).map(Vec::as_slice).unwrap_or_default();

            let remaining: UxArray = uxout::subtract(held, spent);
            let predicted = uxout::union(&remaining, received);

            balances.push(BalancePair {
                confirmed: Balance::from_outputs(held, head_time)?,
                predicted: Balance::from_outputs(&predicted, head_time)?,
            });
        }

        Ok(balances)
    }
}
