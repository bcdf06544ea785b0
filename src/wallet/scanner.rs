use crate::crypto::keys::Address;
use crate::Result;

/// Activity lookup the ledger offers to wallets.
pub trait TransactionsFinder {
    /// One flag per address, in input order: true when the address received
    /// an output in a confirmed block or in a pooled transaction.
    ///
    /// Fails on duplicate addresses and on unsupported address versions.
    fn addresses_activity(&self, addresses: &[Address]) -> Result<Vec<bool>>;
}

/// Wallet-side address generation that stops once derived addresses show no
/// activity.
pub trait AddressScanner: Send + Sync {
    /// Derives up to `num` addresses for `wallet_id` and returns the ones
    /// the wallet should keep.
    fn scan_addresses(&self, wallet_id: &str, num: u64, finder: &dyn TransactionsFinder) -> Result<Vec<Address>>;
}
