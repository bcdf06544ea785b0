//! Pool of transactions waiting to be confirmed.

use crate::consensus::monetary::VerifyTxnParams;
use crate::consensus::validation::TxnSigned;
use crate::core::block::BlockHeader;
use crate::core::blockchain::ChainBackend;
use crate::core::transaction::Transaction;
use crate::core::uxout::{self, AddressUxOuts, UxArray};
use crate::crypto::hash::{Hash256, Hashable};
use crate::crypto::keys::Address;
use crate::error::ConstraintViolation;
use crate::storage::database::TREE_UNCONFIRMED_TXNS;
use crate::storage::{Tx, TxExt, WriteTxn};
use crate::{LedgerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnconfirmedTransaction {
    pub transaction: Transaction,
    pub received: DateTime<Utc>,
    /// Last time the transaction was verified against the chain.
    pub checked: DateTime<Utc>,
    /// Last time it was announced to peers.
    pub announced: Option<DateTime<Utc>>,
    /// False while it violates soft constraints.
    pub is_valid: bool,
}

impl UnconfirmedTransaction {
    pub fn new(transaction: Transaction, is_valid: bool) -> Self {
        let now = Utc::now();
        Self {
            transaction,
            received: now,
            checked: now,
            announced: None,
            is_valid,
        }
    }

    pub fn hash(&self) -> Hash256 {
        self.transaction.hash()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InjectOutcome {
    pub already_known: bool,
    /// Soft violation found while verifying; the transaction is pooled anyway.
    pub soft_violation: Option<ConstraintViolation>,
}

/// Predicate over pooled transactions.
pub type TxnFilter<'a> = &'a dyn Fn(&UnconfirmedTransaction) -> bool;

pub trait PoolBackend: Send + Sync {
    /// Verifies `txn` against the chain and pools it. Hard violations are
    /// errors; soft violations are reported in the outcome.
    fn inject(
        &self,
        wtx: &mut WriteTxn<'_>,
        chain: &dyn ChainBackend,
        txn: &Transaction,
        params: &VerifyTxnParams,
    ) -> Result<InjectOutcome>;

    /// Pools a transaction whose verification already ran.
    fn inject_verified(
        &self,
        wtx: &mut WriteTxn<'_>,
        txn: &Transaction,
        soft: Option<ConstraintViolation>,
    ) -> Result<InjectOutcome>;

    /// Re-verifies every pooled transaction. Removes those failing hard
    /// constraints and returns their hashes; soft failures only clear the
    /// valid flag.
    fn refresh(&self, wtx: &mut WriteTxn<'_>, chain: &dyn ChainBackend, params: &VerifyTxnParams) -> Result<Vec<Hash256>>;

    /// Removes every pooled transaction failing hard constraints.
    fn remove_invalid(&self, wtx: &mut WriteTxn<'_>, chain: &dyn ChainBackend) -> Result<Vec<Hash256>>;

    /// Drops transactions that are now confirmed. Unknown hashes are ignored.
    fn remove_confirmed(&self, wtx: &mut WriteTxn<'_>, hashes: &[Hash256]) -> Result<()>;

    fn get(&self, tx: &dyn Tx, hash: &Hash256) -> Result<Option<UnconfirmedTransaction>>;
    fn get_filtered(&self, tx: &dyn Tx, filter: TxnFilter<'_>) -> Result<Vec<UnconfirmedTransaction>>;
    fn for_each(&self, tx: &dyn Tx, f: &mut dyn FnMut(&UnconfirmedTransaction) -> Result<()>) -> Result<()>;
    fn all_raw(&self, tx: &dyn Tx) -> Result<Vec<Transaction>>;
    fn all_valid_hashes(&self, tx: &dyn Tx) -> Result<Vec<Hash256>>;
    /// Hashes not present in the pool.
    fn filter_known(&self, tx: &dyn Tx, hashes: &[Hash256]) -> Result<Vec<Hash256>>;
    /// Pooled transactions among `hashes`.
    fn get_known(&self, tx: &dyn Tx, hashes: &[Hash256]) -> Result<Vec<Transaction>>;
    /// Outputs the pool would create if everything in it confirmed on top of `head`.
    fn get_incoming_outputs(&self, tx: &dyn Tx, head: &BlockHeader) -> Result<UxArray>;
    /// Pending incoming outputs for each of `addresses`.
    fn recv_of_addresses(&self, tx: &dyn Tx, head: &BlockHeader, addresses: &[Address]) -> Result<AddressUxOuts>;
    fn set_announced(&self, wtx: &mut WriteTxn<'_>, announced: &HashMap<Hash256, DateTime<Utc>>) -> Result<()>;
    fn contains(&self, tx: &dyn Tx, hash: &Hash256) -> Result<bool>;
    fn len(&self, tx: &dyn Tx) -> Result<usize>;
}

#[derive(Debug, Default, Clone)]
pub struct UnconfirmedPool;

impl UnconfirmedPool {
    pub fn new() -> Self {
        Self
    }

    fn put(&self, wtx: &mut WriteTxn<'_>, utx: &UnconfirmedTransaction) -> Result<()> {
        wtx.put_value(TREE_UNCONFIRMED_TXNS, utx.hash().as_bytes(), utx)
    }

    fn all(&self, tx: &dyn Tx) -> Result<Vec<UnconfirmedTransaction>> {
        tx.all_values(TREE_UNCONFIRMED_TXNS)
    }
}

impl PoolBackend for UnconfirmedPool {
    fn inject(
        &self,
        wtx: &mut WriteTxn<'_>,
        chain: &dyn ChainBackend,
        txn: &Transaction,
        params: &VerifyTxnParams,
    ) -> Result<InjectOutcome> {
        let (_, _, soft) = chain.verify_single_txn_constraints(wtx, txn, params, TxnSigned::Signed)?;
        self.inject_verified(wtx, txn, soft)
    }

    fn inject_verified(
        &self,
        wtx: &mut WriteTxn<'_>,
        txn: &Transaction,
        soft: Option<ConstraintViolation>,
    ) -> Result<InjectOutcome> {
        let hash = txn.hash();
        let is_valid = soft.is_none();

        if let Some(mut existing) = self.get(wtx, &hash)? {
            existing.checked = Utc::now();
            existing.is_valid = is_valid;
            self.put(wtx, &existing)?;
            log::debug!("Transaction {} already in pool", hash);
            return Ok(InjectOutcome { already_known: true, soft_violation: soft });
        }

        self.put(wtx, &UnconfirmedTransaction::new(txn.clone(), is_valid))?;
        log::debug!("📥 Pooled transaction {} (valid: {})", hash, is_valid);
        Ok(InjectOutcome { already_known: false, soft_violation: soft })
    }

    fn refresh(&self, wtx: &mut WriteTxn<'_>, chain: &dyn ChainBackend, params: &VerifyTxnParams) -> Result<Vec<Hash256>> {
        let now = Utc::now();
        let mut removed = Vec::new();

        for mut utx in self.all(wtx)? {
            let hash = utx.hash();
            match chain.verify_single_txn_constraints(wtx, &utx.transaction, params, TxnSigned::Signed) {
                Ok((_, _, soft)) => {
                    utx.checked = now;
                    utx.is_valid = soft.is_none();
                    self.put(wtx, &utx)?;
                }
                Err(LedgerError::Constraint(violation)) => {
                    log::debug!("Removing transaction {} from pool: {}", hash, violation);
                    wtx.remove(TREE_UNCONFIRMED_TXNS, hash.as_bytes())?;
                    removed.push(hash);
                }
                Err(e) => return Err(e),
            }
        }

        log::info!("🔄 Refreshed unconfirmed pool, {} transactions removed", removed.len());
        Ok(removed)
    }

    fn remove_invalid(&self, wtx: &mut WriteTxn<'_>, chain: &dyn ChainBackend) -> Result<Vec<Hash256>> {
        let mut removed = Vec::new();

        for utx in self.all(wtx)? {
            let hash = utx.hash();
            match chain.verify_single_txn_hard_constraints(wtx, &utx.transaction, TxnSigned::Signed) {
                Ok(_) => {}
                Err(LedgerError::Constraint(violation)) => {
                    log::debug!("Removing invalid transaction {}: {}", hash, violation);
                    wtx.remove(TREE_UNCONFIRMED_TXNS, hash.as_bytes())?;
                    removed.push(hash);
                }
                Err(e) => return Err(e),
            }
        }

        if !removed.is_empty() {
            log::info!("🗑️ Removed {} invalid unconfirmed transactions", removed.len());
        }
        Ok(removed)
    }

    fn remove_confirmed(&self, wtx: &mut WriteTxn<'_>, hashes: &[Hash256]) -> Result<()> {
        for hash in hashes {
            wtx.remove(TREE_UNCONFIRMED_TXNS, hash.as_bytes())?;
        }
        Ok(())
    }

    fn get(&self, tx: &dyn Tx, hash: &Hash256) -> Result<Option<UnconfirmedTransaction>> {
        tx.get_value(TREE_UNCONFIRMED_TXNS, hash.as_bytes())
    }

    fn get_filtered(&self, tx: &dyn Tx, filter: TxnFilter<'_>) -> Result<Vec<UnconfirmedTransaction>> {
        Ok(self.all(tx)?.into_iter().filter(|utx| filter(utx)).collect())
    }

    fn for_each(&self, tx: &dyn Tx, f: &mut dyn FnMut(&UnconfirmedTransaction) -> Result<()>) -> Result<()> {
        for utx in self.all(tx)? {
            f(&utx)?;
        }
        Ok(())
    }

    fn all_raw(&self, tx: &dyn Tx) -> Result<Vec<Transaction>> {
        Ok(self.all(tx)?.into_iter().map(|utx| utx.transaction).collect())
    }

    fn all_valid_hashes(&self, tx: &dyn Tx) -> Result<Vec<Hash256>> {
        Ok(self.all(tx)?.iter().filter(|utx| utx.is_valid).map(UnconfirmedTransaction::hash).collect())
    }

    fn filter_known(&self, tx: &dyn Tx, hashes: &[Hash256]) -> Result<Vec<Hash256>> {
        let mut unknown = Vec::new();
        for hash in hashes {
            if !self.contains(tx, hash)? {
                unknown.push(*hash);
            }
        }
        Ok(unknown)
    }

    fn get_known(&self, tx: &dyn Tx, hashes: &[Hash256]) -> Result<Vec<Transaction>> {
        let mut known = Vec::new();
        for hash in hashes {
            if let Some(utx) = self.get(tx, hash)? {
                known.push(utx.transaction);
            }
        }
        Ok(known)
    }

    fn get_incoming_outputs(&self, tx: &dyn Tx, head: &BlockHeader) -> Result<UxArray> {
        let mut outs = Vec::new();
        for utx in self.all(tx)? {
            outs.extend(uxout::create_unspents(head, &utx.transaction));
        }
        Ok(outs)
    }

    fn recv_of_addresses(&self, tx: &dyn Tx, head: &BlockHeader, addresses: &[Address]) -> Result<AddressUxOuts> {
        let wanted: HashSet<Address> = addresses.iter().copied().collect();
        let mut recv: AddressUxOuts = addresses.iter().map(|a| (*a, Vec::new())).collect();

        for ux in self.get_incoming_outputs(tx, head)? {
            if wanted.contains(&ux.body.address) {
                recv.entry(ux.body.address).or_default().push(ux);
            }
        }
        Ok(recv)
    }

    fn set_announced(&self, wtx: &mut WriteTxn<'_>, announced: &HashMap<Hash256, DateTime<Utc>>) -> Result<()> {
        for (hash, when) in announced {
            if let Some(mut utx) = self.get(wtx, hash)? {
                utx.announced = Some(*when);
                self.put(wtx, &utx)?;
            }
        }
        Ok(())
    }

    fn contains(&self, tx: &dyn Tx, hash: &Hash256) -> Result<bool> {
        tx.contains_key(TREE_UNCONFIRMED_TXNS, hash.as_bytes())
    }

    fn len(&self, tx: &dyn Tx) -> Result<usize> {
        tx.len(TREE_UNCONFIRMED_TXNS)
    }
}
