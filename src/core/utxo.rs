use crate::core::block::Block;
use crate::core::uxout::{self, AddressUxOuts, UxArray, UxOut};
use crate::crypto::hash::Hash256;
use crate::crypto::keys::{Address, ADDRESS_LENGTH};
use crate::storage::database::{TREE_UNSPENT_ADDRESS_INDEX, TREE_UNSPENT_POOL};
use crate::storage::{Tx, TxExt, WriteTxn};
use crate::{LedgerError, Result};
use std::collections::HashSet;

/// Index of spendable outputs, keyed by output id with a secondary index by
/// owner address. Holds no state of its own; every call runs inside the
/// caller's transaction.
#[derive(Debug, Default, Clone)]
pub struct UtxoSet;

fn address_key(address: &Address, id: &Hash256) -> Vec<u8> {
    let mut key = Vec::with_capacity(ADDRESS_LENGTH + 32);
    key.extend_from_slice(&address.to_bytes());
    key.extend_from_slice(id.as_bytes());
    key
}

impl UtxoSet {
    pub fn new() -> Self {
        Self
    }

    pub fn get(&self, tx: &dyn Tx, id: &Hash256) -> Result<Option<UxOut>> {
        tx.get_value(TREE_UNSPENT_POOL, id.as_bytes())
    }

    /// Fetches every id, failing on the first one that is not unspent.
    pub fn get_array(&self, tx: &dyn Tx, ids: &[Hash256]) -> Result<UxArray> {
        ids.iter()
            .map(|id| self.get(tx, id)?.ok_or(LedgerError::UnspentNotExist(*id)))
            .collect()
    }

    pub fn get_all(&self, tx: &dyn Tx) -> Result<UxArray> {
        tx.all_values(TREE_UNSPENT_POOL)
    }

    pub fn get_for_address(&self, tx: &dyn Tx, address: &Address) -> Result<UxArray> {
        let mut outs = Vec::new();
        for (key, _) in tx.scan_prefix(TREE_UNSPENT_ADDRESS_INDEX, &address.to_bytes())? {
            let id = Hash256::from_slice(&key[ADDRESS_LENGTH..])
                .ok_or_else(|| LedgerError::Storage("Corrupt unspent address index key".to_string()))?;
            let ux = self.get(tx, &id)?.ok_or_else(|| {
                LedgerError::Storage(format!("Unspent address index points at missing output {}", id))
            })?;
            outs.push(ux);
        }
        Ok(outs)
    }

    /// Unspent outputs grouped by owner. Every requested address gets an
    /// entry, empty when it owns nothing.
    pub fn get_for_addresses(&self, tx: &dyn Tx, addresses: &[Address]) -> Result<AddressUxOuts> {
        let mut grouped = AddressUxOuts::with_capacity(addresses.len());
        for address in addresses {
            grouped.insert(*address, self.get_for_address(tx, address)?);
        }
        Ok(grouped)
    }

    pub fn contains(&self, tx: &dyn Tx, id: &Hash256) -> Result<bool> {
        tx.contains_key(TREE_UNSPENT_POOL, id.as_bytes())
    }

    pub fn len(&self, tx: &dyn Tx) -> Result<usize> {
        tx.len(TREE_UNSPENT_POOL)
    }

    pub fn is_empty(&self, tx: &dyn Tx) -> Result<bool> {
        tx.is_empty(TREE_UNSPENT_POOL)
    }

    /// Number of distinct addresses owning at least one unspent output.
    pub fn address_count(&self, tx: &dyn Tx) -> Result<usize> {
        let owners: HashSet<Vec<u8>> = tx
            .scan_prefix(TREE_UNSPENT_ADDRESS_INDEX, &[])?
            .into_iter()
            .map(|(mut key, _)| {
                key.truncate(ADDRESS_LENGTH);
                key
            })
            .collect();
        Ok(owners.len())
    }

    pub fn add(&self, wtx: &mut WriteTxn<'_>, ux: &UxOut) -> Result<()> {
        let id = ux.hash();
        if self.contains(wtx, &id)? {
            return Err(LedgerError::Blockchain(format!("Unspent output {} already exists", id)));
        }
        wtx.put_value(TREE_UNSPENT_POOL, id.as_bytes(), ux)?;
        wtx.insert(TREE_UNSPENT_ADDRESS_INDEX, &address_key(&ux.body.address, &id), Vec::new())
    }

    /// Removes and returns an output. Missing outputs are an error, which is
    /// what stops an output from being spent twice.
    pub fn remove(&self, wtx: &mut WriteTxn<'_>, id: &Hash256) -> Result<UxOut> {
        let ux = self.get(wtx, id)?.ok_or(LedgerError::UnspentNotExist(*id))?;
        wtx.remove(TREE_UNSPENT_POOL, id.as_bytes())?;
        wtx.remove(TREE_UNSPENT_ADDRESS_INDEX, &address_key(&ux.body.address, id))?;
        Ok(ux)
    }

    /// Spends the inputs of every transaction in `block` and adds their outputs.
    pub fn apply_block(&self, wtx: &mut WriteTxn<'_>, block: &Block) -> Result<()> {
        for tx in block.transactions() {
            for input in &tx.inputs {
                self.remove(wtx, input)?;
            }
            for ux in uxout::create_unspents(&block.header, tx) {
                self.add(wtx, &ux)?;
            }
        }
        Ok(())
    }
}
