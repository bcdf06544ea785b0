//! Read-optimised projection of the confirmed chain.
//!
//! Everything here can be rebuilt from the stored blocks, so the index only
//! trusts itself when its parsed height matches the chain head exactly.

use crate::core::block::Block;
use crate::core::transaction::Transaction;
use crate::core::uxout::{self, UxOut};
use crate::crypto::hash::{Hash256, Hashable};
use crate::crypto::keys::{Address, ADDRESS_LENGTH};
use crate::storage::database::{
    TREE_HISTORY_ADDRESS_OUTPUTS, TREE_HISTORY_ADDRESS_SEEN, TREE_HISTORY_ADDRESS_TXNS, TREE_HISTORY_META,
    TREE_HISTORY_OUTPUTS, TREE_HISTORY_TXNS,
};
use crate::storage::{Tx, TxExt, WriteTxn};
use crate::{LedgerError, Result};
use serde::{Deserialize, Serialize};

const PARSED_SEQ_KEY: &[u8] = b"parsed_seq";

const HISTORY_TREES: &[&str] = &[
    TREE_HISTORY_TXNS,
    TREE_HISTORY_OUTPUTS,
    TREE_HISTORY_ADDRESS_OUTPUTS,
    TREE_HISTORY_ADDRESS_TXNS,
    TREE_HISTORY_ADDRESS_SEEN,
    TREE_HISTORY_META,
];

/// A confirmed transaction and the block that carried it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricTransaction {
    pub transaction: Transaction,
    pub block_seq: u64,
}

impl HistoricTransaction {
    pub fn hash(&self) -> Hash256 {
        self.transaction.hash()
    }
}

/// Every output ever created, with the transaction that spent it, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricUxOut {
    pub out: UxOut,
    pub spent_txn_id: Option<Hash256>,
    pub spent_block_seq: Option<u64>,
}

impl HistoricUxOut {
    pub fn hash(&self) -> Hash256 {
        self.out.hash()
    }

    pub fn is_spent(&self) -> bool {
        self.spent_txn_id.is_some()
    }
}

fn address_key(address: &Address, id: &Hash256) -> Vec<u8> {
    let mut key = Vec::with_capacity(ADDRESS_LENGTH + 32);
    key.extend_from_slice(&address.to_bytes());
    key.extend_from_slice(id.as_bytes());
    key
}

fn hash_suffix(key: &[u8]) -> Result<Hash256> {
    key.get(ADDRESS_LENGTH..)
        .and_then(Hash256::from_slice)
        .ok_or_else(|| LedgerError::Storage("Corrupt history address index key".to_string()))
}

/// Read and rebuild access to the history projection.
pub trait HistoryBackend: Send + Sync {
    fn parsed_block_seq(&self, tx: &dyn Tx) -> Result<Option<u64>>;
    fn needs_reset(&self, tx: &dyn Tx, head_seq: Option<u64>) -> Result<bool>;
    fn erase(&self, wtx: &mut WriteTxn<'_>) -> Result<()>;
    fn parse_block(&self, wtx: &mut WriteTxn<'_>, block: &Block) -> Result<()>;
    fn get_transaction(&self, tx: &dyn Tx, hash: &Hash256) -> Result<Option<HistoricTransaction>>;
    fn get_ux_out(&self, tx: &dyn Tx, id: &Hash256) -> Result<Option<HistoricUxOut>>;
    fn get_ux_outs(&self, tx: &dyn Tx, ids: &[Hash256]) -> Result<Vec<HistoricUxOut>>;
    fn get_outputs_for_address(&self, tx: &dyn Tx, address: &Address) -> Result<Vec<HistoricUxOut>>;
    fn get_transactions_for_address(&self, tx: &dyn Tx, address: &Address) -> Result<Vec<HistoricTransaction>>;
    fn address_seen(&self, tx: &dyn Tx, address: &Address) -> Result<bool>;
    fn transactions_num(&self, tx: &dyn Tx) -> Result<usize>;
}

#[derive(Debug, Default, Clone)]
pub struct HistoryIndex;

impl HistoryIndex {
    pub fn new() -> Self {
        Self
    }
}

impl HistoryBackend for HistoryIndex {
    /// Sequence of the last block parsed, `None` before the first one.
    fn parsed_block_seq(&self, tx: &dyn Tx) -> Result<Option<u64>> {
        tx.get_value(TREE_HISTORY_META, PARSED_SEQ_KEY)
    }

    /// Whether the index must be erased and rebuilt to match a chain whose
    /// head is `head_seq`.
    fn needs_reset(&self, tx: &dyn Tx, head_seq: Option<u64>) -> Result<bool> {
        let parsed = self.parsed_block_seq(tx)?;
        let no_txns = tx.is_empty(TREE_HISTORY_TXNS)?;
        let no_outputs = tx.is_empty(TREE_HISTORY_OUTPUTS)?;

        let head = match head_seq {
            Some(head) => head,
            None => return Ok(parsed.is_some() || !no_txns || !no_outputs),
        };

        if parsed != Some(head) {
            log::debug!("History parsed to {:?}, chain head is {}", parsed, head);
            return Ok(true);
        }
        if no_txns || no_outputs {
            return Ok(true);
        }

        // Every output has an owner, so outputs without seen addresses means
        // the seen set was lost.
        tx.is_empty(TREE_HISTORY_ADDRESS_SEEN)
    }

    fn erase(&self, wtx: &mut WriteTxn<'_>) -> Result<()> {
        for tree in HISTORY_TREES {
            wtx.clear(tree)?;
        }
        log::info!("🗑️ History index erased");
        Ok(())
    }

    /// Extends the index by one block. Blocks must arrive in sequence order.
    fn parse_block(&self, wtx: &mut WriteTxn<'_>, block: &Block) -> Result<()> {
        let expected = match self.parsed_block_seq(wtx)? {
            Some(seq) => seq + 1,
            None => 0,
        };
        if block.seq() > expected {
            return Err(LedgerError::HistoryNotParsed(expected));
        }
        if block.seq() < expected {
            return Err(LedgerError::Blockchain(format!(
                "Block {} already parsed into history",
                block.seq()
            )));
        }

        for tx in block.transactions() {
            let tx_hash = tx.hash();
            wtx.put_value(
                TREE_HISTORY_TXNS,
                tx_hash.as_bytes(),
                &HistoricTransaction { transaction: tx.clone(), block_seq: block.seq() },
            )?;

            for input in &tx.inputs {
                let mut spent: HistoricUxOut = wtx
                    .get_value(TREE_HISTORY_OUTPUTS, input.as_bytes())?
                    .ok_or_else(|| LedgerError::Storage(format!("History is missing spent output {}", input)))?;
                spent.spent_txn_id = Some(tx_hash);
                spent.spent_block_seq = Some(block.seq());
                wtx.put_value(TREE_HISTORY_OUTPUTS, input.as_bytes(), &spent)?;
                wtx.insert(
                    TREE_HISTORY_ADDRESS_TXNS,
                    &address_key(&spent.out.body.address, &tx_hash),
                    Vec::new(),
                )?;
            }

            for ux in uxout::create_unspents(&block.header, tx) {
                let id = ux.hash();
                let address = ux.body.address;
                wtx.put_value(
                    TREE_HISTORY_OUTPUTS,
                    id.as_bytes(),
                    &HistoricUxOut { out: ux, spent_txn_id: None, spent_block_seq: None },
                )?;
                wtx.insert(TREE_HISTORY_ADDRESS_OUTPUTS, &address_key(&address, &id), Vec::new())?;
                wtx.insert(TREE_HISTORY_ADDRESS_TXNS, &address_key(&address, &tx_hash), Vec::new())?;
                wtx.insert(TREE_HISTORY_ADDRESS_SEEN, &address.to_bytes(), Vec::new())?;
            }
        }

        wtx.put_value(TREE_HISTORY_META, PARSED_SEQ_KEY, &block.seq())?;
        log::debug!("📚 Parsed block {} into history", block.seq());
        Ok(())
    }

    fn get_transaction(&self, tx: &dyn Tx, hash: &Hash256) -> Result<Option<HistoricTransaction>> {
        tx.get_value(TREE_HISTORY_TXNS, hash.as_bytes())
    }

    fn get_ux_out(&self, tx: &dyn Tx, id: &Hash256) -> Result<Option<HistoricUxOut>> {
        tx.get_value(TREE_HISTORY_OUTPUTS, id.as_bytes())
    }

    /// Outputs for the ids that exist; unknown ids are skipped.
    fn get_ux_outs(&self, tx: &dyn Tx, ids: &[Hash256]) -> Result<Vec<HistoricUxOut>> {
        let mut outs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(out) = self.get_ux_out(tx, id)? {
                outs.push(out);
            }
        }
        Ok(outs)
    }

    /// Every output the address ever received, spent or not.
    fn get_outputs_for_address(&self, tx: &dyn Tx, address: &Address) -> Result<Vec<HistoricUxOut>> {
        let mut ids = Vec::new();
        for (key, _) in tx.scan_prefix(TREE_HISTORY_ADDRESS_OUTPUTS, &address.to_bytes())? {
            ids.push(hash_suffix(&key)?);
        }
        self.get_ux_outs(tx, &ids)
    }

    /// Transactions that paid or spent from `address`, oldest first.
    fn get_transactions_for_address(&self, tx: &dyn Tx, address: &Address) -> Result<Vec<HistoricTransaction>> {
        let mut txns = Vec::new();
        for (key, _) in tx.scan_prefix(TREE_HISTORY_ADDRESS_TXNS, &address.to_bytes())? {
            let hash = hash_suffix(&key)?;
            let txn = self.get_transaction(tx, &hash)?.ok_or_else(|| {
                LedgerError::Storage(format!("History address index points at missing transaction {}", hash))
            })?;
            txns.push(txn);
        }
        txns.sort_by_key(|t| t.block_seq);
        Ok(txns)
    }

    fn address_seen(&self, tx: &dyn Tx, address: &Address) -> Result<bool> {
        tx.contains_key(TREE_HISTORY_ADDRESS_SEEN, &address.to_bytes())
    }

    fn transactions_num(&self, tx: &dyn Tx) -> Result<usize> {
        tx.len(TREE_HISTORY_TXNS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::KeyPair;
    use crate::storage::Database;
    use tempfile::TempDir;

    struct Chain {
        genesis: Block,
        spend: Block,
        alice: Address,
        bob: Address,
    }

    fn two_blocks() -> Result<Chain> {
        let alice = KeyPair::new()?;
        let bob = KeyPair::new()?.address();

        let genesis = Block::genesis(alice.address(), 2_000_000, 100, 1_000);
        let genesis_ux = uxout::create_unspents(&genesis.header, &genesis.transactions()[0]);

        let mut tx = Transaction::new();
        tx.push_input(genesis_ux[0].hash());
        tx.push_output(bob, 1_000_000, 10);
        tx.push_output(alice.address(), 1_000_000, 10);
        tx.sign_inputs(&[alice.private_key.clone()])?;
        let spend = Block::new(&genesis.header, 2_000, 80, vec![tx]);

        Ok(Chain { genesis, spend, alice: alice.address(), bob })
    }

    #[test]
    fn test_parse_blocks() -> Result<()> {
        let dir = TempDir::new()?;
        let db = Database::new(dir.path())?;
        let history = HistoryIndex::new();
        let chain = two_blocks()?;

        let mut wtx = db.write()?;
        history.parse_block(&mut wtx, &chain.genesis)?;
        history.parse_block(&mut wtx, &chain.spend)?;
        wtx.commit()?;

        let rtx = db.read()?;
        assert_eq!(history.parsed_block_seq(&rtx)?, Some(1));
        assert_eq!(history.transactions_num(&rtx)?, 2);
        assert!(history.address_seen(&rtx, &chain.bob)?);
        assert!(!history.address_seen(&rtx, &KeyPair::new()?.address())?);

        let alice_outs = history.get_outputs_for_address(&rtx, &chain.alice)?;
        assert_eq!(alice_outs.len(), 2);
        let spent: Vec<_> = alice_outs.iter().filter(|o| o.is_spent()).collect();
        assert_eq!(spent.len(), 1);
        assert_eq!(spent[0].spent_block_seq, Some(1));
        assert_eq!(spent[0].spent_txn_id, Some(chain.spend.transactions()[0].hash()));

        let alice_txns = history.get_transactions_for_address(&rtx, &chain.alice)?;
        assert_eq!(alice_txns.len(), 2);
        assert_eq!(alice_txns[0].block_seq, 0);
        assert_eq!(alice_txns[1].block_seq, 1);

        let bob_txns = history.get_transactions_for_address(&rtx, &chain.bob)?;
        assert_eq!(bob_txns.len(), 1);
        let found = history.get_transaction(&rtx, &bob_txns[0].hash())?;
        assert_eq!(found.map(|t| t.block_seq), Some(1));

        Ok(())
    }

    #[test]
    fn test_parse_out_of_order() -> Result<()> {
        let dir = TempDir::new()?;
        let db = Database::new(dir.path())?;
        let history = HistoryIndex::new();
        let chain = two_blocks()?;

        let mut wtx = db.write()?;
        assert!(matches!(
            history.parse_block(&mut wtx, &chain.spend),
            Err(LedgerError::HistoryNotParsed(0))
        ));
        history.parse_block(&mut wtx, &chain.genesis)?;
        assert!(history.parse_block(&mut wtx, &chain.genesis).is_err());

        Ok(())
    }

    #[test]
    fn test_needs_reset() -> Result<()> {
        let dir = TempDir::new()?;
        let db = Database::new(dir.path())?;
        let history = HistoryIndex::new();
        let chain = two_blocks()?;

        let mut wtx = db.write()?;
        assert!(!history.needs_reset(&wtx, None)?);
        assert!(history.needs_reset(&wtx, Some(0))?);

        history.parse_block(&mut wtx, &chain.genesis)?;
        assert!(!history.needs_reset(&wtx, Some(0))?);
        assert!(history.needs_reset(&wtx, Some(1))?);
        assert!(history.needs_reset(&wtx, None)?);

        wtx.clear(TREE_HISTORY_ADDRESS_SEEN)?;
        assert!(history.needs_reset(&wtx, Some(0))?);

        history.erase(&mut wtx)?;
        assert_eq!(history.parsed_block_seq(&wtx)?, None);
        assert_eq!(history.transactions_num(&wtx)?, 0);
        assert!(!history.needs_reset(&wtx, None)?);

        Ok(())
    }
}
