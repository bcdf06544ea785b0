use crate::consensus::monetary::{self, Distribution, VerifyTxnParams};
use crate::consensus::validation::{self, TxnSigned};
use crate::core::block::{Block, SignedBlock};
use crate::core::transaction::Transaction;
use crate::core::utxo::UtxoSet;
use crate::core::uxout::UxArray;
use crate::crypto::hash::{Hash256, Hashable};
use crate::crypto::keys::PublicKey;
use crate::error::{ArithmeticError, ConstraintViolation};
use crate::storage::database::{TREE_BLOCKS, TREE_BLOCK_HASHES, TREE_CHAIN_META};
use crate::storage::{Tx, TxExt, WriteTxn};
use crate::{LedgerError, Result};
use std::cmp::Ordering;
use std::collections::HashSet;

const HEAD_SEQ_KEY: &[u8] = b"head_seq";

/// Outcome of evaluating one transaction against the head: the head it was
/// checked against, the outputs it spends, and any soft violation.
pub type TxnVerdict = (SignedBlock, UxArray, Option<ConstraintViolation>);

/// Block storage and consensus rules, as seen by the pool and the ledger.
pub trait ChainBackend: Send + Sync {
    fn head(&self, tx: &dyn Tx) -> Result<Option<SignedBlock>>;
    fn head_seq(&self, tx: &dyn Tx) -> Result<Option<u64>>;
    /// Head block time, 0 before genesis.
    fn time(&self, tx: &dyn Tx) -> Result<u64>;
    fn get_signed_block_by_seq(&self, tx: &dyn Tx, seq: u64) -> Result<Option<SignedBlock>>;
    fn get_signed_block_by_hash(&self, tx: &dyn Tx, hash: &Hash256) -> Result<Option<SignedBlock>>;
    /// Blocks with `start <= seq <= end`.
    fn get_blocks_in_range(&self, tx: &dyn Tx, start: u64, end: u64) -> Result<Vec<SignedBlock>>;
    /// Up to `n` most recent blocks, oldest first.
    fn get_last_blocks(&self, tx: &dyn Tx, n: u64) -> Result<Vec<SignedBlock>>;
    /// Up to `count` blocks following `seq`.
    fn get_signed_blocks_since(&self, tx: &dyn Tx, seq: u64, count: u64) -> Result<Vec<SignedBlock>>;

    fn unspent(&self) -> &UtxoSet;
    fn distribution(&self) -> &Distribution;
    fn publisher_key(&self) -> &PublicKey;

    fn build_block(&self, tx: &dyn Tx, txns: &[Transaction], when: u64, params: &VerifyTxnParams) -> Result<Block>;
    fn verify_block(&self, tx: &dyn Tx, sb: &SignedBlock) -> Result<()>;
    fn execute_block(&self, wtx: &mut WriteTxn<'_>, sb: &SignedBlock, require_signature: bool) -> Result<()>;

    /// Hard checks only.
    fn verify_single_txn_hard_constraints(
        &self,
        tx: &dyn Tx,
        txn: &Transaction,
        signed: TxnSigned,
    ) -> Result<(SignedBlock, UxArray)>;

    /// Soft and hard checks in one pass. Hard violations are errors; a soft
    /// violation is returned alongside the result so the caller decides.
    fn verify_single_txn_constraints(
        &self,
        tx: &dyn Tx,
        txn: &Transaction,
        params: &VerifyTxnParams,
        signed: TxnSigned,
    ) -> Result<TxnVerdict>;
}

#[derive(Debug, Clone)]
pub struct Blockchain {
    unspent: UtxoSet,
    publisher_key: PublicKey,
    max_block_transactions: usize,
    create_block_max_size: u32,
    distribution: Distribution,
}

fn seq_key(seq: u64) -> [u8; 8] {
    seq.to_be_bytes()
}

fn block_violation(reason: impl Into<String>) -> LedgerError {
    LedgerError::Constraint(ConstraintViolation::hard(reason))
}

impl Blockchain {
    pub fn new(
        publisher_key: PublicKey,
        max_block_transactions: usize,
        create_block_max_size: u32,
        distribution: Distribution,
    ) -> Self {
        Self {
            unspent: UtxoSet::new(),
            publisher_key,
            max_block_transactions,
            create_block_max_size,
            distribution,
        }
    }

    fn require_head(&self, tx: &dyn Tx) -> Result<SignedBlock> {
        self.head(tx)?
            .ok_or_else(|| LedgerError::Blockchain("Chain has no head block".to_string()))
    }

    /// Spent outputs for `txn`. A missing output makes the transaction invalid
    /// rather than failing the lookup.
    fn resolve_inputs(&self, tx: &dyn Tx, txn: &Transaction) -> Result<UxArray> {
        match self.unspent.get_array(tx, &txn.inputs) {
            Err(LedgerError::UnspentNotExist(id)) => Err(LedgerError::Constraint(ConstraintViolation::hard(
                format!("unspent output {} does not exist", id),
            ))),
            other => other,
        }
    }

    fn verify_genesis(&self, block: &Block) -> Result<()> {
        if block.seq() != 0 {
            return Err(block_violation("first block must have sequence 0"));
        }
        if !block.header.prev_hash.is_zero() {
            return Err(block_violation("genesis block cannot reference a previous block"));
        }
        if block.transaction_count() != 1 || !block.transactions()[0].inputs.is_empty() {
            return Err(block_violation("genesis block must hold one transaction without inputs"));
        }
        if block.header.body_hash != block.body.hash() {
            return Err(block_violation("computed body hash does not match header"));
        }
        Ok(())
    }

    fn verify_successor(&self, tx: &dyn Tx, head: &SignedBlock, block: &Block) -> Result<()> {
        if block.seq() != head.seq() + 1 {
            return Err(block_violation(format!(
                "block sequence {} does not follow head {}",
                block.seq(),
                head.seq()
            )));
        }
        if block.time() <= head.time() {
            return Err(block_violation("block time must be after the head block time"));
        }
        if block.header.prev_hash != head.hash() {
            return Err(block_violation("block does not reference the head block"));
        }
        if block.header.body_hash != block.body.hash() {
            return Err(block_violation("computed body hash does not match header"));
        }
        if block.transaction_count() == 0 {
            return Err(block_violation("block has no transactions"));
        }
        if block.transaction_count() > self.max_block_transactions {
            return Err(block_violation("block has too many transactions"));
        }

        validation::verify_block_transaction_set(block.transactions())?;

        let mut fees = 0u64;
        for txn in block.transactions() {
            let uxin = self.resolve_inputs(tx, txn)?;
            validation::verify_hard_constraints(txn, head.header(), &uxin, TxnSigned::Signed)?;
            let fee = monetary::transaction_fee(txn, head.time(), &uxin)?;
            fees = fees.checked_add(fee).ok_or(ArithmeticError::AdditionOverflow)?;
        }

        if block.header.fee != fees {
            return Err(block_violation(format!(
                "block fee {} does not match transaction fees {}",
                block.header.fee, fees
            )));
        }

        Ok(())
    }
}

/// Compares `a_fee / a_size` with `b_fee / b_size` exactly, by cross
/// multiplication.
fn cmp_fee_rate(a_fee: u64, a_size: usize, b_fee: u64, b_size: usize) -> Ordering {
    let lhs = u128::from(a_fee) * b_size as u128;
    let rhs = u128::from(b_fee) * a_size as u128;
    lhs.cmp(&rhs)
}

impl ChainBackend for Blockchain {
    fn head(&self, tx: &dyn Tx) -> Result<Option<SignedBlock>> {
        match self.head_seq(tx)? {
            Some(seq) => self.get_signed_block_by_seq(tx, seq),
            None => Ok(None),
        }
    }

    fn head_seq(&self, tx: &dyn Tx) -> Result<Option<u64>> {
        tx.get_value(TREE_CHAIN_META, HEAD_SEQ_KEY)
    }

    fn time(&self, tx: &dyn Tx) -> Result<u64> {
        Ok(self.head(tx)?.map(|b| b.time()).unwrap_or(0))
    }

    fn get_signed_block_by_seq(&self, tx: &dyn Tx, seq: u64) -> Result<Option<SignedBlock>> {
        tx.get_value(TREE_BLOCKS, &seq_key(seq))
    }

    fn get_signed_block_by_hash(&self, tx: &dyn Tx, hash: &Hash256) -> Result<Option<SignedBlock>> {
        let seq = match tx.get(TREE_BLOCK_HASHES, hash.as_bytes())? {
            Some(data) => {
                let bytes: [u8; 8] = data
                    .as_slice()
                    .try_into()
                    .map_err(|_| LedgerError::Storage("Corrupt block hash index entry".to_string()))?;
                u64::from_be_bytes(bytes)
            }
            None => return Ok(None),
        };
        self.get_signed_block_by_seq(tx, seq)
    }

    fn get_blocks_in_range(&self, tx: &dyn Tx, start: u64, end: u64) -> Result<Vec<SignedBlock>> {
        let head = match self.head_seq(tx)? {
            Some(head) => head,
            None => return Ok(Vec::new()),
        };

        let mut blocks = Vec::new();
        for seq in start..=end.min(head) {
            if let Some(block) = self.get_signed_block_by_seq(tx, seq)? {
                blocks.push(block);
            }
        }
        Ok(blocks)
    }

    fn get_last_blocks(&self, tx: &dyn Tx, n: u64) -> Result<Vec<SignedBlock>> {
        let head = match self.head_seq(tx)? {
            Some(head) if n > 0 => head,
            _ => return Ok(Vec::new()),
        };
        self.get_blocks_in_range(tx, head.saturating_sub(n - 1), head)
    }

    fn get_signed_blocks_since(&self, tx: &dyn Tx, seq: u64, count: u64) -> Result<Vec<SignedBlock>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let start = match seq.checked_add(1) {
            Some(start) => start,
            None => return Ok(Vec::new()),
        };
        self.get_blocks_in_range(tx, start, start.saturating_add(count - 1))
    }

    fn unspent(&self) -> &UtxoSet {
        &self.unspent
    }

    fn distribution(&self) -> &Distribution {
        &self.distribution
    }

    fn publisher_key(&self) -> &PublicKey {
        &self.publisher_key
    }

    /// Builds the next block from `txns`.
    ///
    /// Invalid candidates are dropped with a warning. The rest are ordered by
    /// fee rate (ties by hash), conflicting spends lose to the better paying
    /// transaction, and the list is cut to the byte and count limits.
    fn build_block(&self, tx: &dyn Tx, txns: &[Transaction], when: u64, params: &VerifyTxnParams) -> Result<Block> {
        let head = self.require_head(tx)?;
        if when <= head.time() {
            return Err(LedgerError::Blockchain(format!(
                "Block time {} must be after head time {}",
                when,
                head.time()
            )));
        }

        let mut candidates: Vec<(Transaction, Hash256, u64)> = Vec::with_capacity(txns.len());
        for txn in txns {
            let hash = txn.hash();
            let uxin = match self.verify_single_txn_constraints(tx, txn, params, TxnSigned::Signed) {
                Ok((_, uxin, None)) => uxin,
                Ok((_, _, Some(soft))) => {
                    log::warn!("⚠️ Skipping transaction {} for new block: {}", hash, soft);
                    continue;
                }
                Err(LedgerError::Constraint(violation)) => {
                    log::warn!("⚠️ Skipping transaction {} for new block: {}", hash, violation);
                    continue;
                }
                Err(e) => return Err(e),
            };

            match monetary::transaction_fee(txn, head.time(), &uxin) {
                Ok(fee) => candidates.push((txn.clone(), hash, fee)),
                Err(violation) => log::warn!("⚠️ Skipping transaction {} for new block: {}", hash, violation),
            }
        }

        if candidates.is_empty() {
            return Err(LedgerError::NoTransactions);
        }

        candidates.sort_by(|(a, a_hash, a_fee), (b, b_hash, b_fee)| {
            match cmp_fee_rate(*b_fee, b.size(), *a_fee, a.size()) {
                Ordering::Equal => a_hash.cmp(b_hash),
                other => other,
            }
        });

        let mut spent = HashSet::new();
        let mut included = HashSet::new();
        let mut selected = Vec::new();
        let mut block_size = 0u32;
        let mut fees = 0u64;

        for (txn, hash, fee) in candidates {
            if selected.len() >= self.max_block_transactions {
                break;
            }
            if !included.insert(hash) {
                continue;
            }
            if txn.inputs.iter().any(|input| spent.contains(input)) {
                log::debug!("Transaction {} conflicts with a better paying one", hash);
                continue;
            }

            let size = u32::try_from(txn.size())
                .map_err(|_| LedgerError::Blockchain(format!("Transaction {} size overflows uint32", hash)))?;
            let next_size = block_size
                .checked_add(size)
                .ok_or_else(|| LedgerError::Blockchain("Block size overflows uint32".to_string()))?;
            if next_size > self.create_block_max_size {
                break;
            }

            block_size = next_size;
            fees = fees.checked_add(fee).ok_or(ArithmeticError::AdditionOverflow)?;
            spent.extend(txn.inputs.iter().copied());
            selected.push(txn);
        }

        if selected.is_empty() {
            return Err(LedgerError::NoTransactions);
        }

        Ok(Block::new(head.header(), when, fees, selected))
    }

    /// Structural and hard-constraint checks; the signature is not checked.
    fn verify_block(&self, tx: &dyn Tx, sb: &SignedBlock) -> Result<()> {
        match self.head(tx)? {
            None => self.verify_genesis(&sb.block),
            Some(head) => self.verify_successor(tx, &head, &sb.block),
        }
    }

    fn execute_block(&self, wtx: &mut WriteTxn<'_>, sb: &SignedBlock, require_signature: bool) -> Result<()> {
        if require_signature {
            sb.verify(&self.publisher_key).map_err(|_| LedgerError::InvalidSignature)?;
        }

        self.verify_block(wtx, sb)?;
        self.unspent.apply_block(wtx, &sb.block)?;

        let seq = sb.seq();
        let hash = sb.hash();
        wtx.put_value(TREE_BLOCKS, &seq_key(seq), sb)?;
        wtx.insert(TREE_BLOCK_HASHES, hash.as_bytes(), seq_key(seq).to_vec())?;
        wtx.put_value(TREE_CHAIN_META, HEAD_SEQ_KEY, &seq)?;

        log::info!(
            "⛓️ Executed block {} ({} transactions, fee {})",
            seq,
            sb.block.transaction_count(),
            sb.header().fee
        );
        Ok(())
    }

    fn verify_single_txn_hard_constraints(
        &self,
        tx: &dyn Tx,
        txn: &Transaction,
        signed: TxnSigned,
    ) -> Result<(SignedBlock, UxArray)> {
        let head = self.require_head(tx)?;
        let uxin = self.resolve_inputs(tx, txn)?;
        validation::verify_hard_constraints(txn, head.header(), &uxin, signed)?;
        Ok((head, uxin))
    }

    fn verify_single_txn_constraints(
        &self,
        tx: &dyn Tx,
        txn: &Transaction,
        params: &VerifyTxnParams,
        signed: TxnSigned,
    ) -> Result<TxnVerdict> {
        let head = self.require_head(tx)?;
        let uxin = self.resolve_inputs(tx, txn)?;

        let soft = validation::verify_soft_constraints(txn, head.time(), &uxin, &self.distribution, params).err();
        validation::verify_hard_constraints(txn, head.header(), &uxin, signed)?;

        Ok((head, uxin, soft))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::uxout::{UxOut, DROPLETS_PER_COIN};
    use crate::crypto::keys::{Address, KeyPair};
    use crate::error::ViolationKind;
    use crate::storage::Database;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        db: Database,
        chain: Blockchain,
        publisher: KeyPair,
        alice: KeyPair,
    }

    fn spend(from: &[UxOut], key: &KeyPair, outputs: &[(Address, u64, u64)]) -> Result<Transaction> {
        let mut tx = Transaction::new();
        for ux in from {
            tx.push_input(ux.hash());
        }
        for (address, coins, hours) in outputs {
            tx.push_output(*address, *coins, *hours);
        }
        tx.sign_inputs(&vec![key.private_key.clone(); from.len()])?;
        Ok(tx)
    }

    impl Fixture {
        /// Genesis pays 100 coins with 1000 hours to alice at t=1000, then
        /// block 1 splits it into four outputs of 25 coins and 200 hours.
        fn new(max_size: u32) -> Result<Self> {
            let dir = TempDir::new()?;
            let db = Database::new(dir.path())?;
            let publisher = KeyPair::new()?;
            let alice = KeyPair::new()?;
            let chain = Blockchain::new(publisher.public_key.clone(), 10, max_size, Distribution::default());

            let genesis = Block::genesis(alice.address(), 100 * DROPLETS_PER_COIN, 1000, 1000)
                .sign(&publisher.private_key)?;
            let mut wtx = db.write()?;
            chain.execute_block(&mut wtx, &genesis, true)?;
            wtx.commit()?;

            let fixture = Self { _dir: dir, db, chain, publisher, alice };
            let outs = fixture.unspent_of(&fixture.alice.address())?;
            let split = spend(&outs, &fixture.alice, &[
                (fixture.alice.address(), 25 * DROPLETS_PER_COIN, 200),
                (fixture.alice.address(), 25 * DROPLETS_PER_COIN, 201),
                (fixture.alice.address(), 25 * DROPLETS_PER_COIN, 202),
                (fixture.alice.address(), 25 * DROPLETS_PER_COIN, 203),
            ])?;
            fixture.build_and_execute(&[split], 2000)?;
            Ok(fixture)
        }

        fn unspent_of(&self, address: &Address) -> Result<UxArray> {
            let rtx = self.db.read()?;
            let mut outs = self.chain.unspent().get_for_address(&rtx, address)?;
            outs.sort_by_key(|ux| ux.body.hours);
            Ok(outs)
        }

        fn build(&self, txns: &[Transaction], when: u64) -> Result<Block> {
            let rtx = self.db.read()?;
            self.chain.build_block(&rtx, txns, when, &VerifyTxnParams::default())
        }

        fn build_and_execute(&self, txns: &[Transaction], when: u64) -> Result<SignedBlock> {
            let block = self.build(txns, when)?.sign(&self.publisher.private_key)?;
            let mut wtx = self.db.write()?;
            self.chain.execute_block(&mut wtx, &block, true)?;
            wtx.commit()?;
            Ok(block)
        }
    }

    #[test]
    fn test_genesis_and_head() -> Result<()> {
        let f = Fixture::new(32 * 1024)?;
        let rtx = f.db.read()?;

        assert_eq!(f.chain.head_seq(&rtx)?, Some(1));
        assert_eq!(f.chain.time(&rtx)?, 2000);
        assert_eq!(f.chain.unspent().len(&rtx)?, 4);

        let genesis = f.chain.get_signed_block_by_seq(&rtx, 0)?.unwrap();
        let by_hash = f.chain.get_signed_block_by_hash(&rtx, &genesis.hash())?;
        assert_eq!(by_hash, Some(genesis));
        assert_eq!(f.chain.get_last_blocks(&rtx, 5)?.len(), 2);
        assert_eq!(f.chain.get_signed_blocks_since(&rtx, 0, 10)?.len(), 1);
        assert!(f.chain.get_signed_block_by_seq(&rtx, 2)?.is_none());

        Ok(())
    }

    #[test]
    fn test_build_orders_by_fee_rate_and_drops_conflicts() -> Result<()> {
        let f = Fixture::new(32 * 1024)?;
        let outs = f.unspent_of(&f.alice.address())?;
        let bob = KeyPair::new()?.address();

        let cheap = spend(&outs[0..1], &f.alice, &[(bob, 25 * DROPLETS_PER_COIN, 180)])?;
        let rich = spend(&outs[1..2], &f.alice, &[(bob, 25 * DROPLETS_PER_COIN, 100)])?;
        let rival = spend(&outs[0..1], &f.alice, &[(bob, 25 * DROPLETS_PER_COIN, 170)])?;

        let block = f.build(&[cheap.clone(), rich.clone(), rival.clone()], 3000)?;
        let hashes: Vec<_> = block.transactions().iter().map(|t| t.hash()).collect();
        assert_eq!(hashes, vec![rich.hash(), rival.hash()]);

        let rtx = f.db.read()?;
        let fees: u64 = [&rich, &rival]
            .iter()
            .map(|t| {
                let uxin = f.chain.unspent().get_array(&rtx, &t.inputs).unwrap();
                monetary::transaction_fee(t, 2000, &uxin).unwrap()
            })
            .sum();
        assert_eq!(block.header.fee, fees);

        Ok(())
    }

    #[test]
    fn test_build_truncates_to_size() -> Result<()> {
        let bob = KeyPair::new()?.address();
        let one_txn_size = {
            let mut tx = Transaction::new();
            tx.push_input(Hash256::zero());
            tx.push_output(bob, 1, 1);
            tx.sigs = vec![Default::default()];
            tx.size() as u32
        };

        let f = Fixture::new(32 * 1024)?;
        let f = Fixture { chain: Blockchain::new(f.publisher.public_key.clone(), 10, one_txn_size, Distribution::default()), ..f };
        let outs = f.unspent_of(&f.alice.address())?;

        let a = spend(&outs[0..1], &f.alice, &[(bob, 25 * DROPLETS_PER_COIN, 100)])?;
        let b = spend(&outs[1..2], &f.alice, &[(bob, 25 * DROPLETS_PER_COIN, 150)])?;
        let block = f.build(&[a.clone(), b], 3000)?;
        assert_eq!(block.transaction_count(), 1);
        assert_eq!(block.transactions()[0].hash(), a.hash());

        Ok(())
    }

    #[test]
    fn test_build_without_valid_candidates() -> Result<()> {
        let f = Fixture::new(32 * 1024)?;
        let outs = f.unspent_of(&f.alice.address())?;
        let bob = KeyPair::new()?.address();

        assert!(matches!(f.build(&[], 3000), Err(LedgerError::NoTransactions)));

        // Burns nothing, a soft violation under the block creation policy
        let free = spend(&outs[0..1], &f.alice, &[(bob, 25 * DROPLETS_PER_COIN, 200)])?;
        assert!(matches!(f.build(&[free], 3000), Err(LedgerError::NoTransactions)));

        let valid = spend(&outs[0..1], &f.alice, &[(bob, 25 * DROPLETS_PER_COIN, 100)])?;
        assert!(f.build(&[valid], 2000).is_err());

        Ok(())
    }

    #[test]
    fn test_execute_rejects_bad_signature() -> Result<()> {
        let f = Fixture::new(32 * 1024)?;
        let outs = f.unspent_of(&f.alice.address())?;
        let bob = KeyPair::new()?.address();
        let tx = spend(&outs[0..1], &f.alice, &[(bob, 25 * DROPLETS_PER_COIN, 100)])?;

        let forged = f.build(&[tx], 3000)?.sign(&KeyPair::new()?.private_key)?;
        let mut wtx = f.db.write()?;
        assert!(matches!(
            f.chain.execute_block(&mut wtx, &forged, true),
            Err(LedgerError::InvalidSignature)
        ));

        // Trusted replay skips the signature
        f.chain.execute_block(&mut wtx, &forged, false)?;
        assert_eq!(f.chain.head_seq(&wtx)?, Some(2));

        Ok(())
    }

    #[test]
    fn test_verify_block_rules() -> Result<()> {
        let f = Fixture::new(32 * 1024)?;
        let outs = f.unspent_of(&f.alice.address())?;
        let bob = KeyPair::new()?.address();
        let tx = spend(&outs[0..1], &f.alice, &[(bob, 25 * DROPLETS_PER_COIN, 100)])?;
        let block = f.build(&[tx.clone()], 3000)?;

        let rtx = f.db.read()?;
        let check = |block: Block| -> Result<()> {
            let sb = block.sign(&f.publisher.private_key)?;
            f.chain.verify_block(&rtx, &sb)
        };

        check(block.clone())?;

        let mut wrong_fee = block.clone();
        wrong_fee.header.fee += 1;
        assert!(check(wrong_fee).unwrap_err().is_constraint_violation());

        let mut stale = block.clone();
        stale.header.time = 2000;
        assert!(check(stale).is_err());

        let mut duplicated = block.clone();
        duplicated.body.transactions.push(tx);
        duplicated.header.body_hash = duplicated.body.hash();
        assert!(check(duplicated).is_err());

        let mut tampered = block;
        tampered.header.body_hash = Hash256::zero();
        assert!(check(tampered).is_err());

        Ok(())
    }

    #[test]
    fn test_single_txn_constraints() -> Result<()> {
        let f = Fixture::new(32 * 1024)?;
        let outs = f.unspent_of(&f.alice.address())?;
        let bob = KeyPair::new()?.address();
        let params = VerifyTxnParams::default();
        let rtx = f.db.read()?;

        let free = spend(&outs[0..1], &f.alice, &[(bob, 25 * DROPLETS_PER_COIN, 200)])?;
        let (head, uxin, soft) = f.chain.verify_single_txn_constraints(&rtx, &free, &params, TxnSigned::Signed)?;
        assert_eq!(head.seq(), 1);
        assert_eq!(uxin, outs[0..1].to_vec());
        assert_eq!(soft.map(|v| v.kind), Some(ViolationKind::Soft));

        let inflating = spend(&outs[0..1], &f.alice, &[(bob, 26 * DROPLETS_PER_COIN, 100)])?;
        let err = f
            .chain
            .verify_single_txn_constraints(&rtx, &inflating, &params, TxnSigned::Signed)
            .unwrap_err();
        assert_eq!(err.violation().map(|v| v.kind), Some(ViolationKind::Hard));

        let mut phantom = Transaction::new();
        phantom.push_input(Hash256::hash(b"nowhere"));
        phantom.push_output(bob, DROPLETS_PER_COIN, 0);
        phantom.sign_inputs(&[f.alice.private_key.clone()])?;
        let err = f
            .chain
            .verify_single_txn_hard_constraints(&rtx, &phantom, TxnSigned::Signed)
            .unwrap_err();
        assert!(err.violation().map(|v| v.is_hard()).unwrap_or(false));

        Ok(())
    }

    #[test]
    fn test_build_compares_fee_rates_exactly() -> Result<()> {
        let f = Fixture::new(32 * 1024)?;
        let bob = KeyPair::new()?.address();
        let outs = f.unspent_of(&f.alice.address())?;

        // 118 hours over 182 bytes against 142 hours over 219 bytes: both
        // round to the same fee per kilobyte, but the second rate is higher.
        let lower = spend(&outs[0..1], &f.alice, &[(bob, 25 * DROPLETS_PER_COIN, 82)])?;
        let higher = spend(&outs[1..2], &f.alice, &[
            (bob, 20 * DROPLETS_PER_COIN, 30),
            (bob, 5 * DROPLETS_PER_COIN, 29),
        ])?;
        assert_eq!(lower.size(), 182);
        assert_eq!(higher.size(), 219);
        assert_eq!(cmp_fee_rate(142, 219, 118, 182), Ordering::Greater);
        assert_eq!(cmp_fee_rate(118, 182, 118, 182), Ordering::Equal);

        let f = Fixture { chain: Blockchain::new(f.publisher.public_key.clone(), 10, 219, Distribution::default()), ..f };
        for order in [[lower.clone(), higher.clone()], [higher.clone(), lower.clone()]] {
            let block = f.build(&order, 3000)?;
            assert_eq!(block.transaction_count(), 1);
            assert_eq!(block.transactions()[0].hash(), higher.hash());
            assert_eq!(block.header.fee, 142);
        }

        Ok(())
    }

    #[test]
    fn test_build_respects_transaction_count() -> Result<()> {
        let f = Fixture::new(32 * 1024)?;
        let bob = KeyPair::new()?.address();
        let outs = f.unspent_of(&f.alice.address())?;

        let modest = spend(&outs[0..1], &f.alice, &[(bob, 25 * DROPLETS_PER_COIN, 100)])?;
        let generous = spend(&outs[1..2], &f.alice, &[(bob, 25 * DROPLETS_PER_COIN, 51)])?;

        let f = Fixture { chain: Blockchain::new(f.publisher.public_key.clone(), 1, 32 * 1024, Distribution::default()), ..f };
        let block = f.build(&[modest, generous.clone()], 3000)?;
        assert_eq!(block.transaction_count(), 1);
        assert_eq!(block.transactions()[0].hash(), generous.hash());

        Ok(())
    }

    #[test]
    fn test_verify_rejects_too_many_transactions() -> Result<()> {
        let f = Fixture::new(32 * 1024)?;
        let bob = KeyPair::new()?.address();
        let outs = f.unspent_of(&f.alice.address())?;

        let a = spend(&outs[0..1], &f.alice, &[(bob, 25 * DROPLETS_PER_COIN, 100)])?;
        let b = spend(&outs[1..2], &f.alice, &[(bob, 25 * DROPLETS_PER_COIN, 100)])?;
        let block = f.build(&[a, b], 3000)?.sign(&f.publisher.private_key)?;
        assert_eq!(block.block.transaction_count(), 2);

        let rtx = f.db.read()?;
        f.chain.verify_block(&rtx, &block)?;

        let strict = Blockchain::new(f.publisher.public_key.clone(), 1, 32 * 1024, Distribution::default());
        let err = strict.verify_block(&rtx, &block).unwrap_err();
        assert!(err.is_constraint_violation());
        assert!(err.violation().map(|v| v.is_hard()).unwrap_or(false));

        Ok(())
    }
}
