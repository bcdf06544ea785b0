//! The ledger: the single entry point that ties the chain, the unconfirmed
//! pool and the history index to one transactional store.
//!
//! Every mutating operation runs in one [`WriteTxn`]; if any step fails the
//! transaction is dropped and nothing it did becomes visible. Queries run in
//! a [`ReadTxn`](crate::storage::ReadTxn) and never observe a half-applied
//! block.

pub mod balance;
pub mod finder;
pub mod query;

pub use finder::LedgerTransactionsFinder;
pub use query::{
    BlockchainMetadata, OutputsFilter, ResolvedInput, RichlistEntry, TransactionStatus, TransactionWithStatus,
    UnspentOutput, UnspentOutputsSummary, VerboseVerification,
};

use crate::config::Config;
use crate::consensus::monetary::VerifyPolicy;
use crate::consensus::validation;
use crate::consensus::TxnSigned;
use crate::core::block::{Block, SignedBlock};
use crate::core::blockchain::{Blockchain, ChainBackend};
use crate::core::history::{HistoryBackend, HistoryIndex};
use crate::core::transaction::Transaction;
use crate::core::unconfirmed::{InjectOutcome, PoolBackend, UnconfirmedPool};
use crate::core::uxout::UxArray;
use crate::crypto::hash::{Hash256, Hashable};
use crate::crypto::keys::{PrivateKey, PublicKey};
use crate::storage::{Database, WriteTxn};
use crate::wallet::AddressScanner;
use crate::{LedgerError, Result};
use chrono::Utc;
use std::sync::Arc;

/// What a successful local submission reports back.
#[derive(Debug, Clone)]
pub struct InjectedTransaction {
    pub already_known: bool,
    /// Head the transaction was verified against.
    pub head: SignedBlock,
    /// Outputs it spends.
    pub inputs: UxArray,
}

pub struct Ledger {
    config: Config,
    db: Arc<Database>,
    chain: Arc<dyn ChainBackend>,
    pool: Arc<dyn PoolBackend>,
    history: Arc<dyn HistoryBackend>,
    scanner: Option<Arc<dyn AddressScanner>>,
    publisher_key: PublicKey,
    secret_key: Option<PrivateKey>,
}

impl Ledger {
    /// Opens the database under `config.storage.data_dir`.
    pub fn open(config: Config) -> Result<Self> {
        std::fs::create_dir_all(&config.storage.data_dir)?;
        let db = Arc::new(Database::new(config.storage.data_dir.join("ledger.db"))?);
        Self::new(config, db)
    }

    /// Builds a ledger over `db`. A caller keeping its own handle to `db`
    /// must not hold a read transaction from it across a mutating ledger call
    /// on the same thread, or the commit blocks forever.
    pub fn new(config: Config, db: Arc<Database>) -> Result<Self> {
        config.validate()?;
        let chain = Arc::new(Blockchain::new(
            config.publisher_public_key()?,
            config.chain.max_block_transactions,
            config.chain.create_block_max_size,
            config.distribution.clone(),
        ));
        Self::with_components(config, db, chain, Arc::new(UnconfirmedPool::new()), Arc::new(HistoryIndex::new()))
    }

    /// Builds a ledger over caller-supplied components.
    ///
    /// Rebuilds the history index when it does not match the stored chain.
    ///
    /// # Panics
    ///
    /// If the configured secret key does not belong to the publisher key.
    pub fn with_components(
        config: Config,
        db: Arc<Database>,
        chain: Arc<dyn ChainBackend>,
        pool: Arc<dyn PoolBackend>,
        history: Arc<dyn HistoryBackend>,
    ) -> Result<Self> {
        config.validate()?;
        let publisher_key = config.publisher_public_key()?;
        let secret_key = config.publisher_secret_key()?;

        if let Some(secret) = &secret_key {
            assert!(
                secret.public_key() == publisher_key,
                "configured secret key does not match the publisher public key"
            );
        }

        let ledger = Self {
            config,
            db,
            chain,
            pool,
            history,
            scanner: None,
            publisher_key,
            secret_key,
        };

        let mut wtx = ledger.db.write()?;
        let head_seq = ledger.chain.head_seq(&wtx)?;
        if ledger.history.needs_reset(&wtx, head_seq)? {
            ledger.rebuild_history(&mut wtx)?;
        }
        wtx.commit()?;

        Ok(ledger)
    }

    /// Creates the genesis block when the chain is empty and sweeps the pool
    /// of transactions the chain no longer allows.
    pub fn init(&self) -> Result<()> {
        let mut wtx = self.db.write()?;

        if self.chain.head(&wtx)?.is_none() {
            let genesis = self.genesis_block()?;
            match self.execute_within(&mut wtx, &genesis, true) {
                Err(e @ (LedgerError::InvalidSignature | LedgerError::Constraint(_))) => {
                    panic!("genesis block rejected: {}", e)
                }
                other => other?,
            }
            log::info!("✅ Created genesis block {}", genesis.hash());
        }

        let removed = self.pool.remove_invalid(&mut wtx, self.chain.as_ref())?;
        wtx.commit()?;

        if !removed.is_empty() {
            log::info!("🗑️ Removed {} invalid unconfirmed transactions at startup", removed.len());
        }
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn publisher_key(&self) -> &PublicKey {
        &self.publisher_key
    }

    pub fn set_address_scanner(&mut self, scanner: Arc<dyn AddressScanner>) {
        self.scanner = Some(scanner);
    }

    fn genesis_block(&self) -> Result<SignedBlock> {
        let chain = &self.config.chain;
        let block = Block::genesis(
            self.config.genesis_address()?,
            chain.genesis_coin_volume,
            chain.genesis_coin_hours,
            chain.genesis_timestamp,
        );

        if chain.is_publisher {
            return self.sign_block(block);
        }

        match self.config.genesis_signature()? {
            Some(sig) => Ok(SignedBlock { block, sig }),
            None => panic!("non-publisher node has no genesis signature"),
        }
    }

    /// Erases the history index and parses every stored block again.
    fn rebuild_history(&self, wtx: &mut WriteTxn<'_>) -> Result<()> {
        let head_seq = self.chain.head_seq(wtx)?;
        log::info!("📚 Rebuilding history index up to block {:?}", head_seq);

        self.history.erase(wtx)?;
        if let Some(head) = head_seq {
            for seq in 0..=head {
                let block = self
                    .chain
                    .get_signed_block_by_seq(wtx, seq)?
                    .ok_or_else(|| LedgerError::BlockNotFound(seq.to_string()))?;
                self.history.parse_block(wtx, &block.block)?;
            }
        }

        log::info!("✅ History index rebuilt");
        Ok(())
    }

    /// Forces a full history rebuild.
    pub fn reindex_history(&self) -> Result<()> {
        let mut wtx = self.db.write()?;
        self.rebuild_history(&mut wtx)?;
        wtx.commit()
    }

    /// Executes `sb` and brings the history index and the pool in line with it.
    fn execute_within(&self, wtx: &mut WriteTxn<'_>, sb: &SignedBlock, require_signature: bool) -> Result<()> {
        self.chain.execute_block(wtx, sb, require_signature)?;
        self.history.parse_block(wtx, &sb.block)?;

        let confirmed: Vec<Hash256> = sb.block.transactions().iter().map(|t| t.hash()).collect();
        self.pool.remove_confirmed(wtx, &confirmed)?;
        self.pool.remove_invalid(wtx, self.chain.as_ref())?;
        Ok(())
    }

    fn assert_publisher(&self, operation: &str) {
        assert!(self.config.chain.is_publisher, "{} is only allowed on the publisher node", operation);
    }

    /// # Panics
    ///
    /// On a non-publisher node.
    pub fn sign_block(&self, block: Block) -> Result<SignedBlock> {
        self.assert_publisher("signing blocks");
        match &self.secret_key {
            Some(key) => block.sign(key),
            None => panic!("publisher node has no secret key"),
        }
    }

    /// Builds a block from `txns` without executing it.
    ///
    /// # Panics
    ///
    /// On a non-publisher node.
    pub fn create_block_from_txns(&self, txns: &[Transaction], when: u64) -> Result<Block> {
        self.assert_publisher("creating blocks");
        let rtx = self.db.read()?;
        self.chain
            .build_block(&rtx, txns, when, self.config.verify.params(VerifyPolicy::CreateBlock))
    }

    /// Builds a block from the pool at the current time, signs and executes it.
    ///
    /// # Panics
    ///
    /// On a non-publisher node.
    pub fn create_and_execute_block(&self) -> Result<SignedBlock> {
        self.create_and_execute_block_at(Utc::now().timestamp().max(0) as u64)
    }

    /// Like [`Ledger::create_and_execute_block`] with an explicit block time.
    pub fn create_and_execute_block_at(&self, when: u64) -> Result<SignedBlock> {
        self.assert_publisher("creating blocks");

        let mut wtx = self.db.write()?;
        let txns = self.pool.all_raw(&wtx)?;
        let block = self
            .chain
            .build_block(&wtx, &txns, when, self.config.verify.params(VerifyPolicy::CreateBlock))?;
        let sb = self.sign_block(block)?;

        self.execute_within(&mut wtx, &sb, true)?;
        wtx.commit()?;

        Ok(sb)
    }

    pub fn verify_block(&self, sb: &SignedBlock) -> Result<()> {
        let rtx = self.db.read()?;
        self.chain.verify_block(&rtx, sb)
    }

    /// Executes a block received from elsewhere. `require_signature` may be
    /// false only for blocks whose signature was already checked.
    pub fn execute_signed_block(&self, sb: &SignedBlock, require_signature: bool) -> Result<()> {
        let mut wtx = self.db.write()?;
        self.execute_within(&mut wtx, sb, require_signature)?;
        wtx.commit()
    }

    /// Accepts a locally submitted transaction. Any violation, soft ones
    /// included, rejects it.
    pub fn inject_user_transaction(&self, txn: &Transaction) -> Result<InjectedTransaction> {
        validation::verify_user_constraints(txn)?;

        let mut wtx = self.db.write()?;
        let (head, inputs, soft) = self.chain.verify_single_txn_constraints(
            &wtx,
            txn,
            self.config.verify.params(VerifyPolicy::User),
            TxnSigned::Signed,
        )?;
        if let Some(violation) = soft {
            return Err(violation.into());
        }

        let outcome = self.pool.inject_verified(&mut wtx, txn, None)?;
        wtx.commit()?;

        Ok(InjectedTransaction {
            already_known: outcome.already_known,
            head,
            inputs,
        })
    }

    /// Accepts a transaction relayed by a peer. Soft violations are reported
    /// but do not keep it out of the pool.
    pub fn inject_foreign_transaction(&self, txn: &Transaction) -> Result<InjectOutcome> {
        let mut wtx = self.db.write()?;
        let outcome = self.pool.inject(
            &mut wtx,
            self.chain.as_ref(),
            txn,
            self.config.verify.params(VerifyPolicy::Unconfirmed),
        )?;
        wtx.commit()?;

        if let Some(violation) = &outcome.soft_violation {
            log::warn!("⚠️ Pooled transaction {} despite: {}", txn.hash(), violation);
        }
        Ok(outcome)
    }

    /// Re-verifies the pool; returns the hashes removed.
    pub fn refresh_unconfirmed(&self) -> Result<Vec<Hash256>> {
        let mut wtx = self.db.write()?;
        let removed = self.pool.refresh(
            &mut wtx,
            self.chain.as_ref(),
            self.config.verify.params(VerifyPolicy::Unconfirmed),
        )?;
        wtx.commit()?;
        Ok(removed)
    }

    pub fn remove_invalid_unconfirmed(&self) -> Result<Vec<Hash256>> {
        let mut wtx = self.db.write()?;
        let removed = self.pool.remove_invalid(&mut wtx, self.chain.as_ref())?;
        wtx.commit()?;
        Ok(removed)
    }
}
