//! Read-only views over the ledger. Each call runs in its own read
//! transaction.

use super::Ledger;
use crate::consensus::monetary::VerifyPolicy;
use crate::consensus::validation;
use crate::consensus::TxnSigned;
use crate::core::block::{BlockHeader, SignedBlock};
use crate::core::history::{HistoricTransaction, HistoricUxOut};
use crate::core::transaction::Transaction;
use crate::core::unconfirmed::{TxnFilter, UnconfirmedTransaction};
use crate::core::uxout::{AddressUxOuts, UxArray, UxOut};
use crate::crypto::hash::{Hash256, Hashable};
use crate::crypto::keys::Address;
use crate::error::{ArithmeticError, ConstraintViolation};
use crate::storage::Tx;
use crate::{LedgerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Unconfirmed,
    Confirmed {
        block_seq: u64,
        /// 1 when the transaction is in the head block.
        confirmations: u64,
    },
}

impl TransactionStatus {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, TransactionStatus::Confirmed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionWithStatus {
    pub transaction: Transaction,
    pub status: TransactionStatus,
    /// Block time when confirmed, otherwise the time it entered the pool.
    pub time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockchainMetadata {
    pub head: BlockHeader,
    pub unspents: usize,
    pub unconfirmed: usize,
}

/// An output together with its coin hours at the head time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    pub ux: UxOut,
    pub calculated_hours: u64,
}

impl UnspentOutput {
    fn at(ux: UxOut, head_time: u64) -> std::result::Result<Self, ArithmeticError> {
        let calculated_hours = ux.coin_hours(head_time)?;
        Ok(Self { ux, calculated_hours })
    }
}

/// Inputs resolved while verifying a transaction, hours computed at fee time.
pub type ResolvedInput = UnspentOutput;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutputsSummary {
    pub head: SignedBlock,
    pub confirmed: Vec<UnspentOutput>,
    /// Confirmed outputs spent by pooled transactions.
    pub outgoing: Vec<UnspentOutput>,
    /// Outputs pooled transactions will create.
    pub incoming: Vec<UnspentOutput>,
}

/// Narrows an unspent outputs summary. All filters must match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputsFilter {
    Addresses(Vec<Address>),
    NotAddresses(Vec<Address>),
    Hashes(Vec<Hash256>),
}

impl OutputsFilter {
    pub fn matches(&self, ux: &UxOut) -> bool {
        match self {
            OutputsFilter::Addresses(addrs) => addrs.contains(&ux.body.address),
            OutputsFilter::NotAddresses(addrs) => !addrs.contains(&ux.body.address),
            OutputsFilter::Hashes(hashes) => hashes.contains(&ux.hash()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichlistEntry {
    pub address: Address,
    pub coins: u64,
    /// Locked distribution address.
    pub locked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerboseVerification {
    pub inputs: Vec<ResolvedInput>,
    pub is_confirmed: bool,
    /// First rule the transaction breaks, if any.
    pub violation: Option<ConstraintViolation>,
}

/// Pool filter matching transactions that pay any of `addresses`.
pub fn sends_to_addresses(addresses: &[Address]) -> impl Fn(&UnconfirmedTransaction) -> bool {
    let wanted: HashSet<Address> = addresses.iter().copied().collect();
    move |utx| utx.transaction.outputs.iter().any(|o| wanted.contains(&o.address))
}

fn unix_seconds(when: &DateTime<Utc>) -> u64 {
    when.timestamp().max(0) as u64
}

impl Ledger {
    pub(super) fn require_head(&self, tx: &dyn Tx) -> Result<SignedBlock> {
        self.chain
            .head(tx)?
            .ok_or_else(|| LedgerError::Blockchain("chain has no head block".to_string()))
    }

    pub fn head(&self) -> Result<Option<SignedBlock>> {
        let rtx = self.db.read()?;
        self.chain.head(&rtx)
    }

    pub fn head_seq(&self) -> Result<Option<u64>> {
        let rtx = self.db.read()?;
        self.chain.head_seq(&rtx)
    }

    /// Head block time; 0 before genesis.
    pub fn head_time(&self) -> Result<u64> {
        let rtx = self.db.read()?;
        self.chain.time(&rtx)
    }

    pub fn get_block_by_seq(&self, seq: u64) -> Result<Option<SignedBlock>> {
        let rtx = self.db.read()?;
        self.chain.get_signed_block_by_seq(&rtx, seq)
    }

    pub fn get_block_by_hash(&self, hash: &Hash256) -> Result<Option<SignedBlock>> {
        let rtx = self.db.read()?;
        self.chain.get_signed_block_by_hash(&rtx, hash)
    }

    /// Blocks `start..=end` that exist.
    pub fn get_blocks_in_range(&self, start: u64, end: u64) -> Result<Vec<SignedBlock>> {
        let rtx = self.db.read()?;
        self.chain.get_blocks_in_range(&rtx, start, end)
    }

    pub fn get_last_blocks(&self, n: u64) -> Result<Vec<SignedBlock>> {
        let rtx = self.db.read()?;
        self.chain.get_last_blocks(&rtx, n)
    }

    /// Up to `count` blocks after `seq`.
    pub fn get_signed_blocks_since(&self, seq: u64, count: u64) -> Result<Vec<SignedBlock>> {
        let rtx = self.db.read()?;
        self.chain.get_signed_blocks_since(&rtx, seq, count)
    }

    pub fn get_blockchain_metadata(&self) -> Result<BlockchainMetadata> {
        let rtx = self.db.read()?;
        let head = self.require_head(&rtx)?;
        Ok(BlockchainMetadata {
            head: head.block.header,
            unspents: self.chain.unspent().len(&rtx)?,
            unconfirmed: self.pool.len(&rtx)?,
        })
    }

    fn status_within(&self, tx: &dyn Tx, hash: &Hash256) -> Result<Option<TransactionWithStatus>> {
        if let Some(utx) = self.pool.get(tx, hash)? {
            return Ok(Some(TransactionWithStatus {
                time: unix_seconds(&utx.received),
                transaction: utx.transaction,
                status: TransactionStatus::Unconfirmed,
            }));
        }

        let historic = match self.history.get_transaction(tx, hash)? {
            Some(h) => h,
            None => return Ok(None),
        };
        self.confirmed_status(tx, historic).map(Some)
    }

    fn confirmed_status(&self, tx: &dyn Tx, historic: HistoricTransaction) -> Result<TransactionWithStatus> {
        let head_seq = self.require_head(tx)?.seq();
        let block = self
            .chain
            .get_signed_block_by_seq(tx, historic.block_seq)?
            .ok_or_else(|| LedgerError::BlockNotFound(historic.block_seq.to_string()))?;

        Ok(TransactionWithStatus {
            transaction: historic.transaction,
            status: TransactionStatus::Confirmed {
                block_seq: historic.block_seq,
                confirmations: head_seq - historic.block_seq + 1,
            },
            time: block.time(),
        })
    }

    /// Looks in the pool first, then in the history.
    pub fn get_transaction(&self, hash: &Hash256) -> Result<Option<TransactionWithStatus>> {
        let rtx = self.db.read()?;
        self.status_within(&rtx, hash)
    }

    pub fn get_confirmed_transaction(&self, hash: &Hash256) -> Result<Option<HistoricTransaction>> {
        let rtx = self.db.read()?;
        self.history.get_transaction(&rtx, hash)
    }

    /// Confirmed transactions touching `addresses`, oldest first, followed by
    /// pooled transactions that pay them or spend their unspent outputs.
    pub fn get_transactions_for_addresses(&self, addresses: &[Address]) -> Result<Vec<TransactionWithStatus>> {
        let rtx = self.db.read()?;
        let wanted: HashSet<Address> = addresses.iter().copied().collect();

        let mut seen = HashSet::new();
        let mut confirmed = Vec::new();
        for address in addresses {
            for historic in self.history.get_transactions_for_address(&rtx, address)? {
                if seen.insert(historic.hash()) {
                    confirmed.push(historic);
                }
            }
        }
        confirmed.sort_by_key(|h| h.block_seq);

        let mut txns = Vec::with_capacity(confirmed.len());
        for historic in confirmed {
            txns.push(self.confirmed_status(&rtx, historic)?);
        }

        let unspent = self.chain.unspent();
        let mut pending = Vec::new();
        self.pool.for_each(&rtx, &mut |utx| {
            let mut touches = utx.transaction.outputs.iter().any(|o| wanted.contains(&o.address));
            for input in &utx.transaction.inputs {
                if touches {
                    break;
                }
                touches = unspent
                    .get(&rtx, input)?
                    .map_or(false, |ux| wanted.contains(&ux.body.address));
            }
            if touches {
                pending.push(TransactionWithStatus {
                    transaction: utx.transaction.clone(),
                    status: TransactionStatus::Unconfirmed,
                    time: unix_seconds(&utx.received),
                });
            }
            Ok(())
        })?;
        txns.extend(pending);

        Ok(txns)
    }

    pub fn transactions_num(&self) -> Result<usize> {
        let rtx = self.db.read()?;
        self.history.transactions_num(&rtx)
    }

    /// Number of addresses holding unspent outputs.
    pub fn address_count(&self) -> Result<usize> {
        let rtx = self.db.read()?;
        self.chain.unspent().address_count(&rtx)
    }

    pub fn get_all_unspent_outputs(&self) -> Result<UxArray> {
        let rtx = self.db.read()?;
        self.chain.unspent().get_all(&rtx)
    }

    /// Fails with [`LedgerError::UnspentNotExist`] if any id is unknown.
    pub fn get_unspent_outputs(&self, ids: &[Hash256]) -> Result<UxArray> {
        let rtx = self.db.read()?;
        self.chain.unspent().get_array(&rtx, ids)
    }

    pub fn get_unspents_of_addrs(&self, addresses: &[Address]) -> Result<AddressUxOuts> {
        let rtx = self.db.read()?;
        self.chain.unspent().get_for_addresses(&rtx, addresses)
    }

    fn outgoing_within(&self, tx: &dyn Tx) -> Result<UxArray> {
        let mut outs = Vec::new();
        self.pool.for_each(tx, &mut |utx| {
            outs.extend(self.chain.unspent().get_array(tx, &utx.transaction.inputs)?);
            Ok(())
        })?;
        Ok(outs)
    }

    /// Confirmed outputs that pooled transactions spend.
    pub fn unconfirmed_outgoing_outputs(&self) -> Result<UxArray> {
        let rtx = self.db.read()?;
        self.outgoing_within(&rtx)
    }

    /// Outputs pooled transactions would create on top of the head.
    pub fn unconfirmed_incoming_outputs(&self) -> Result<UxArray> {
        let rtx = self.db.read()?;
        let head = self.require_head(&rtx)?;
        self.pool.get_incoming_outputs(&rtx, head.header())
    }

    pub fn get_incoming_outputs(&self, head: &BlockHeader) -> Result<UxArray> {
        let rtx = self.db.read()?;
        self.pool.get_incoming_outputs(&rtx, head)
    }

    /// Pooled spends grouped by owner; every address gets an entry.
    pub(super) fn spends_of_addresses(&self, tx: &dyn Tx, addresses: &[Address]) -> Result<AddressUxOuts> {
        let mut spends: AddressUxOuts = addresses.iter().map(|a| (*a, Vec::new())).collect();
        for ux in self.outgoing_within(tx)? {
            if let Some(outs) = spends.get_mut(&ux.body.address) {
                outs.push(ux);
            }
        }
        Ok(spends)
    }

    pub fn unconfirmed_spends_of_addresses(&self, addresses: &[Address]) -> Result<AddressUxOuts> {
        let rtx = self.db.read()?;
        self.spends_of_addresses(&rtx, addresses)
    }

    pub fn recv_of_addresses(&self, addresses: &[Address]) -> Result<AddressUxOuts> {
        let rtx = self.db.read()?;
        let head = self.require_head(&rtx)?;
        self.pool.recv_of_addresses(&rtx, head.header(), addresses)
    }

    pub fn get_unconfirmed_transactions(&self, filter: TxnFilter<'_>) -> Result<Vec<UnconfirmedTransaction>> {
        let rtx = self.db.read()?;
        self.pool.get_filtered(&rtx, filter)
    }

    pub fn get_all_unconfirmed_transactions(&self) -> Result<Vec<UnconfirmedTransaction>> {
        self.get_unconfirmed_transactions(&|_| true)
    }

    pub fn get_all_valid_unconfirmed_hashes(&self) -> Result<Vec<Hash256>> {
        let rtx = self.db.read()?;
        self.pool.all_valid_hashes(&rtx)
    }

    /// Hashes from `hashes` that are not pooled.
    pub fn filter_known_unconfirmed(&self, hashes: &[Hash256]) -> Result<Vec<Hash256>> {
        let rtx = self.db.read()?;
        self.pool.filter_known(&rtx, hashes)
    }

    pub fn get_known_unconfirmed(&self, hashes: &[Hash256]) -> Result<Vec<Transaction>> {
        let rtx = self.db.read()?;
        self.pool.get_known(&rtx, hashes)
    }

    pub fn set_transactions_announced(&self, announced: &HashMap<Hash256, DateTime<Utc>>) -> Result<()> {
        let mut wtx = self.db.write()?;
        self.pool.set_announced(&mut wtx, announced)?;
        wtx.commit()
    }

    /// History record of an output, with the head time to value it at.
    pub fn get_ux_out_by_id(&self, id: &Hash256) -> Result<Option<(HistoricUxOut, u64)>> {
        let rtx = self.db.read()?;
        let out = match self.history.get_ux_out(&rtx, id)? {
            Some(out) => out,
            None => return Ok(None),
        };
        Ok(Some((out, self.chain.time(&rtx)?)))
    }

    /// Spent outputs each address ever owned, in input order.
    pub fn get_spent_outputs_for_addresses(&self, addresses: &[Address]) -> Result<Vec<Vec<HistoricUxOut>>> {
        let rtx = self.db.read()?;
        let mut spent = Vec::with_capacity(addresses.len());
        for address in addresses {
            let mut outs = self.history.get_outputs_for_address(&rtx, address)?;
            outs.retain(HistoricUxOut::is_spent);
            spent.push(outs);
        }
        Ok(spent)
    }

    pub fn get_unspent_outputs_summary(&self, filters: &[OutputsFilter]) -> Result<UnspentOutputsSummary> {
        let rtx = self.db.read()?;
        let head = self.require_head(&rtx)?;
        let head_time = head.time();

        let project = |uxs: UxArray| -> Result<Vec<UnspentOutput>> {
            let mut outs = Vec::new();
            for ux in uxs {
                if filters.iter().all(|f| f.matches(&ux)) {
                    outs.push(UnspentOutput::at(ux, head_time)?);
                }
            }
            Ok(outs)
        };

        let confirmed = project(self.chain.unspent().get_all(&rtx)?)?;
        let outgoing = project(self.outgoing_within(&rtx)?)?;
        let incoming = project(self.pool.get_incoming_outputs(&rtx, head.header())?)?;

        Ok(UnspentOutputsSummary {
            head,
            confirmed,
            outgoing,
            incoming,
        })
    }

    /// Coins held per address, richest first.
    pub fn get_richlist(&self, include_distribution: bool) -> Result<Vec<RichlistEntry>> {
        let rtx = self.db.read()?;
        let distribution = self.chain.distribution();
        let locked = distribution.locked_set();
        let excluded = if include_distribution {
            HashSet::new()
        } else {
            distribution.all_addresses()
        };

        let mut holdings: HashMap<Address, u64> = HashMap::new();
        for ux in self.chain.unspent().get_all(&rtx)? {
            if excluded.contains(&ux.body.address) {
                continue;
            }
            let total = holdings.entry(ux.body.address).or_default();
            *total = total.checked_add(ux.body.coins).ok_or(ArithmeticError::AdditionOverflow)?;
        }

        let mut richlist: Vec<RichlistEntry> = holdings
            .into_iter()
            .map(|(address, coins)| RichlistEntry {
                address,
                coins,
                locked: locked.contains(&address),
            })
            .collect();
        richlist.sort_by(|a, b| b.coins.cmp(&a.coins).then_with(|| a.address.cmp(&b.address)));

        Ok(richlist)
    }

    /// Runs every check on `txn` and reports the first violation instead of
    /// failing, along with the inputs it spends.
    ///
    /// A confirmed transaction is checked against the block before the one
    /// that carried it, with its inputs taken from the history. An unconfirmed
    /// transaction spending an output that is no longer unspent is reported
    /// as a hard violation.
    pub fn verify_txn_verbose(&self, txn: &Transaction, signed: TxnSigned) -> Result<VerboseVerification> {
        let rtx = self.db.read()?;
        let head = self.require_head(&rtx)?;

        let confirmed_in = self.history.get_transaction(&rtx, &txn.hash())?.map(|h| h.block_seq);

        let uxin = match self.chain.unspent().get_array(&rtx, &txn.inputs) {
            Ok(uxin) => uxin,
            Err(LedgerError::UnspentNotExist(id)) => {
                let historic = self.history.get_ux_outs(&rtx, &txn.inputs)?;
                if historic.len() != txn.inputs.len() {
                    return Ok(VerboseVerification {
                        inputs: Vec::new(),
                        is_confirmed: false,
                        violation: Some(ConstraintViolation::hard("unspent output does not exist")),
                    });
                }

                let uxin: UxArray = historic.into_iter().map(|h| h.out).collect();
                if confirmed_in.is_none() {
                    // Another transaction already spent this input.
                    let mut inputs = Vec::with_capacity(uxin.len());
                    for ux in uxin {
                        inputs.push(UnspentOutput::at(ux, head.time())?);
                    }
                    return Ok(VerboseVerification {
                        inputs,
                        is_confirmed: false,
                        violation: Some(ConstraintViolation::hard(format!("unspent output {} already spent", id))),
                    });
                }
                uxin
            }
            Err(e) => return Err(e),
        };
        let check_head = match confirmed_in {
            Some(seq) => {
                let prev = seq.saturating_sub(1);
                self.chain
                    .get_signed_block_by_seq(&rtx, prev)?
                    .ok_or_else(|| LedgerError::BlockNotFound(prev.to_string()))?
            }
            None => head,
        };
        let fee_time = check_head.time();

        let mut inputs = Vec::with_capacity(uxin.len());
        for ux in &uxin {
            inputs.push(UnspentOutput::at(ux.clone(), fee_time)?);
        }

        let violation = validation::verify_user_constraints(txn)
            .and_then(|_| {
                validation::verify_soft_constraints(
                    txn,
                    fee_time,
                    &uxin,
                    self.chain.distribution(),
                    self.config.verify.params(VerifyPolicy::User),
                )
            })
            .and_then(|_| validation::verify_hard_constraints(txn, check_head.header(), &uxin, signed))
            .err();

        Ok(VerboseVerification {
            inputs,
            is_confirmed: confirmed_in.is_some(),
            violation,
        })
    }
}
