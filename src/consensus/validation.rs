use crate::consensus::monetary::{self, Distribution, VerifyTxnParams};
use crate::core::block::BlockHeader;
use crate::core::transaction::Transaction;
use crate::core::uxout::{self, UxOut};
use crate::crypto::hash::{Hash256, Hashable};
use crate::crypto::signatures::SignatureUtils;
use crate::error::ConstraintViolation;
use std::collections::HashSet;

type Verdict = Result<(), ConstraintViolation>;

/// Whether every input must already carry a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnSigned {
    Signed,
    Unsigned,
}

/// Structural rules that need no chain state.
pub fn verify_transaction_structure(tx: &Transaction, signed: TxnSigned) -> Verdict {
    if tx.inputs.is_empty() {
        return Err(ConstraintViolation::hard("no inputs"));
    }
    if tx.outputs.is_empty() {
        return Err(ConstraintViolation::hard("no outputs"));
    }
    if tx.sigs.len() != tx.inputs.len() {
        return Err(ConstraintViolation::hard("invalid number of signatures"));
    }
    if tx.inner_hash != tx.hash_inner() {
        return Err(ConstraintViolation::hard("invalid header hash"));
    }
    if u32::try_from(tx.size()).is_err() {
        return Err(ConstraintViolation::hard("transaction size overflows uint32"));
    }

    let mut inputs = HashSet::with_capacity(tx.inputs.len());
    if !tx.inputs.iter().all(|i| inputs.insert(*i)) {
        return Err(ConstraintViolation::hard("duplicate spend"));
    }

    let mut outputs = HashSet::with_capacity(tx.outputs.len());
    if !tx.outputs.iter().all(|o| outputs.insert((o.address, o.coins, o.hours))) {
        return Err(ConstraintViolation::hard("duplicate output in transaction"));
    }

    if tx.outputs.iter().any(|o| o.coins == 0) {
        return Err(ConstraintViolation::hard("zero coin output"));
    }
    tx.output_coins()
        .map_err(|_| ConstraintViolation::hard("output coins overflow"))?;
    tx.output_hours()
        .map_err(|_| ConstraintViolation::hard("output hours overflow"))?;

    if signed == TxnSigned::Signed && tx.sigs.iter().any(|s| s.is_null()) {
        return Err(ConstraintViolation::hard("unsigned input in transaction"));
    }

    Ok(())
}

/// Every non-null signature must come from the owner of the output it spends.
pub fn verify_input_signatures(tx: &Transaction, uxin: &[UxOut], signed: TxnSigned) -> Verdict {
    if uxin.len() != tx.inputs.len() {
        return Err(ConstraintViolation::hard("tx.inputs does not match uxin"));
    }

    for (i, (sig, ux)) in tx.sigs.iter().zip(uxin).enumerate() {
        if sig.is_null() {
            if signed == TxnSigned::Signed {
                return Err(ConstraintViolation::hard(format!("unsigned input {}", i)));
            }
            continue;
        }
        SignatureUtils::verify_address(&ux.body.address, &tx.signature_hash(i), sig).map_err(|_| {
            ConstraintViolation::hard(format!("signature {} not valid for output being spent", i))
        })?;
    }

    Ok(())
}

/// Rules applied only to locally submitted transactions.
pub fn verify_user_constraints(tx: &Transaction) -> Verdict {
    if tx.outputs.iter().any(|o| o.address.is_null()) {
        return Err(ConstraintViolation::user("transaction output is sent to the null address"));
    }
    Ok(())
}

/// Policy rules. Waivable on the foreign relay path.
pub fn verify_soft_constraints(
    tx: &Transaction,
    head_time: u64,
    uxin: &[UxOut],
    distribution: &Distribution,
    params: &VerifyTxnParams,
) -> Verdict {
    if tx.size() > params.max_transaction_size as usize {
        return Err(ConstraintViolation::soft("transaction size bigger than max transaction size"));
    }

    let fee = monetary::transaction_fee(tx, head_time, uxin)
        .map_err(|v| ConstraintViolation::soft(v.reason))?;
    monetary::verify_transaction_fee(tx, fee, params.burn_factor)?;

    for output in &tx.outputs {
        monetary::droplet_precision_check(params.max_droplet_precision, output.coins)?;
    }

    let locked = distribution.locked_set();
    if uxin.iter().any(|ux| locked.contains(&ux.body.address)) {
        return Err(ConstraintViolation::soft("transaction has a locked address input"));
    }

    Ok(())
}

/// Consensus rules. Never waivable.
pub fn verify_hard_constraints(tx: &Transaction, head: &BlockHeader, uxin: &[UxOut], signed: TxnSigned) -> Verdict {
    verify_transaction_structure(tx, signed)?;
    verify_input_signatures(tx, uxin, signed)?;

    if uxin.iter().any(|ux| ux.head.time > head.time) {
        return Err(ConstraintViolation::hard("transaction input created after the head block"));
    }

    verify_coins_spending(tx, uxin)?;
    verify_hours_spending(tx, head.time, uxin)
}

fn verify_coins_spending(tx: &Transaction, uxin: &[UxOut]) -> Verdict {
    let coins_in = uxout::total_coins(uxin).map_err(|_| ConstraintViolation::hard("input coins overflow"))?;
    let coins_out = tx.output_coins().map_err(|_| ConstraintViolation::hard("output coins overflow"))?;

    if coins_in < coins_out {
        return Err(ConstraintViolation::hard("insufficient coins"));
    }
    if coins_in != coins_out {
        return Err(ConstraintViolation::hard("transactions may not destroy coins"));
    }
    Ok(())
}

fn verify_hours_spending(tx: &Transaction, head_time: u64, uxin: &[UxOut]) -> Verdict {
    let hours_in = uxout::total_hours(uxin, head_time)
        .map_err(|_| ConstraintViolation::hard("input hours overflow"))?;
    let hours_out = tx.output_hours().map_err(|_| ConstraintViolation::hard("output hours overflow"))?;

    if hours_in < hours_out {
        return Err(ConstraintViolation::hard("insufficient coin hours"));
    }
    Ok(())
}

/// Block-wide rules that span transactions: no transaction twice, no output
/// spent twice, no output created twice.
pub fn verify_block_transaction_set(transactions: &[Transaction]) -> Verdict {
    let mut hashes: HashSet<Hash256> = HashSet::with_capacity(transactions.len());
    let mut spent: HashSet<Hash256> = HashSet::new();
    let mut created: HashSet<Hash256> = HashSet::new();

    for tx in transactions {
        let hash = tx.hash();
        if !hashes.insert(hash) {
            return Err(ConstraintViolation::hard(format!("duplicate transaction {} in block", hash)));
        }
        for input in &tx.inputs {
            if !spent.insert(*input) {
                return Err(ConstraintViolation::hard(format!("output {} spent twice in block", input)));
            }
        }
        for output in &tx.outputs {
            let body = uxout::UxBody {
                src_transaction: hash,
                address: output.address,
                coins: output.coins,
                hours: output.hours,
            };
            if !created.insert(body.hash()) {
                return Err(ConstraintViolation::hard("duplicate output in block"));
            }
        }
    }

    Ok(())
}
