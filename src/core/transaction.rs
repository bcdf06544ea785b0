use crate::crypto::hash::{Hash256, Hashable};
use crate::crypto::keys::{Address, PrivateKey, ADDRESS_LENGTH};
use crate::crypto::signatures::{Signature, SIGNATURE_LENGTH};
use crate::error::ArithmeticError;
use crate::{LedgerError, Result};
use serde::{Deserialize, Serialize};

/// A transfer consuming unspent outputs (by id) and creating new ones.
///
/// `sigs[i]` signs `signature_hash(i)` with the key owning `inputs[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Transaction {
    pub inner_hash: Hash256,
    pub sigs: Vec<Signature>,
    pub inputs: Vec<Hash256>,
    pub outputs: Vec<TxOutput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: Address,
    pub coins: u64,
    pub hours: u64,
}

const OUTPUT_LENGTH: usize = ADDRESS_LENGTH + 8 + 8;

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_input(&mut self, uxid: Hash256) {
        self.inputs.push(uxid);
    }

    pub fn push_output(&mut self, address: Address, coins: u64, hours: u64) {
        self.outputs.push(TxOutput { address, coins, hours });
    }

    /// Hash of the inputs and outputs only; signatures commit to this.
    pub fn hash_inner(&self) -> Hash256 {
        let mut data = Vec::with_capacity(8 + self.inputs.len() * 32 + self.outputs.len() * OUTPUT_LENGTH);
        self.encode_inputs(&mut data);
        self.encode_outputs(&mut data);
        Hash256::hash(&data)
    }

    pub fn update_header(&mut self) {
        self.inner_hash = self.hash_inner();
    }

    /// Digest signed for input `index`.
    pub fn signature_hash(&self, index: usize) -> Hash256 {
        Hash256::hash_pair(&self.inner_hash, &self.inputs[index])
    }

    /// Signs every input. `keys[i]` must own `inputs[i]`.
    pub fn sign_inputs(&mut self, keys: &[PrivateKey]) -> Result<()> {
        if keys.len() != self.inputs.len() {
            return Err(LedgerError::Transaction(format!(
                "Need {} signing keys, got {}",
                self.inputs.len(),
                keys.len()
            )));
        }

        self.update_header();
        let mut sigs = Vec::with_capacity(keys.len());
        for (i, key) in keys.iter().enumerate() {
            sigs.push(key.sign(&self.signature_hash(i))?);
        }
        self.sigs = sigs;

        Ok(())
    }

    pub fn output_coins(&self) -> std::result::Result<u64, ArithmeticError> {
        self.outputs.iter().try_fold(0u64, |total, o| {
            total.checked_add(o.coins).ok_or(ArithmeticError::AdditionOverflow)
        })
    }

    pub fn output_hours(&self) -> std::result::Result<u64, ArithmeticError> {
        self.outputs.iter().try_fold(0u64, |total, o| {
            total.checked_add(o.hours).ok_or(ArithmeticError::AdditionOverflow)
        })
    }

    /// Deterministic wire encoding, prefixed with its own length.
    pub fn serialize(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.size() - 4);
        body.extend_from_slice(self.inner_hash.as_bytes());

        body.extend_from_slice(&(self.sigs.len() as u32).to_le_bytes());
        for sig in &self.sigs {
            body.extend_from_slice(&sig.to_bytes());
        }

        self.encode_inputs(&mut body);
        self.encode_outputs(&mut body);

        let mut data = Vec::with_capacity(body.len() + 4);
        data.extend_from_slice(&((body.len() + 4) as u32).to_le_bytes());
        data.extend_from_slice(&body);
        data
    }

    /// Encoded length in bytes.
    pub fn size(&self) -> usize {
        4 + 32
            + 4 + self.sigs.len() * SIGNATURE_LENGTH
            + 4 + self.inputs.len() * 32
            + 4 + self.outputs.len() * OUTPUT_LENGTH
    }

    fn encode_inputs(&self, data: &mut Vec<u8>) {
        data.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            data.extend_from_slice(input.as_bytes());
        }
    }

    fn encode_outputs(&self, data: &mut Vec<u8>) {
        data.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            data.extend_from_slice(&output.address.to_bytes());
            data.extend_from_slice(&output.coins.to_le_bytes());
            data.extend_from_slice(&output.hours.to_le_bytes());
        }
    }
}

impl Hashable for Transaction {
    fn hash(&self) -> Hash256 {
        Hash256::hash(&self.serialize())
    }
}
