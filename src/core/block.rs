use crate::core::transaction::Transaction;
use crate::crypto::hash::{Hash256, Hashable};
use crate::crypto::keys::{Address, PrivateKey, PublicKey};
use crate::crypto::signatures::{Signature, SignatureUtils};
use crate::Result;
use serde::{Deserialize, Serialize};

pub const BLOCK_VERSION: u32 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub time: u64,
    pub seq: u64,
    /// Sum of the transaction fees, burned.
    pub fee: u64,
    pub prev_hash: Hash256,
    pub body_hash: Hash256,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockBody {
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub body: BlockBody,
}

/// A block with the publisher's signature over its header hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedBlock {
    pub block: Block,
    pub sig: Signature,
}

impl Block {
    /// Builds the successor of `prev`.
    pub fn new(prev: &BlockHeader, time: u64, fee: u64, transactions: Vec<Transaction>) -> Self {
        let body = BlockBody { transactions };
        Self {
            header: BlockHeader {
                version: prev.version,
                time,
                seq: prev.seq + 1,
                fee,
                prev_hash: prev.hash(),
                body_hash: body.hash(),
            },
            body,
        }
    }

    /// Block 0: a single input-less transaction funding `address`.
    pub fn genesis(address: Address, coins: u64, hours: u64, time: u64) -> Self {
        let mut tx = Transaction::new();
        tx.push_output(address, coins, hours);
        tx.update_header();

        let body = BlockBody {
            transactions: vec![tx],
        };

        Self {
            header: BlockHeader {
                version: BLOCK_VERSION,
                time,
                seq: 0,
                fee: 0,
                prev_hash: Hash256::zero(),
                body_hash: body.hash(),
            },
            body,
        }
    }

    pub fn seq(&self) -> u64 {
        self.header.seq
    }

    pub fn time(&self) -> u64 {
        self.header.time
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.body.transactions
    }

    pub fn transaction_count(&self) -> usize {
        self.body.transactions.len()
    }

    pub fn contains_transaction(&self, tx_hash: &Hash256) -> bool {
        self.body.transactions.iter().any(|tx| &tx.hash() == tx_hash)
    }

    pub fn size(&self) -> usize {
        self.body.transactions.iter().map(Transaction::size).sum()
    }

    pub fn sign(self, key: &PrivateKey) -> Result<SignedBlock> {
        let sig = key.sign(&self.hash())?;
        Ok(SignedBlock { block: self, sig })
    }
}

impl BlockBody {
    /// SHA-256 over the concatenated transaction hashes.
    pub fn hash(&self) -> Hash256 {
        if self.transactions.is_empty() {
            return Hash256::zero();
        }

        let mut data = Vec::with_capacity(self.transactions.len() * 32);
        for tx in &self.transactions {
            data.extend_from_slice(tx.hash().as_bytes());
        }
        Hash256::hash(&data)
    }
}

impl Hashable for Block {
    fn hash(&self) -> Hash256 {
        self.header.hash()
    }
}

impl Hashable for BlockHeader {
    fn hash(&self) -> Hash256 {
        let mut data = Vec::with_capacity(4 + 8 * 3 + 64);
        data.extend_from_slice(&self.version.to_le_bytes());
        data.extend_from_slice(&self.time.to_le_bytes());
        data.extend_from_slice(&self.seq.to_le_bytes());
        data.extend_from_slice(&self.fee.to_le_bytes());
        data.extend_from_slice(self.prev_hash.as_bytes());
        data.extend_from_slice(self.body_hash.as_bytes());

        Hash256::hash(&data)
    }
}

impl SignedBlock {
    pub fn seq(&self) -> u64 {
        self.block.header.seq
    }

    pub fn time(&self) -> u64 {
        self.block.header.time
    }

    pub fn header(&self) -> &BlockHeader {
        &self.block.header
    }

    pub fn hash(&self) -> Hash256 {
        self.block.hash()
    }

    pub fn verify(&self, publisher: &PublicKey) -> Result<()> {
        SignatureUtils::verify_public_key(publisher, &self.block.hash(), &self.sig)
    }
}
