//! Cryptographic primitives: hashes, keys, addresses and recoverable signatures

pub mod keys;
pub mod signatures;
pub mod hash;

pub use keys::{Address, KeyPair, PrivateKey, PublicKey};
pub use signatures::{Signature, SignatureUtils};
pub use hash::{Hash160, Hash256, Hashable};
