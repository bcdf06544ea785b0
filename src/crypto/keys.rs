use crate::crypto::hash::{Hash160, Hash256};
use crate::{LedgerError, Result};
use rand::{rngs::OsRng, RngCore};
use secp256k1::{PublicKey as Secp256k1PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Version byte of pay-to-pubkey-hash addresses, the only kind the ledger accepts.
pub const ADDRESS_VERSION: u8 = 0x00;

/// Length of the raw address encoding: version byte plus key hash.
pub const ADDRESS_LENGTH: usize = 21;

#[derive(Clone)]
pub struct PrivateKey {
    key: SecretKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey {
    key: Vec<u8>, // Compressed SEC1 encoding
}

#[derive(Clone)]
pub struct KeyPair {
    pub private_key: PrivateKey,
    pub public_key: PublicKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address {
    pub version: u8,
    pub key: Hash160,
}

impl PrivateKey {
    pub fn new() -> Result<Self> {
        let mut rng = OsRng;
        let mut secret_bytes = [0u8; 32];
        rng.fill_bytes(&mut secret_bytes);

        let secret_key = SecretKey::from_slice(&secret_bytes)
            .map_err(|e| LedgerError::Crypto(format!("Failed to create private key: {}", e)))?;

        Ok(Self { key: secret_key })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(LedgerError::Crypto("Private key must be 32 bytes".to_string()));
        }

        let secret_key = SecretKey::from_slice(bytes)
            .map_err(|e| LedgerError::Crypto(format!("Invalid private key: {}", e)))?;

        Ok(Self { key: secret_key })
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        Self::from_bytes(&hex::decode(hex_str)?)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.key.secret_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        let secp = Secp256k1::signing_only();
        let public_key = Secp256k1PublicKey::from_secret_key(&secp, &self.key);

        PublicKey {
            key: public_key.serialize().to_vec(),
        }
    }

    pub(crate) fn secret(&self) -> &SecretKey {
        &self.key
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey(..)")
    }
}

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 33 && bytes.len() != 65 {
            return Err(LedgerError::Crypto("Invalid public key length".to_string()));
        }

        let parsed = Secp256k1PublicKey::from_slice(bytes)
            .map_err(|e| LedgerError::Crypto(format!("Invalid public key: {}", e)))?;

        // Always keep the compressed form so equal keys compare equal
        Ok(Self {
            key: parsed.serialize().to_vec(),
        })
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        Self::from_bytes(&hex::decode(hex_str)?)
    }

    pub(crate) fn from_secp256k1(key: &Secp256k1PublicKey) -> Self {
        Self {
            key: key.serialize().to_vec(),
        }
    }

    pub fn to_bytes(&self) -> &[u8] {
        &self.key
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.key)
    }

    pub fn hash160(&self) -> Hash160 {
        Hash160::hash_sha256(&self.key)
    }

    pub fn to_address(&self) -> Address {
        Address::from_public_key(self)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl KeyPair {
    pub fn new() -> Result<Self> {
        let private_key = PrivateKey::new()?;
        Ok(Self::from_private_key(private_key))
    }

    pub fn from_private_key(private_key: PrivateKey) -> Self {
        let public_key = private_key.public_key();

        Self {
            private_key,
            public_key,
        }
    }

    pub fn address(&self) -> Address {
        self.public_key.to_address()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .finish()
    }
}

impl Address {
    pub fn new(version: u8, key: Hash160) -> Self {
        Self { version, key }
    }

    /// The all-zero address. Coins sent here can never be spent.
    pub fn null() -> Self {
        Self::default()
    }

    pub fn is_null(&self) -> bool {
        self.version == 0 && self.key.is_zero()
    }

    pub fn from_public_key(public_key: &PublicKey) -> Self {
        Self {
            version: ADDRESS_VERSION,
            key: public_key.hash160(),
        }
    }

    pub fn is_supported(&self) -> bool {
        self.version == ADDRESS_VERSION
    }

    pub fn to_bytes(&self) -> [u8; ADDRESS_LENGTH] {
        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes[0] = self.version;
        bytes[1..].copy_from_slice(self.key.as_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != ADDRESS_LENGTH {
            return Err(LedgerError::Crypto("Invalid address length".to_string()));
        }

        let mut key = [0u8; 20];
        key.copy_from_slice(&bytes[1..]);
        Ok(Self {
            version: bytes[0],
            key: Hash160::new(key),
        })
    }

    fn checksum(&self) -> [u8; 4] {
        let hash = Hash256::double_hash(&self.to_bytes());
        let mut checksum = [0u8; 4];
        checksum.copy_from_slice(&hash.as_bytes()[0..4]);
        checksum
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut data = self.to_bytes().to_vec();
        data.extend_from_slice(&self.checksum());
        write!(f, "{}", bs58::encode(data).into_string())
    }
}

impl FromStr for Address {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        let decoded = bs58::decode(s)
            .into_vec()
            .map_err(|e| LedgerError::Crypto(format!("Invalid address format: {}", e)))?;

        if decoded.len() != ADDRESS_LENGTH + 4 {
            return Err(LedgerError::Crypto("Invalid address length".to_string()));
        }

        let address = Self::from_bytes(&decoded[..ADDRESS_LENGTH])?;
        if address.checksum() != decoded[ADDRESS_LENGTH..] {
            return Err(LedgerError::Crypto("Invalid address checksum".to_string()));
        }

        Ok(address)
    }
}

// Base58 in human readable formats, raw (version, key) pairs otherwise.
impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            (self.version, self.key).serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            let (version, key) = <(u8, Hash160)>::deserialize(deserializer)?;
            Ok(Self { version, key })
        }
    }
}

pub fn is_valid_address(address: &str) -> bool {
    address.parse::<Address>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation() -> Result<()> {
        let keypair = KeyPair::new()?;
        let address = keypair.address();

        assert!(address.is_supported());
        assert!(!address.is_null());
        assert!(is_valid_address(&address.to_string()));

        Ok(())
    }

    #[test]
    fn test_hex_roundtrip() -> Result<()> {
        let private_key = PrivateKey::new()?;
        let restored = PrivateKey::from_hex(&private_key.to_hex())?;
        assert_eq!(private_key.to_bytes(), restored.to_bytes());

        let public_key = private_key.public_key();
        assert_eq!(PublicKey::from_hex(&public_key.to_hex())?, public_key);

        Ok(())
    }

    #[test]
    fn test_address_validation() -> Result<()> {
        let keypair = KeyPair::new()?;
        let encoded = keypair.address().to_string();

        assert_eq!(encoded.parse::<Address>()?, keypair.address());
        assert!(!is_valid_address("invalid"));

        // Flip one character to break the checksum
        let mut corrupted: Vec<char> = encoded.chars().collect();
        let last = corrupted.len() - 1;
        corrupted[last] = if corrupted[last] == '2' { '3' } else { '2' };
        let corrupted: String = corrupted.into_iter().collect();
        assert!(!is_valid_address(&corrupted));

        Ok(())
    }

    #[test]
    fn test_address_serde_formats() -> Result<()> {
        let address = KeyPair::new()?.address();

        let json = serde_json::to_string(&address)?;
        assert_eq!(json, format!("\"{}\"", address));
        assert_eq!(serde_json::from_str::<Address>(&json)?, address);

        let raw = bincode::serialize(&address)?;
        assert_eq!(raw.len(), ADDRESS_LENGTH);
        assert_eq!(bincode::deserialize::<Address>(&raw)?, address);

        Ok(())
    }

    #[test]
    fn test_null_address() {
        assert!(Address::null().is_null());
        assert_eq!(Address::null().to_bytes(), [0u8; ADDRESS_LENGTH]);
    }
}
