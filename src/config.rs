use crate::consensus::monetary::{
    Distribution, VerifyPolicy, VerifyTxnParams, DEFAULT_MAX_BLOCK_SIZE, DEFAULT_MAX_BLOCK_TRANSACTIONS,
};
use crate::core::uxout::DROPLETS_PER_COIN;
use crate::crypto::keys::{Address, KeyPair, PrivateKey, PublicKey};
use crate::crypto::signatures::Signature;
use crate::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

/// 2025-01-01T00:00:00Z
pub const DEFAULT_GENESIS_TIMESTAMP: u64 = 1_735_689_600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub chain: ChainConfig,
    pub verify: VerifyConfig,
    pub distribution: Distribution,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Only the publisher creates and signs blocks.
    pub is_publisher: bool,
    pub publisher_public_key: String,
    #[serde(default)]
    pub publisher_secret_key: Option<String>,
    pub genesis_address: String,
    pub genesis_coin_volume: u64,
    #[serde(default)]
    pub genesis_coin_hours: u64,
    #[serde(default = "default_genesis_timestamp")]
    pub genesis_timestamp: u64,
    /// Publisher signature of the genesis block, required on other nodes.
    #[serde(default)]
    pub genesis_signature: Option<String>,
    pub max_block_transactions: usize,
    /// Byte budget for the transactions of a created block.
    pub create_block_max_size: u32,
}

/// Verification policy for each caller path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifyConfig {
    pub unconfirmed: VerifyTxnParams,
    pub create_block: VerifyTxnParams,
    pub user: VerifyTxnParams,
}

fn default_genesis_timestamp() -> u64 {
    DEFAULT_GENESIS_TIMESTAMP
}

fn home_dir() -> PathBuf {
    PathBuf::from(env::var("HOME").unwrap_or_else(|_| ".".to_string()))
}

impl VerifyConfig {
    pub fn params(&self, policy: VerifyPolicy) -> &VerifyTxnParams {
        match policy {
            VerifyPolicy::Unconfirmed => &self.unconfirmed,
            VerifyPolicy::CreateBlock => &self.create_block,
            VerifyPolicy::User => &self.user,
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            is_publisher: false,
            publisher_public_key: String::new(),
            publisher_secret_key: None,
            genesis_address: String::new(),
            genesis_coin_volume: 100_000_000 * DROPLETS_PER_COIN,
            genesis_coin_hours: 0,
            genesis_timestamp: DEFAULT_GENESIS_TIMESTAMP,
            genesis_signature: None,
            max_block_transactions: DEFAULT_MAX_BLOCK_TRANSACTIONS,
            create_block_max_size: DEFAULT_MAX_BLOCK_SIZE,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                data_dir: home_dir().join(".coinledger"),
            },
            chain: ChainConfig::default(),
            verify: VerifyConfig::default(),
            distribution: Distribution::default(),
        }
    }
}

impl Config {
    pub fn testnet() -> Self {
        let lenient = VerifyTxnParams {
            burn_factor: 2,
            ..VerifyTxnParams::default()
        };

        Self {
            storage: StorageConfig {
                data_dir: home_dir().join(".coinledger-testnet"),
            },
            chain: ChainConfig {
                genesis_coin_volume: 1_000_000 * DROPLETS_PER_COIN,
                genesis_coin_hours: 1_000_000,
                max_block_transactions: 200,
                ..ChainConfig::default()
            },
            verify: VerifyConfig {
                unconfirmed: lenient,
                create_block: lenient,
                user: lenient,
            },
            distribution: Distribution {
                max_coin_supply: 1_000_000 * DROPLETS_PER_COIN,
                ..Distribution::default()
            },
        }
    }

    /// Turns this node into a publisher with a fresh key, funding genesis to
    /// the publisher's own address.
    pub fn with_new_publisher(mut self) -> Result<Self> {
        let keypair = KeyPair::new()?;
        self.chain.is_publisher = true;
        self.chain.publisher_public_key = keypair.public_key.to_hex();
        self.chain.publisher_secret_key = Some(keypair.private_key.to_hex());
        self.chain.genesis_address = keypair.address().to_string();
        self.chain.genesis_signature = None;
        Ok(self)
    }

    pub fn publisher_public_key(&self) -> Result<PublicKey> {
        PublicKey::from_hex(&self.chain.publisher_public_key)
    }

    pub fn publisher_secret_key(&self) -> Result<Option<PrivateKey>> {
        self.chain
            .publisher_secret_key
            .as_deref()
            .map(PrivateKey::from_hex)
            .transpose()
    }

    pub fn genesis_address(&self) -> Result<Address> {
        self.chain.genesis_address.parse()
    }

    pub fn genesis_signature(&self) -> Result<Option<Signature>> {
        self.chain
            .genesis_signature
            .as_deref()
            .map(Signature::from_hex)
            .transpose()
    }

    pub fn validate(&self) -> Result<()> {
        for (name, params) in [
            ("unconfirmed", &self.verify.unconfirmed),
            ("create_block", &self.verify.create_block),
            ("user", &self.verify.user),
        ] {
            params
                .validate()
                .map_err(|e| LedgerError::InvalidInput(format!("verify.{}: {}", name, e)))?;
        }

        self.publisher_public_key()?;
        self.genesis_address()?;
        self.genesis_signature()?;

        if self.chain.is_publisher && self.publisher_secret_key()?.is_none() {
            return Err(LedgerError::InvalidInput(
                "publisher node requires chain.publisher_secret_key".to_string(),
            ));
        }
        if !self.chain.is_publisher && self.chain.genesis_signature.is_none() {
            return Err(LedgerError::InvalidInput(
                "non-publisher node requires chain.genesis_signature".to_string(),
            ));
        }

        if self.chain.genesis_coin_volume == 0 {
            return Err(LedgerError::InvalidInput("genesis coin volume must be positive".to_string()));
        }
        if self.chain.genesis_coin_volume > self.distribution.max_coin_supply {
            return Err(LedgerError::InvalidInput(
                "genesis coin volume exceeds max coin supply".to_string(),
            ));
        }
        if self.chain.max_block_transactions == 0 {
            return Err(LedgerError::InvalidInput("max block transactions must be positive".to_string()));
        }
        if self.chain.create_block_max_size < self.verify.create_block.max_transaction_size {
            return Err(LedgerError::InvalidInput(
                "create block max size is smaller than the max transaction size".to_string(),
            ));
        }

        Ok(())
    }

    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Self::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn config_path() -> PathBuf {
        home_dir().join(".coinledger").join("config.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_needs_keys() {
        assert!(Config::default().validate().is_err());
    }

    #[test]
    fn test_new_publisher_validates() -> Result<()> {
        let config = Config::default().with_new_publisher()?;
        config.validate()?;

        let public = config.publisher_public_key()?;
        let secret = config.publisher_secret_key()?.unwrap();
        assert_eq!(secret.public_key(), public);
        assert_eq!(config.genesis_address()?, public.to_address());

        Ok(())
    }

    #[test]
    fn test_validation_failures() -> Result<()> {
        let good = Config::testnet().with_new_publisher()?;
        good.validate()?;

        let mut bad = good.clone();
        bad.verify.user.burn_factor = 0;
        assert!(bad.validate().is_err());

        let mut bad = good.clone();
        bad.chain.publisher_secret_key = None;
        assert!(bad.validate().is_err());

        let mut bad = good.clone();
        bad.chain.is_publisher = false;
        assert!(bad.validate().is_err());

        let mut bad = good.clone();
        bad.chain.genesis_address = "not-an-address".to_string();
        assert!(bad.validate().is_err());

        let mut bad = good;
        bad.verify.unconfirmed.max_droplet_precision = 7;
        assert!(bad.validate().is_err());

        Ok(())
    }

    #[test]
    fn test_save_and_load() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("nested").join("config.json");

        let config = Config::testnet().with_new_publisher()?;
        config.save_to(&path)?;
        let loaded = Config::load_from(&path)?;

        assert_eq!(loaded.chain.publisher_public_key, config.chain.publisher_public_key);
        assert_eq!(loaded.verify.params(VerifyPolicy::User), config.verify.params(VerifyPolicy::User));
        assert_eq!(loaded.distribution, config.distribution);

        Ok(())
    }
}
