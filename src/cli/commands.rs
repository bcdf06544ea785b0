use crate::config::Config;
use crate::core::block::SignedBlock;
use crate::core::uxout::DROPLETS_PER_COIN;
use crate::crypto::hash::{Hash256, Hashable};
use crate::crypto::keys::{Address, KeyPair};
use crate::ledger::{Ledger, TransactionStatus};
use crate::wallet::Balance;
use crate::LedgerError;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ledgerd")]
#[command(about = "Coin ledger node: chain, unconfirmed pool and history index")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, help = "Data directory")]
    pub data_dir: Option<PathBuf>,

    #[arg(long, help = "Enable debug logging")]
    pub debug: bool,

    #[arg(long, help = "Configuration file path")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the database and the genesis block
    Init {
        #[arg(long, help = "Generate a publisher key and fund genesis to it")]
        publisher: bool,
    },

    /// Show chain metadata
    Status,

    /// Show a block
    Block {
        #[arg(help = "Block hash or sequence number")]
        identifier: String,
        #[arg(long, help = "List transaction hashes")]
        verbose: bool,
    },

    /// List recent blocks
    Blocks {
        #[arg(long, default_value_t = 10, help = "Number of blocks to show")]
        last: u64,
    },

    /// Show a transaction
    Tx { hash: String },

    /// Show confirmed and predicted balances
    Balance {
        #[arg(required = true)]
        addresses: Vec<String>,
    },

    /// List unconfirmed transactions
    Pending,

    /// Create a block from the pool (publisher only)
    CreateBlock,

    /// Re-verify the unconfirmed pool
    Refresh,

    /// Rebuild the history index from the stored blocks
    ReindexHistory,

    /// Show the richest addresses
    Richlist {
        #[arg(long, help = "Include distribution addresses")]
        include_distribution: bool,
        #[arg(long, default_value_t = 20, help = "Number of entries to show")]
        limit: usize,
    },

    /// Print a new key pair and its address
    Keygen,
}

pub fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _ = if cli.debug {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).try_init()
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init()
    };

    let config_path = cli.config.clone().unwrap_or_else(Config::config_path);
    let mut config = if config_path.exists() {
        Config::load_from(&config_path)?
    } else {
        Config::default()
    };
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }

    match cli.command {
        Commands::Init { publisher } => init_node(config, &config_path, publisher),
        Commands::Keygen => keygen(),
        command => {
            let ledger = open_ledger(config)?;
            handle_command(&ledger, command)
        }
    }
}

fn open_ledger(config: Config) -> anyhow::Result<Ledger> {
    let ledger = Ledger::open(config)?;
    ledger.init()?;
    Ok(ledger)
}

fn format_coins(droplets: u64) -> String {
    format!("{}.{:06}", droplets / DROPLETS_PER_COIN, droplets % DROPLETS_PER_COIN)
}

fn init_node(mut config: Config, config_path: &std::path::Path, publisher: bool) -> anyhow::Result<()> {
    println!("🌟 Initializing ledger in {}", config.storage.data_dir.display());

    if publisher && config.chain.publisher_secret_key.is_none() {
        config = config.with_new_publisher()?;
        config.save_to(config_path)?;
        println!("🔑 Generated publisher key, saved to {}", config_path.display());
        println!("📬 Genesis address: {}", config.chain.genesis_address);
    }

    let ledger = open_ledger(config)?;
    let genesis = ledger
        .get_block_by_seq(0)?
        .ok_or_else(|| LedgerError::BlockNotFound("0".to_string()))?;

    println!("✅ Ledger initialized");
    println!("📦 Genesis block hash: {}", genesis.hash());
    println!("✍️ Genesis signature: {}", genesis.sig.to_hex());
    Ok(())
}

fn keygen() -> anyhow::Result<()> {
    let keypair = KeyPair::new()?;
    println!("🔑 Secret key: {}", keypair.private_key.to_hex());
    println!("🔓 Public key: {}", keypair.public_key.to_hex());
    println!("📬 Address:    {}", keypair.address());
    Ok(())
}

fn print_block(block: &SignedBlock, verbose: bool) {
    let header = block.header();
    println!("📦 Block {}", header.seq);
    println!("Hash: {}", block.hash());
    println!("Previous hash: {}", header.prev_hash);
    println!("Time: {}", header.time);
    println!("Fee: {}", header.fee);
    println!("Transactions: {}", block.block.transaction_count());

    if verbose {
        for (i, tx) in block.block.transactions().iter().enumerate() {
            println!("  Transaction {}: {}", i, tx.hash());
        }
    }
}

fn parse_hash(s: &str) -> anyhow::Result<Hash256> {
    Hash256::from_hex(s).map_err(|e| LedgerError::InvalidInput(format!("invalid hash {}: {}", s, e)).into())
}

fn handle_command(ledger: &Ledger, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Status => {
            let meta = ledger.get_blockchain_metadata()?;
            println!("⛓️  Ledger status:");
            println!("Head: {} ({})", meta.head.seq, meta.head.hash());
            println!("Head time: {}", meta.head.time);
            println!("Unspent outputs: {}", meta.unspents);
            println!("Unconfirmed transactions: {}", meta.unconfirmed);
            println!("Confirmed transactions: {}", ledger.transactions_num()?);
            println!("Addresses with funds: {}", ledger.address_count()?);
        }

        Commands::Block { identifier, verbose } => {
            let block = match identifier.parse::<u64>() {
                Ok(seq) => ledger.get_block_by_seq(seq)?,
                Err(_) => ledger.get_block_by_hash(&parse_hash(&identifier)?)?,
            };

            match block {
                Some(block) => print_block(&block, verbose),
                None => println!("❌ Block not found"),
            }
        }

        Commands::Blocks { last } => {
            println!("📦 Recent blocks:");
            for block in ledger.get_last_blocks(last)? {
                println!(
                    "  {}: {} (txs: {}, fee: {})",
                    block.seq(),
                    block.hash(),
                    block.block.transaction_count(),
                    block.header().fee
                );
            }
        }

        Commands::Tx { hash } => match ledger.get_transaction(&parse_hash(&hash)?)? {
            Some(found) => {
                println!("💰 Transaction {}", hash);
                match found.status {
                    TransactionStatus::Unconfirmed => println!("Status: unconfirmed"),
                    TransactionStatus::Confirmed { block_seq, confirmations } => {
                        println!("Status: confirmed in block {} ({} confirmations)", block_seq, confirmations)
                    }
                }
                println!("Time: {}", found.time);
                for input in &found.transaction.inputs {
                    println!("  in:  {}", input);
                }
                for output in &found.transaction.outputs {
                    println!(
                        "  out: {} {} coins, {} hours",
                        output.address,
                        format_coins(output.coins),
                        output.hours
                    );
                }
            }
            None => println!("❌ Transaction not found"),
        },

        Commands::Balance { addresses } => {
            let addresses = addresses
                .iter()
                .map(|a| a.parse::<Address>())
                .collect::<crate::Result<Vec<_>>>()?;
            let balances = ledger.get_balance_of_addresses(&addresses)?;

            let mut confirmed = Balance::default();
            let mut predicted = Balance::default();
            for (address, pair) in addresses.iter().zip(&balances) {
                println!("💰 {}", address);
                println!("  confirmed: {}", pair.confirmed);
                println!("  predicted: {}", pair.predicted);
                confirmed = confirmed.add(&pair.confirmed).map_err(LedgerError::from)?;
                predicted = predicted.add(&pair.predicted).map_err(LedgerError::from)?;
            }

            if balances.len() > 1 {
                println!("📊 Total");
                println!("  confirmed: {}", confirmed);
                println!("  predicted: {}", predicted);
            }
        }

        Commands::Pending => {
            let pending = ledger.get_all_unconfirmed_transactions()?;
            println!("🗂️ Unconfirmed pool: {} transactions", pending.len());
            for utx in pending {
                let marker = if utx.is_valid { "✅" } else { "⚠️" };
                println!("  {} {} (received {})", marker, utx.hash(), utx.received);
            }
        }

        Commands::CreateBlock => {
            if !ledger.config().chain.is_publisher {
                return Err(LedgerError::InvalidInput("only the publisher node creates blocks".to_string()).into());
            }
            let block = ledger.create_and_execute_block()?;
            println!("✅ Created block {} ({})", block.seq(), block.hash());
            println!("Transactions: {}", block.block.transaction_count());
        }

        Commands::Refresh => {
            let removed = ledger.refresh_unconfirmed()?;
            println!("🔄 Pool refreshed, {} transactions removed", removed.len());
            for hash in removed {
                println!("  🗑️ {}", hash);
            }
        }

        Commands::ReindexHistory => {
            ledger.reindex_history()?;
            println!("✅ History index rebuilt ({} transactions)", ledger.transactions_num()?);
        }

        Commands::Richlist { include_distribution, limit } => {
            println!("🏆 Richlist:");
            for (i, entry) in ledger.get_richlist(include_distribution)?.iter().take(limit).enumerate() {
                let lock = if entry.locked { " 🔒" } else { "" };
                println!("  {:>3}. {} {}{}", i + 1, entry.address, format_coins(entry.coins), lock);
            }
        }

        Commands::Init { .. } | Commands::Keygen => unreachable!("handled before the ledger is opened"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_global_flags() {
        let cli = Cli::parse_from(["ledgerd", "--debug", "--data-dir", "/tmp/ledger", "blocks", "--last", "3"]);
        assert!(cli.debug);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/ledger")));
        assert!(matches!(cli.command, Commands::Blocks { last: 3 }));
    }

    #[test]
    fn test_balance_requires_addresses() {
        assert!(Cli::try_parse_from(["ledgerd", "balance"]).is_err());
    }

    #[test]
    fn test_format_coins() {
        assert_eq!(format_coins(1_500_000), "1.500000");
        assert_eq!(format_coins(7), "0.000007");
    }
}
