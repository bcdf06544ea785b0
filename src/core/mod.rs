//! Chain data types and the ledger components built on them

pub mod block;
pub mod blockchain;
pub mod history;
pub mod transaction;
pub mod unconfirmed;
pub mod utxo;
pub mod uxout;

pub use block::{Block, BlockBody, BlockHeader, SignedBlock};
pub use blockchain::{Blockchain, ChainBackend};
pub use history::{HistoricTransaction, HistoricUxOut, HistoryBackend, HistoryIndex};
pub use transaction::{Transaction, TxOutput};
pub use unconfirmed::{InjectOutcome, PoolBackend, UnconfirmedPool, UnconfirmedTransaction};
pub use utxo::UtxoSet;
pub use uxout::{UxArray, UxBody, UxHead, UxOut};
