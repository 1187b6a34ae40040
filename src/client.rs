use bitcoin::{Address, Transaction, Txid};
use mockall::automock;

use crate::errors::ClientError;
use crate::types::HistoryEntry;

/// Request surface of the remote full-node query service.
///
/// Implementations wrap whatever wire protocol the server speaks; the updater
/// only sees these calls. Each method corresponds to one request/response
/// pair, and the `Err` arm is the server's error completion.
#[automock]
pub trait ChainClientApi {
    /// Height of the best chain tip known to the server.
    fn fetch_last_height(&self) -> Result<u64, ClientError>;

    /// A transaction the server has indexed in a block.
    ///
    /// # Returns
    /// - `Ok(tx)`: the transaction body
    /// - `Err`: the server does not have it indexed (it may still be in the
    ///   mempool, see [`Self::fetch_unconfirmed_transaction`])
    fn fetch_transaction(&self, txid: &Txid) -> Result<Transaction, ClientError>;

    /// A transaction from the server's mempool.
    fn fetch_unconfirmed_transaction(&self, txid: &Txid) -> Result<Transaction, ClientError>;

    /// The `(block_height, index_in_block)` of a confirmed transaction.
    ///
    /// # Returns
    /// - `Ok((height, index))`: the transaction is in a block
    /// - `Err`: the server has no index entry, meaning the transaction is
    ///   unconfirmed as far as the server knows
    fn fetch_transaction_index(&self, txid: &Txid) -> Result<(u64, u32), ClientError>;

    /// Submit a locally created transaction to the network.
    fn broadcast_transaction(&self, tx: &Transaction) -> Result<(), ClientError>;

    /// All outputs paying the address, with their spends where known.
    fn fetch_history(&self, address: &Address) -> Result<Vec<HistoryEntry>, ClientError>;
}
