use std::collections::HashSet;

use bitcoin::{Address, Amount, OutPoint};
use serde::{Deserialize, Serialize};

/// The addresses the embedding wallet controls or watches.
pub type AddressSet = HashSet<Address>;

/// Where a transaction sits in its lifecycle.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Created locally but not yet acknowledged by the server.
    Unsent,
    /// The server has seen the transaction, but it is not in a block.
    Unconfirmed,
    /// The transaction is in a block.
    Confirmed,
}

impl TxState {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            TxState::Unsent => 0,
            TxState::Unconfirmed => 1,
            TxState::Confirmed => 2,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(TxState::Unsent),
            1 => Some(TxState::Unconfirmed),
            2 => Some(TxState::Confirmed),
            _ => None,
        }
    }
}

/// One row of a server-side address history.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// The output paying the queried address.
    pub output: OutPoint,
    /// The input spending that output, if the server has seen one.
    pub spend: Option<OutPoint>,
    /// Value of the output.
    pub value: Amount,
    /// Block height of the output, or 0 while unconfirmed.
    pub height: u64,
}

/// An unspent output and its value.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputInfo {
    pub outpoint: OutPoint,
    pub value: Amount,
}
