use bitcoin::Txid;
use thiserror::Error;

/// Failure reported by the remote query server.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("server request failed: {0}")]
    RequestFailed(String),

    #[error("not known to the server")]
    NotFound,

    #[error("broadcast rejected: {0}")]
    Rejected(String),
}

/// Reason a serialized transaction blob was rejected by [`crate::store::TxStore::load`].
#[derive(Error, Debug)]
pub(crate) enum BlobError {
    #[error("blob is truncated")]
    Truncated,

    #[error("unknown magic {0:#010x}")]
    BadMagic(u32),

    #[error("unknown record tag")]
    BadRecordTag,

    #[error("unknown transaction state {0}")]
    BadState(u8),

    #[error("stored hash does not match transaction {0}")]
    HashMismatch(Txid),

    #[error("malformed transaction: {0}")]
    MalformedTransaction(#[from] bitcoin::consensus::encode::Error),
}
