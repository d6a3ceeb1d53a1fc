use bitcoin::Txid;
use thiserror::Error;

use crate::storage::encdec::DecodingError;

/// Crate-wide error type.
///
/// Corrupted on-disk invariants (a missing undo coin, a credit the schema
/// says must exist) are *not* represented here: those abort via assertion,
/// since the store is presumed faulty and continuing would compound the
/// damage.
#[derive(Error, Debug)]
pub enum Error {
    #[error("decoding error: {0}")]
    Decoding(#[from] DecodingError),

    #[error("rocksdb error: {0}")]
    Rocks(#[from] rocksdb::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("transaction not found: {0}")]
    TxNotFound(Txid),

    #[error("transaction already confirmed: {0}")]
    AlreadyConfirmed(Txid),

    #[error("transaction not eligible: {0}")]
    NotEligible(Txid),

    #[error("write batch already open")]
    BatchOpen,

    #[error("no write batch open")]
    NoBatch,

    #[error("{0}")]
    Custom(String),
}

impl Error {
    pub fn storage(error: impl std::fmt::Display) -> Error {
        Error::Storage(format!("{error}"))
    }

    pub fn custom(error: impl std::fmt::Display) -> Error {
        Error::Custom(format!("{error}"))
    }
}
