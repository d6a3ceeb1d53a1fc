//! Per-wallet Bitcoin transaction database.
//!
//! Ingests transactions (confirmed or mempool), tracks which outputs belong
//! to the wallet, maintains spendable/spent coin state across
//! reorganizations, resolves double-spend and replace-by-fee conflicts,
//! supports SPV-mode orphan-input resolution, and answers historical
//! queries — all over a pluggable ordered key-value store.

pub use storage::encdec::{DecodingError, DecodingResult};

pub mod error;
pub mod storage;
pub mod txdb;

pub use error::Error;
pub use txdb::batch::WalletEvent;
pub use txdb::details::{Details, DetailsMember};
pub use txdb::queries::RangeQuery;
pub use txdb::records::{Balance, BlockMeta, BlockRecord, Coin, Credit, TxRecord, TxdbState};
pub use txdb::resolver::{Path, PathResolver};
pub use txdb::{Txdb, TxdbOptions};
