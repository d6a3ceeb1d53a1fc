use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Options, ReadOptions, DB};
use tracing::info;

use crate::error::Error;

use super::kv_store::{KvStore, RawKey, RawValue, WriteBatch, WriteOp};

static WALLET_CF_NAME: &str = "wallet";

/// RocksDB-backed store. All wallet data lives in a dedicated column
/// family so the database can be shared with other node subsystems.
pub struct RocksStore {
    db: Arc<DB>,
}

impl RocksStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        info!("opening wallet db at {:?}", path.as_ref());

        let mut db_opts = Options::default();
        db_opts.create_missing_column_families(true);
        db_opts.create_if_missing(true);

        let cfs = vec![ColumnFamilyDescriptor::new(
            WALLET_CF_NAME,
            Options::default(),
        )];

        let db = DB::open_cf_descriptors(&db_opts, path, cfs)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn cf_handle(&self) -> &ColumnFamily {
        self.db.cf_handle(WALLET_CF_NAME).expect("cf missing")
    }
}

impl KvStore for RocksStore {
    fn get(&self, key: &[u8]) -> Result<Option<RawValue>, Error> {
        Ok(self.db.get_cf(self.cf_handle(), key)?)
    }

    fn scan(
        &self,
        range: Range<RawKey>,
        reverse: bool,
        limit: usize,
    ) -> Result<Vec<(RawKey, RawValue)>, Error> {
        let mut read_opts = ReadOptions::default();
        read_opts.set_iterate_lower_bound(range.start.clone());
        if !range.end.is_empty() {
            read_opts.set_iterate_upper_bound(range.end.clone());
        }

        let mode = if reverse {
            rocksdb::IteratorMode::End
        } else {
            rocksdb::IteratorMode::Start
        };

        let iter = self.db.iterator_cf_opt(self.cf_handle(), read_opts, mode);

        let mut out = Vec::new();
        for entry in iter {
            let (key, value) = entry?;
            out.push((key.to_vec(), value.to_vec()));
            if limit > 0 && out.len() == limit {
                break;
            }
        }

        Ok(out)
    }

    fn write(&self, batch: WriteBatch) -> Result<(), Error> {
        let mut wb = rocksdb::WriteBatch::default();
        let cf = self.cf_handle();

        for op in batch.iter() {
            match op {
                WriteOp::Put { key, value } => wb.put_cf(cf, key, value),
                WriteOp::Delete { key } => wb.delete_cf(cf, key),
            }
        }

        self.db.write(wb)?;

        Ok(())
    }
}
