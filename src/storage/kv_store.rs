use std::ops::Range;

use crate::error::Error;

pub type RawKey = Vec<u8>;
pub type RawValue = Vec<u8>;

#[derive(Clone, Debug)]
pub enum WriteOp {
    Put { key: RawKey, value: RawValue },
    Delete { key: RawKey },
}

/// An ordered set of writes flushed atomically by [`KvStore::write`].
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<RawKey>, value: impl Into<RawValue>) {
        self.ops.push(WriteOp::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, key: impl Into<RawKey>) {
        self.ops.push(WriteOp::Delete { key: key.into() });
    }

    pub fn iter(&self) -> impl Iterator<Item = &WriteOp> {
        self.ops.iter()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Ordered key-value store consumed by the wallet database.
///
/// The wallet database stages all mutations in its own batch and flushes
/// them through [`KvStore::write`], which must be all-or-nothing: a partial
/// flush is a data-integrity bug. Point reads and scans always observe the
/// last committed state.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<RawValue>, Error>;

    fn has(&self, key: &[u8]) -> Result<bool, Error> {
        Ok(self.get(key)?.is_some())
    }

    /// Scan `range` in key order (reverse order when `reverse`), returning
    /// at most `limit` entries when `limit > 0`. An empty `range.end` means
    /// unbounded above.
    fn scan(
        &self,
        range: Range<RawKey>,
        reverse: bool,
        limit: usize,
    ) -> Result<Vec<(RawKey, RawValue)>, Error>;

    fn write(&self, batch: WriteBatch) -> Result<(), Error>;
}

pub(crate) fn in_range(key: &[u8], range: &Range<RawKey>) -> bool {
    key >= range.start.as_slice() && (range.end.is_empty() || key < range.end.as_slice())
}
