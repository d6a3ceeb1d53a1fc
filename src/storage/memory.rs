use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::RwLock;

use crate::error::Error;

use super::kv_store::{in_range, KvStore, RawKey, RawValue, WriteBatch, WriteOp};

/// In-memory store backed by a `BTreeMap`, used by ephemeral wallets and
/// the test suite.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<BTreeMap<RawKey, RawValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every key-value pair, in key order.
    pub fn dump(&self) -> Vec<(RawKey, RawValue)> {
        let guard = self.inner.read().expect("memory store lock");
        guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<RawValue>, Error> {
        let guard = self.inner.read().expect("memory store lock");
        Ok(guard.get(key).cloned())
    }

    fn scan(
        &self,
        range: Range<RawKey>,
        reverse: bool,
        limit: usize,
    ) -> Result<Vec<(RawKey, RawValue)>, Error> {
        let guard = self.inner.read().expect("memory store lock");

        let mut out = Vec::new();
        let entries = guard
            .range(range.start.clone()..)
            .take_while(|(k, _)| in_range(k, &range));

        if reverse {
            let mut all: Vec<_> = entries.map(|(k, v)| (k.clone(), v.clone())).collect();
            all.reverse();
            all.truncate(if limit > 0 { limit } else { all.len() });
            return Ok(all);
        }

        for (key, value) in entries {
            out.push((key.clone(), value.clone()));
            if limit > 0 && out.len() == limit {
                break;
            }
        }

        Ok(out)
    }

    fn write(&self, batch: WriteBatch) -> Result<(), Error> {
        let mut guard = self.inner.write().expect("memory store lock");
        for op in batch.iter() {
            match op {
                WriteOp::Put { key, value } => {
                    guard.insert(key.clone(), value.clone());
                }
                WriteOp::Delete { key } => {
                    guard.remove(key);
                }
            }
        }
        Ok(())
    }
}
