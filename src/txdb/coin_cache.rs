use bitcoin::OutPoint;
use indexmap::IndexMap;
use schnellru::{ByLength, LruMap};

use crate::storage::kv_store::RawValue;

pub const DEFAULT_COIN_CACHE_CAPACITY: u32 = 10_000;

/// Bounded read-through cache over serialized credit bytes.
///
/// Two layers: a committed LRU and a pending overlay that participates in
/// the write batch. Every credit save pushes and every credit removal
/// unpushes within the same batch, so a rolled-back batch never leaks
/// stale reads.
pub struct CoinCache {
    committed: LruMap<OutPoint, RawValue, ByLength>,
    pending: IndexMap<OutPoint, Option<RawValue>>,
}

impl CoinCache {
    pub fn new(capacity: u32) -> Self {
        Self {
            committed: LruMap::new(ByLength::new(capacity)),
            pending: IndexMap::new(),
        }
    }

    /// Arms the overlay for a new batch.
    pub fn start(&mut self) {
        self.pending.clear();
    }

    /// Stages credit bytes written by the current batch.
    pub fn push(&mut self, outpoint: OutPoint, raw: RawValue) {
        self.pending.insert(outpoint, Some(raw));
    }

    /// Stages a credit removal; shadows the committed layer until commit.
    pub fn unpush(&mut self, outpoint: OutPoint) {
        self.pending.insert(outpoint, None);
    }

    /// Populates the committed layer from a store read.
    pub fn set(&mut self, outpoint: OutPoint, raw: RawValue) {
        self.committed.insert(outpoint, raw);
    }

    /// Three-way lookup: `Some(Some(_))` is a hit, `Some(None)` means the
    /// current batch removed the credit, `None` means the cache cannot
    /// answer and the store must be consulted.
    pub fn lookup(&mut self, outpoint: &OutPoint) -> Option<Option<RawValue>> {
        if let Some(staged) = self.pending.get(outpoint) {
            return Some(staged.clone());
        }

        self.committed.get(outpoint).map(|raw| Some(raw.clone()))
    }

    pub fn has(&mut self, outpoint: &OutPoint) -> bool {
        matches!(self.lookup(outpoint), Some(Some(_)))
    }

    /// Publishes the overlay into the committed layer.
    pub fn commit(&mut self) {
        for (outpoint, staged) in std::mem::take(&mut self.pending) {
            match staged {
                Some(raw) => {
                    self.committed.insert(outpoint, raw);
                }
                None => {
                    self.committed.remove(&outpoint);
                }
            }
        }
    }

    /// Discards the overlay with the rolled-back batch.
    pub fn drop_pending(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }
}
