use indexmap::IndexMap;

use crate::storage::encdec::Encode;
use crate::storage::kv_store::{RawKey, RawValue, WriteBatch};
use crate::txdb::details::Details;
use crate::txdb::records::{Balance, TxRecord, TxdbState};

/// Events published after a successful commit, in buffer order.
#[derive(Clone, Debug)]
pub enum WalletEvent {
    Tx { record: TxRecord, details: Details },
    Confirmed { record: TxRecord, details: Details },
    Unconfirmed { record: TxRecord, details: Details },
    RemoveTx { record: TxRecord, details: Details },
    Conflict { record: TxRecord, details: Details },
    Balance(Balance),
}

#[derive(Clone, Debug)]
pub(crate) enum StorageAction {
    Set(RawValue),
    Delete,
}

/// Draft of the wallet counters mutated during a batch. Signed so that
/// intermediate arithmetic may transiently dip below zero; only the
/// committed form is observable and that one must not.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PendingState {
    pub tx: i64,
    pub coin: i64,
    pub unconfirmed: i64,
    pub confirmed: i64,
}

impl PendingState {
    pub fn from_state(state: &TxdbState) -> Self {
        Self {
            tx: state.tx as i64,
            coin: state.coin as i64,
            unconfirmed: state.unconfirmed as i64,
            confirmed: state.confirmed as i64,
        }
    }

    pub fn matches(&self, state: &TxdbState) -> bool {
        self.tx == state.tx as i64
            && self.coin == state.coin as i64
            && self.unconfirmed == state.unconfirmed as i64
            && self.confirmed == state.confirmed as i64
    }

    /// Finalize into the committed form. Negative counters here mean the
    /// pipeline violated its own arithmetic, so abort.
    pub fn commit(&self) -> TxdbState {
        assert!(
            self.tx >= 0 && self.coin >= 0 && self.unconfirmed >= 0 && self.confirmed >= 0,
            "wallet state went negative: {self:?}"
        );

        TxdbState {
            tx: self.tx as u64,
            coin: self.coin as u64,
            unconfirmed: self.unconfirmed as u64,
            confirmed: self.confirmed as u64,
        }
    }
}

/// One write batch: staged ops keyed for last-write-wins, the pending
/// counters, and the events to publish if the flush succeeds. Op order is
/// preserved so the flush is deterministic.
pub(crate) struct Batch {
    ops: IndexMap<RawKey, StorageAction>,
    pub pending: PendingState,
    pub events: Vec<WalletEvent>,
}

impl Batch {
    pub fn new(state: &TxdbState) -> Self {
        Self {
            ops: IndexMap::new(),
            pending: PendingState::from_state(state),
            events: Vec::new(),
        }
    }

    pub fn put(&mut self, key: RawKey, value: RawValue) {
        self.ops.insert(key, StorageAction::Set(value));
    }

    pub fn del(&mut self, key: RawKey) {
        self.ops.insert(key, StorageAction::Delete);
    }

    /// Un-stage everything; the batch stays open.
    pub fn clear(&mut self, state: &TxdbState) {
        self.ops.clear();
        self.events.clear();
        self.pending = PendingState::from_state(state);
    }

    pub fn is_noop(&self, state: &TxdbState) -> bool {
        self.ops.is_empty() && self.events.is_empty() && self.pending.matches(state)
    }

    /// Materialize the flushable batch, appending the state record last.
    pub fn into_write_batch(
        self,
        state_key: RawKey,
        state: &TxdbState,
    ) -> (WriteBatch, Vec<WalletEvent>) {
        let mut wb = WriteBatch::new();

        for (key, action) in self.ops {
            match action {
                StorageAction::Set(value) => wb.put(key, value),
                StorageAction::Delete => wb.delete(key),
            }
        }

        wb.put(state_key, state.encode());

        (wb, self.events)
    }
}
