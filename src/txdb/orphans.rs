use std::collections::HashMap;

use bitcoin::hashes::Hash;
use bitcoin::{OutPoint, PubkeyHash, ScriptBuf, Transaction, TxIn, Txid, WPubkeyHash};
use indexmap::IndexMap;
use tracing::warn;

use crate::txdb::records::BlockMeta;

pub const DEFAULT_MAX_ORPHANS: usize = 20;

/// A stashed transaction waiting on unknown prevouts (SPV ingest).
#[derive(Clone, Debug)]
pub struct OrphanTx {
    pub tx: Transaction,
    pub block: Option<BlockMeta>,
}

#[derive(Clone, Copy, Debug)]
struct Waiting {
    hash: Txid,
    input_index: u32,
}

/// In-memory table of unresolved inputs, SPV mode only.
///
/// Adjacency is keyed by prevout; a per-transaction counter tracks how many
/// of its inputs are still orphaned so a transaction is released exactly
/// when its last input resolves. The global entry count is capped: on
/// overflow the whole table is purged, which bounds what an attacker can
/// make the wallet hold.
pub struct OrphanTracker {
    max: usize,
    by_prevout: IndexMap<OutPoint, Vec<Waiting>>,
    txs: HashMap<Txid, OrphanTx>,
    unresolved: HashMap<Txid, usize>,
    total: usize,
}

impl OrphanTracker {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            by_prevout: IndexMap::new(),
            txs: HashMap::new(),
            unresolved: HashMap::new(),
            total: 0,
        }
    }

    pub fn contains(&self, hash: &Txid) -> bool {
        self.txs.contains_key(hash)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Stash a transaction whose listed inputs reference unknown prevouts.
    pub fn insert(
        &mut self,
        hash: Txid,
        tx: Transaction,
        block: Option<BlockMeta>,
        orphaned: Vec<(u32, OutPoint)>,
    ) {
        if self.txs.contains_key(&hash) {
            return;
        }

        let count = orphaned.len();

        for (input_index, prevout) in orphaned {
            debug_assert_eq!(tx.input[input_index as usize].previous_output, prevout);
            self.by_prevout
                .entry(prevout)
                .or_default()
                .push(Waiting { hash, input_index });
        }

        self.txs.insert(hash, OrphanTx { tx, block });
        self.unresolved.insert(hash, count);
        self.total += count;

        if self.total > self.max {
            warn!(
                total = self.total,
                max = self.max,
                "orphan input limit exceeded, purging orphan table"
            );
            self.purge();
        }
    }

    /// Called when `outpoint` becomes available: release every stashed
    /// transaction whose last unresolved input this was.
    pub fn resolve(&mut self, outpoint: OutPoint) -> Vec<OrphanTx> {
        let Some(waiting) = self.by_prevout.shift_remove(&outpoint) else {
            return Vec::new();
        };

        let mut ready = Vec::new();

        for entry in waiting {
            let orphan = self.txs.get(&entry.hash).expect("orphan tx for waiter");
            assert_eq!(
                orphan.tx.input[entry.input_index as usize].previous_output, outpoint,
                "orphan map entry does not match its key"
            );

            self.total -= 1;

            let remaining = self
                .unresolved
                .get_mut(&entry.hash)
                .expect("orphan counter for waiter");
            *remaining -= 1;

            if *remaining == 0 {
                self.unresolved.remove(&entry.hash);
                ready.push(self.txs.remove(&entry.hash).expect("orphan tx"));
            }
        }

        ready
    }

    pub fn purge(&mut self) {
        self.by_prevout.clear();
        self.txs.clear();
        self.unresolved.clear();
        self.total = 0;
    }
}

/// Guess the script pubkey an input is spending from its script-sig or
/// witness. Covers the key-path cases (P2PKH and P2WPKH) that SPV wallets
/// can recognize without the prevout in hand.
pub(crate) fn implied_script(input: &TxIn) -> Option<ScriptBuf> {
    if input.witness.len() == 2 {
        let pubkey = input.witness.last()?;
        if pubkey.len() == 33 {
            return Some(ScriptBuf::new_p2wpkh(&WPubkeyHash::hash(pubkey)));
        }
    }

    let mut last_push = None;
    for instruction in input.script_sig.instructions() {
        match instruction {
            Ok(bitcoin::script::Instruction::PushBytes(bytes)) => last_push = Some(bytes),
            _ => return None,
        }
    }

    let pubkey = last_push?.as_bytes();
    if pubkey.len() == 33 || pubkey.len() == 65 {
        return Some(ScriptBuf::new_p2pkh(&PubkeyHash::hash(pubkey)));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;
    use bitcoin::{Sequence, Witness};

    fn spending_tx(prevouts: &[OutPoint]) -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: prevouts
                .iter()
                .map(|prevout| TxIn {
                    previous_output: *prevout,
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::MAX,
                    witness: Witness::new(),
                })
                .collect(),
            output: vec![],
        }
    }

    fn outpoint(n: u8, vout: u32) -> OutPoint {
        OutPoint {
            txid: Txid::from_byte_array([n; 32]),
            vout,
        }
    }

    #[test]
    fn releases_tx_when_last_input_resolves() {
        let mut orphans = OrphanTracker::new(20);
        let prevouts = [outpoint(1, 0), outpoint(2, 0)];
        let tx = spending_tx(&prevouts);
        let hash = tx.compute_txid();

        orphans.insert(
            hash,
            tx,
            None,
            vec![(0, prevouts[0]), (1, prevouts[1])],
        );
        assert_eq!(orphans.total(), 2);

        assert!(orphans.resolve(prevouts[0]).is_empty());
        let ready = orphans.resolve(prevouts[1]);
        assert_eq!(ready.len(), 1);
        assert_eq!(orphans.total(), 0);
        assert!(!orphans.contains(&hash));
    }

    #[test]
    fn purges_on_overflow() {
        let mut orphans = OrphanTracker::new(3);

        for n in 0..4u8 {
            let prevout = outpoint(n, 0);
            let tx = spending_tx(&[prevout]);
            orphans.insert(tx.compute_txid(), tx, None, vec![(0, prevout)]);
        }

        assert_eq!(orphans.total(), 0);
    }
}
