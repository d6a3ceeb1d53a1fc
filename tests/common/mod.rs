#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, BlockHash, OutPoint, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness,
};

use coinledger::storage::encdec::Decode;
use coinledger::storage::kv_store::KvStore;
use coinledger::storage::memory::MemoryStore;
use coinledger::storage::table::{WalletTable, WALLET_PREFIX, WALLET_PREFIX_LEN};
use coinledger::txdb::records::UNCONFIRMED;
use coinledger::txdb::tables::{CreditsKV, SpentMarkersKV, TxsKV, UndoCoinsKV};
use coinledger::{BlockMeta, Credit, Error, Path, PathResolver, TxRecord, Txdb, TxdbOptions};

pub const COIN: u64 = 100_000_000;

/// Script-to-path map standing in for the key/address layer.
#[derive(Default)]
pub struct TestResolver {
    paths: Mutex<HashMap<ScriptBuf, Path>>,
}

impl TestResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn watch(&self, script: &ScriptBuf, account: u32, index: u32) {
        self.paths.lock().unwrap().insert(
            script.clone(),
            Path {
                account,
                branch: 0,
                index,
            },
        );
    }
}

impl PathResolver for TestResolver {
    fn path(&self, script: &Script) -> Result<Option<Path>, Error> {
        Ok(self.paths.lock().unwrap().get(script).copied())
    }
}

pub fn open_wallet(resolver: Arc<TestResolver>) -> Txdb<MemoryStore> {
    let options = TxdbOptions {
        network: bitcoin::Network::Regtest,
        ..Default::default()
    };

    Txdb::open(MemoryStore::new(), 1, "primary", resolver, options).expect("open txdb")
}

pub fn open_spv_wallet(resolver: Arc<TestResolver>) -> Txdb<MemoryStore> {
    let options = TxdbOptions {
        network: bitcoin::Network::Regtest,
        resolution: true,
        verify: true,
        ..Default::default()
    };

    Txdb::open(MemoryStore::new(), 1, "primary", resolver, options).expect("open txdb")
}

static FOREIGN_SEED: AtomicU8 = AtomicU8::new(1);

/// A unique prevout outside the wallet, so funding txs never collide.
pub fn foreign_prevout() -> OutPoint {
    let seed = FOREIGN_SEED.fetch_add(1, Ordering::Relaxed);
    OutPoint {
        txid: Txid::from_byte_array([seed; 32]),
        vout: 0,
    }
}

pub fn script(n: u8) -> ScriptBuf {
    // OP_RETURN-free unique scripts; addresses are irrelevant here
    ScriptBuf::from_bytes(vec![0x51, 0x75, n])
}

pub fn block(height: u32) -> BlockMeta {
    block_at(height, 0)
}

/// Block handle for a transaction sitting at `index` within the block.
pub fn block_at(height: u32, index: u32) -> BlockMeta {
    BlockMeta {
        hash: BlockHash::from_byte_array([height as u8 ^ 0x5a; 32]),
        height,
        time: 1_600_000_000 + height,
        index,
    }
}

pub fn input(prevout: OutPoint, sequence: Sequence) -> TxIn {
    TxIn {
        previous_output: prevout,
        script_sig: ScriptBuf::new(),
        sequence,
        witness: Witness::new(),
    }
}

pub fn tx_with(inputs: Vec<TxIn>, outputs: Vec<(ScriptBuf, u64)>) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: inputs,
        output: outputs
            .into_iter()
            .map(|(script_pubkey, value)| TxOut {
                value: Amount::from_sat(value),
                script_pubkey,
            })
            .collect(),
    }
}

/// A transaction funding `script` with `value` from outside the wallet.
pub fn fund_tx(script: &ScriptBuf, value: u64) -> Transaction {
    tx_with(
        vec![input(foreign_prevout(), Sequence::MAX)],
        vec![(script.clone(), value)],
    )
}

/// A transaction spending `prevout` into the given outputs.
pub fn spend_tx(prevout: OutPoint, outputs: Vec<(ScriptBuf, u64)>) -> Transaction {
    tx_with(vec![input(prevout, Sequence::MAX)], outputs)
}

pub fn outpoint(tx: &Transaction, vout: u32) -> OutPoint {
    OutPoint {
        txid: tx.compute_txid(),
        vout,
    }
}

fn tag_of(key: &[u8], wid: u32) -> Option<u8> {
    if key.len() < WALLET_PREFIX_LEN || key[0] != WALLET_PREFIX {
        return None;
    }
    if key[1..5] != wid.to_be_bytes() {
        return None;
    }
    Some(key[5])
}

/// Walk the committed schema and assert every universal invariant.
pub fn audit(txdb: &Txdb<MemoryStore>) {
    let wid = txdb.wid();
    let state = *txdb.state();
    let dump = txdb.store().dump();

    let mut credits: HashMap<Vec<u8>, Credit> = HashMap::new();
    let mut account_credits: HashSet<Vec<u8>> = HashSet::new();
    let mut undo: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    let mut spent: HashMap<Vec<u8>, Vec<u8>> = HashMap::new();
    let mut txs: HashMap<[u8; 32], TxRecord> = HashMap::new();
    let mut pending: HashSet<[u8; 32]> = HashSet::new();
    let mut heights: HashSet<[u8; 32]> = HashSet::new();
    let mut outpoint_maps: HashSet<Vec<u8>> = HashSet::new();

    for (key, value) in &dump {
        if key.first() == Some(&b'o') {
            outpoint_maps.insert(key[1..].to_vec());
            continue;
        }

        let Some(tag) = tag_of(key, wid) else { continue };
        let suffix = key[WALLET_PREFIX_LEN..].to_vec();

        match tag {
            b'c' => {
                credits.insert(suffix, Credit::decode_all(value).expect("credit"));
            }
            b'C' => {
                // account ‖ hash ‖ index
                account_credits.insert(suffix[4..].to_vec());
            }
            b'd' => undo.push((suffix, value.clone())),
            b's' => {
                spent.insert(suffix, value.clone());
            }
            b't' => {
                let hash: [u8; 32] = suffix.as_slice().try_into().unwrap();
                txs.insert(hash, TxRecord::decode_all(value).expect("tx record"));
            }
            b'p' => {
                pending.insert(suffix.as_slice().try_into().unwrap());
            }
            b'h' => {
                heights.insert(suffix[4..].try_into().unwrap());
            }
            _ => {}
        }
    }

    // Balance sums against the committed counters.
    let confirmed: i64 = credits
        .values()
        .filter(|credit| credit.coin.height != UNCONFIRMED)
        .map(|credit| credit.coin.value)
        .sum();
    let unconfirmed: i64 = credits
        .values()
        .filter(|credit| !credit.spent)
        .map(|credit| credit.coin.value)
        .sum();
    let coins = credits.values().filter(|credit| !credit.spent).count() as u64;

    assert_eq!(state.confirmed, confirmed as u64, "confirmed sum");
    assert_eq!(state.unconfirmed, unconfirmed as u64, "unconfirmed sum");
    assert_eq!(state.coin, coins, "coin count");
    assert_eq!(state.tx, txs.len() as u64, "tx count");

    // Every undo coin pairs with a spent marker whose spender is indexed.
    for (spender_key, _) in &undo {
        let spender_hash: [u8; 32] = spender_key[..32].try_into().unwrap();
        assert!(txs.contains_key(&spender_hash), "undo coin without spender");
        assert!(
            spent.values().any(|marker| marker[..32] == spender_hash),
            "undo coin without spent marker"
        );
    }

    // Exactly one of pending flag / height key per transaction.
    for (hash, record) in &txs {
        let is_pending = pending.contains(hash);
        let is_confirmed = heights.contains(hash);
        assert!(
            is_pending ^ is_confirmed,
            "tx must be either pending or height-indexed"
        );
        assert_eq!(record.height == UNCONFIRMED, is_pending);
    }

    // Credit index agreement, and the directory names this wallet.
    for key in credits.keys() {
        assert!(
            account_credits.contains(key),
            "credit without account index"
        );
        assert!(outpoint_maps.contains(key), "credit without outpoint map");
    }
    for key in &account_credits {
        assert!(credits.contains_key(key), "account index without credit");
    }
}

/// Dump with first-seen times masked out, for comparing wallets whose
/// ingest clocks may differ.
pub fn dump_without_times(txdb: &Txdb<MemoryStore>) -> Vec<(Vec<u8>, Vec<u8>)> {
    let wid = txdb.wid();

    txdb.store()
        .dump()
        .into_iter()
        .filter(|(key, _)| !matches!(tag_of(key, wid), Some(b'm') | Some(b'M')))
        .map(|(key, mut value)| {
            if tag_of(&key, wid) == Some(b't') {
                let record = TxRecord::decode_all(&value).expect("tx record");
                let tx_len = bitcoin::consensus::serialize(&record.tx).len();
                value[tx_len..tx_len + 4].fill(0);
            }
            (key, value)
        })
        .collect()
}

pub fn assert_key_present<T: WalletTable>(txdb: &Txdb<MemoryStore>, key: &T::Key, expect: bool) {
    let present = txdb
        .store()
        .get(&T::encode_key(txdb.wid(), key))
        .expect("store get")
        .is_some();
    assert_eq!(present, expect);
}

pub type Wallet = Txdb<MemoryStore>;

pub fn credit_of(txdb: &mut Wallet, outpoint: &OutPoint) -> Option<Credit> {
    txdb.get_credit(outpoint).expect("get credit")
}

pub fn undo_key(spender: &Transaction, index: u32) -> coinledger::txdb::tables::OutpointKey {
    coinledger::txdb::tables::OutpointKey {
        hash: spender.compute_txid().to_byte_array(),
        index,
    }
}

pub fn marker_key(prevout: OutPoint) -> coinledger::txdb::tables::OutpointKey {
    coinledger::txdb::tables::OutpointKey::from(prevout)
}

pub fn assert_spent_marker(txdb: &Wallet, prevout: OutPoint, expect: bool) {
    assert_key_present::<SpentMarkersKV>(txdb, &marker_key(prevout), expect);
}

pub fn assert_undo_coin(txdb: &Wallet, spender: &Transaction, index: u32, expect: bool) {
    assert_key_present::<UndoCoinsKV>(txdb, &undo_key(spender, index), expect);
}

pub fn assert_credit_key(txdb: &Wallet, outpoint: OutPoint, expect: bool) {
    assert_key_present::<CreditsKV>(txdb, &marker_key(outpoint), expect);
}

pub fn assert_tx_key(txdb: &Wallet, hash: &Txid, expect: bool) {
    assert_key_present::<TxsKV>(txdb, &hash.to_byte_array(), expect);
}
