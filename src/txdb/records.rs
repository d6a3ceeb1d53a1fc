use bitcoin::consensus::encode::deserialize_partial;
use bitcoin::consensus::serialize;
use bitcoin::hashes::Hash;
use bitcoin::{Amount, BlockHash, OutPoint, ScriptBuf, Transaction, TxOut, Txid};

use crate::storage::encdec::decode::{
    malformed_input, read_bytes, read_i32_le, read_i64_le, read_u32_le, read_u64_le,
};
use crate::storage::encdec::{Decode, DecodingResult, Encode};

/// Height value marking a transaction or coin as unconfirmed.
pub const UNCONFIRMED: i32 = -1;

/// Handle for the block a transaction was mined in, carrying the
/// transaction's position within that block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockMeta {
    pub hash: BlockHash,
    pub height: u32,
    pub time: u32,
    pub index: u32,
}

/// A spendable output materialized from a transaction.
///
/// `height` is the height of the block that produced it, [`UNCONFIRMED`]
/// while the producing transaction sits in the mempool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Coin {
    pub value: i64,
    pub script: ScriptBuf,
    pub height: i32,
    pub coinbase: bool,
}

impl Coin {
    pub fn from_output(output: &TxOut, height: i32, coinbase: bool) -> Self {
        Self {
            value: output.value.to_sat() as i64,
            script: output.script_pubkey.clone(),
            height,
            coinbase,
        }
    }

    pub fn to_output(&self) -> TxOut {
        TxOut {
            value: Amount::from_sat(self.value as u64),
            script_pubkey: self.script.clone(),
        }
    }
}

impl Encode for Coin {
    fn encode(&self) -> Vec<u8> {
        let script = self.script.as_bytes();
        let mut out = Vec::with_capacity(13 + 4 + script.len());
        out.extend_from_slice(&self.value.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());
        out.push(self.coinbase as u8);
        out.extend_from_slice(&(script.len() as u32).to_le_bytes());
        out.extend_from_slice(script);
        out
    }
}

impl Decode for Coin {
    fn decode(bytes: &[u8]) -> DecodingResult<Self> {
        let (value, bytes) = read_i64_le(bytes)?;
        let (height, bytes) = read_i32_le(bytes)?;
        let (coinbase, bytes) = u8::decode(bytes)?;
        let (script_len, bytes) = read_u32_le(bytes)?;
        let (script, bytes) = read_bytes(bytes, script_len as usize)?;

        Ok((
            Self {
                value,
                script: ScriptBuf::from_bytes(script),
                height,
                coinbase: coinbase != 0,
            },
            bytes,
        ))
    }
}

/// A wallet-owned coin plus the mempool-spent flag.
///
/// `spent` means a mempool transaction spending the coin has been indexed:
/// the coin still counts toward the confirmed balance but is excluded from
/// spendable-coin enumeration. Once the spender confirms the credit is
/// deleted outright.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credit {
    pub coin: Coin,
    pub spent: bool,
}

impl Credit {
    pub fn from_coin(coin: Coin) -> Self {
        Self { coin, spent: false }
    }
}

impl Encode for Credit {
    fn encode(&self) -> Vec<u8> {
        let mut out = self.coin.encode();
        out.push(self.spent as u8);
        out
    }
}

impl Decode for Credit {
    fn decode(bytes: &[u8]) -> DecodingResult<Self> {
        let (coin, bytes) = Coin::decode(bytes)?;
        let (spent, bytes) = u8::decode(bytes)?;

        Ok((
            Self {
                coin,
                spent: spent != 0,
            },
            bytes,
        ))
    }
}

// Value-side outpoint codec: txid in its natural little-endian byte order
// followed by the output index, u32 LE. Key-side outpoints use a big-endian
// index (see tables).
impl Encode for OutPoint {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(36);
        out.extend_from_slice(&self.txid.to_byte_array());
        out.extend_from_slice(&self.vout.to_le_bytes());
        out
    }
}

impl Decode for OutPoint {
    fn decode(bytes: &[u8]) -> DecodingResult<Self> {
        let (hash, bytes) = <[u8; 32]>::decode(bytes)?;
        let (vout, bytes) = read_u32_le(bytes)?;

        Ok((
            OutPoint {
                txid: Txid::from_byte_array(hash),
                vout,
            },
            bytes,
        ))
    }
}

/// Extended transaction record: the canonical transaction bytes plus the
/// wallet-local metadata appended after them.
///
/// `ps` is the wallet-local Unix timestamp of first sight and is never
/// mutated after ingest; the block fields change on confirm/unconfirm.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxRecord {
    pub tx: Transaction,
    pub hash: Txid,
    pub ps: u32,
    pub height: i32,
    pub block: Option<BlockHash>,
    pub time: u32,
    pub index: i32,
}

impl TxRecord {
    pub fn from_tx(tx: Transaction, ps: u32) -> Self {
        let hash = tx.compute_txid();
        Self {
            tx,
            hash,
            ps,
            height: UNCONFIRMED,
            block: None,
            time: 0,
            index: UNCONFIRMED,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.height != UNCONFIRMED
    }

    pub fn set_block(&mut self, block: &BlockMeta) {
        self.height = block.height as i32;
        self.block = Some(block.hash);
        self.time = block.time;
        self.index = block.index as i32;
    }

    pub fn unset_block(&mut self) {
        self.height = UNCONFIRMED;
        self.block = None;
        self.time = 0;
        self.index = UNCONFIRMED;
    }
}

impl Encode for TxRecord {
    fn encode(&self) -> Vec<u8> {
        let mut out = serialize(&self.tx);
        out.extend_from_slice(&self.ps.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());

        if let Some(block) = self.block {
            out.extend_from_slice(&block.to_byte_array());
            out.extend_from_slice(&self.time.to_le_bytes());
            out.extend_from_slice(&(self.index as u32).to_le_bytes());
        }

        out
    }
}

impl Decode for TxRecord {
    fn decode(bytes: &[u8]) -> DecodingResult<Self> {
        let (tx, consumed) = deserialize_partial::<Transaction>(bytes)
            .map_err(|e| malformed_input(format!("invalid transaction: {e}"), bytes))?;
        let bytes = &bytes[consumed..];

        let (ps, bytes) = read_u32_le(bytes)?;
        let (height, bytes) = read_i32_le(bytes)?;

        let hash = tx.compute_txid();

        if height == UNCONFIRMED {
            return Ok((
                Self {
                    tx,
                    hash,
                    ps,
                    height,
                    block: None,
                    time: 0,
                    index: UNCONFIRMED,
                },
                bytes,
            ));
        }

        let (block, bytes) = <[u8; 32]>::decode(bytes)?;
        let (time, bytes) = read_u32_le(bytes)?;
        let (index, bytes) = read_u32_le(bytes)?;

        Ok((
            Self {
                tx,
                hash,
                ps,
                height,
                block: Some(BlockHash::from_byte_array(block)),
                time,
                index: index as i32,
            },
            bytes,
        ))
    }
}

/// Wallet-local record of a block with at least one confirmed transaction.
/// Transaction hashes are kept in the order they were indexed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockRecord {
    pub hash: BlockHash,
    pub height: u32,
    pub time: u32,
    pub txs: Vec<Txid>,
}

impl BlockRecord {
    pub fn from_meta(block: &BlockMeta) -> Self {
        Self {
            hash: block.hash,
            height: block.height,
            time: block.time,
            txs: Vec::new(),
        }
    }

    /// Returns false if the hash was already recorded.
    pub fn add(&mut self, hash: Txid) -> bool {
        if self.txs.contains(&hash) {
            return false;
        }
        self.txs.push(hash);
        true
    }

    pub fn remove(&mut self, hash: &Txid) -> bool {
        match self.txs.iter().position(|h| h == hash) {
            Some(pos) => {
                self.txs.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }
}

impl Encode for BlockRecord {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(44 + self.txs.len() * 32);
        out.extend_from_slice(&self.hash.to_byte_array());
        out.extend_from_slice(&self.height.to_le_bytes());
        out.extend_from_slice(&self.time.to_le_bytes());
        out.extend_from_slice(&(self.txs.len() as u32).to_le_bytes());
        for tx in &self.txs {
            out.extend_from_slice(&tx.to_byte_array());
        }
        out
    }
}

impl Decode for BlockRecord {
    fn decode(bytes: &[u8]) -> DecodingResult<Self> {
        let (hash, bytes) = <[u8; 32]>::decode(bytes)?;
        let (height, bytes) = read_u32_le(bytes)?;
        let (time, bytes) = read_u32_le(bytes)?;
        let (count, mut bytes) = read_u32_le(bytes)?;

        let mut txs = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (tx, rest) = <[u8; 32]>::decode(bytes)?;
            bytes = rest;
            txs.push(Txid::from_byte_array(tx));
        }

        Ok((
            Self {
                hash: BlockHash::from_byte_array(hash),
                height,
                time,
                txs,
            },
            bytes,
        ))
    }
}

/// Persisted wallet counters, singleton per wallet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TxdbState {
    pub tx: u64,
    pub coin: u64,
    pub unconfirmed: u64,
    pub confirmed: u64,
}

impl Encode for TxdbState {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32);
        out.extend_from_slice(&self.tx.to_le_bytes());
        out.extend_from_slice(&self.coin.to_le_bytes());
        out.extend_from_slice(&self.unconfirmed.to_le_bytes());
        out.extend_from_slice(&self.confirmed.to_le_bytes());
        out
    }
}

impl Decode for TxdbState {
    fn decode(bytes: &[u8]) -> DecodingResult<Self> {
        let (tx, bytes) = read_u64_le(bytes)?;
        let (coin, bytes) = read_u64_le(bytes)?;
        let (unconfirmed, bytes) = read_u64_le(bytes)?;
        let (confirmed, bytes) = read_u64_le(bytes)?;

        Ok((
            Self {
                tx,
                coin,
                unconfirmed,
                confirmed,
            },
            bytes,
        ))
    }
}

/// Balance snapshot, global or per-account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Balance {
    pub account: Option<u32>,
    pub tx: u64,
    pub coin: u64,
    pub unconfirmed: u64,
    pub confirmed: u64,
}

/// Directory value recording which wallets reference an outpoint or a block
/// height. Wallet ids are kept sorted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WalletMap {
    pub wids: Vec<u32>,
}

impl WalletMap {
    /// Returns false if the wallet was already present.
    pub fn add(&mut self, wid: u32) -> bool {
        match self.wids.binary_search(&wid) {
            Ok(_) => false,
            Err(pos) => {
                self.wids.insert(pos, wid);
                true
            }
        }
    }

    pub fn remove(&mut self, wid: u32) -> bool {
        match self.wids.binary_search(&wid) {
            Ok(pos) => {
                self.wids.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.wids.is_empty()
    }
}

impl Encode for WalletMap {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.wids.len() * 4);
        out.extend_from_slice(&(self.wids.len() as u32).to_le_bytes());
        for wid in &self.wids {
            out.extend_from_slice(&wid.to_le_bytes());
        }
        out
    }
}

impl Decode for WalletMap {
    fn decode(bytes: &[u8]) -> DecodingResult<Self> {
        let (count, mut bytes) = read_u32_le(bytes)?;

        let mut wids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (wid, rest) = read_u32_le(bytes)?;
            bytes = rest;
            wids.push(wid);
        }

        Ok((Self { wids }, bytes))
    }
}
