//! The per-wallet transaction database.
//!
//! A single writer per wallet drives the pipeline: every entry point opens
//! a batch, mutates a pending copy of the wallet counters while staging
//! key-value writes, then flushes the batch atomically and publishes the
//! buffered events. Readers always observe the last committed state.

pub mod batch;
pub mod coin_cache;
pub mod details;
pub mod orphans;
pub mod queries;
pub mod records;
pub mod resolver;
pub mod tables;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bitcoin::hashes::Hash;
use bitcoin::{Network, OutPoint, Transaction, Txid};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::error::Error;
use crate::storage::encdec::{Decode, Encode};
use crate::storage::kv_store::{KvStore, WriteBatch};
use crate::storage::table::{GlobalTable, WalletTable};

use self::batch::{Batch, WalletEvent};
use self::coin_cache::{CoinCache, DEFAULT_COIN_CACHE_CAPACITY};
use self::details::Details;
use self::orphans::{implied_script, OrphanTracker, OrphanTx, DEFAULT_MAX_ORPHANS};
use self::records::{
    Balance, BlockMeta, BlockRecord, Coin, Credit, TxRecord, TxdbState, WalletMap, UNCONFIRMED,
};
use self::resolver::{Path, PathResolver};
use self::tables::{
    AccountCreditsKV, AccountHashKey, AccountHeightKV, AccountHeightKey, AccountOutpointKey,
    AccountPendingKV, AccountTimeKV, AccountTimeKey, BlockMapsKV, BlocksKV, CreditsKV,
    HeightIndexKV, HeightKey, OutpointKey, OutpointMapsKV, PendingKV, RbfMarkersKV,
    SpentMarkersKV, StateKV, TimeIndexKV, TimeKey, TxsKV, UndoCoinsKV,
};

#[derive(Clone, Debug, Deserialize)]
pub struct TxdbOptions {
    /// Enable SPV orphan-input tracking.
    #[serde(default)]
    pub resolution: bool,
    /// Re-verify resolved orphan inputs against the prevout script.
    #[serde(default)]
    pub verify: bool,
    #[serde(default = "default_network")]
    pub network: Network,
    #[serde(default = "default_coin_cache")]
    pub coin_cache: u32,
    #[serde(default = "default_max_orphans")]
    pub max_orphans: usize,
}

impl Default for TxdbOptions {
    fn default() -> Self {
        Self {
            resolution: false,
            verify: false,
            network: default_network(),
            coin_cache: default_coin_cache(),
            max_orphans: default_max_orphans(),
        }
    }
}

fn default_network() -> Network {
    Network::Bitcoin
}

fn default_coin_cache() -> u32 {
    DEFAULT_COIN_CACHE_CAPACITY
}

fn default_max_orphans() -> usize {
    DEFAULT_MAX_ORPHANS
}

pub struct Txdb<S> {
    store: S,
    wid: u32,
    id: String,
    options: TxdbOptions,
    resolver: Arc<dyn PathResolver>,
    state: TxdbState,
    batch: Option<Batch>,
    cache: CoinCache,
    orphans: OrphanTracker,
    locked: HashSet<OutPoint>,
    tip_height: u32,
    events: broadcast::Sender<WalletEvent>,
}

impl<S: KvStore> Txdb<S> {
    pub fn open(
        store: S,
        wid: u32,
        id: impl Into<String>,
        resolver: Arc<dyn PathResolver>,
        options: TxdbOptions,
    ) -> Result<Self, Error> {
        let id = id.into();
        let state_key = StateKV::encode_key(wid, &());

        let state = match store.get(&state_key)? {
            Some(raw) => TxdbState::decode_all(&raw)?,
            None => {
                let state = TxdbState::default();
                let mut batch = WriteBatch::new();
                batch.put(state_key, state.encode());
                store.write(batch)?;
                state
            }
        };

        info!(wallet = %id, wid, txs = state.tx, "opened wallet txdb");

        let (events, _) = broadcast::channel(256);

        Ok(Self {
            store,
            wid,
            id,
            cache: CoinCache::new(options.coin_cache),
            orphans: OrphanTracker::new(options.max_orphans),
            options,
            resolver,
            state,
            batch: None,
            locked: HashSet::new(),
            tip_height: 0,
            events,
        })
    }

    pub fn wid(&self) -> u32 {
        self.wid
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> &TxdbState {
        &self.state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }

    /// Chain tip height fed in by the wallet database; used for
    /// confirmation counts in details views.
    pub fn set_tip_height(&mut self, height: u32) {
        self.tip_height = height;
    }

    pub fn balance(&self) -> Balance {
        Balance {
            account: None,
            tx: self.state.tx,
            coin: self.state.coin,
            unconfirmed: self.state.unconfirmed,
            confirmed: self.state.confirmed,
        }
    }

    // --- batch protocol

    fn start(&mut self) {
        assert!(self.batch.is_none(), "write batch already open");
        self.batch = Some(Batch::new(&self.state));
        self.cache.start();
    }

    fn commit(&mut self) -> Result<(), Error> {
        let batch = self.batch.take().expect("write batch not open");

        if batch.is_noop(&self.state) {
            self.cache.drop_pending();
            return Ok(());
        }

        let state = batch.pending.commit();
        let state_key = StateKV::encode_key(self.wid, &());
        let (write_batch, events) = batch.into_write_batch(state_key, &state);

        if let Err(err) = self.store.write(write_batch) {
            self.cache.drop_pending();
            return Err(err);
        }

        self.state = state;
        self.cache.commit();

        for event in events {
            let _ = self.events.send(event);
        }
        let _ = self.events.send(WalletEvent::Balance(self.balance()));

        Ok(())
    }

    fn drop_batch(&mut self) {
        self.batch = None;
        self.cache.drop_pending();
    }

    fn clear_batch(&mut self) {
        let state = self.state;
        self.batch
            .as_mut()
            .expect("write batch not open")
            .clear(&state);
        self.cache.start();
    }

    fn batch_mut(&mut self) -> &mut Batch {
        self.batch.as_mut().expect("write batch not open")
    }

    fn buffer(&mut self, event: WalletEvent) {
        self.batch_mut().events.push(event);
    }

    // --- typed table access

    fn get_table<T: WalletTable>(&self, key: &T::Key) -> Result<Option<T::Value>, Error> {
        match self.store.get(&T::encode_key(self.wid, key))? {
            Some(raw) => Ok(Some(T::Value::decode_all(&raw)?)),
            None => Ok(None),
        }
    }

    fn has_table<T: WalletTable>(&self, key: &T::Key) -> Result<bool, Error> {
        self.store.has(&T::encode_key(self.wid, key))
    }

    fn put<T: WalletTable>(&mut self, key: &T::Key, value: &T::Value) {
        let raw_key = T::encode_key(self.wid, key);
        let raw_value = value.encode();
        trace!("staging put {}", hex::encode(&raw_key));
        self.batch_mut().put(raw_key, raw_value);
    }

    fn del<T: WalletTable>(&mut self, key: &T::Key) {
        let raw_key = T::encode_key(self.wid, key);
        trace!("staging del {}", hex::encode(&raw_key));
        self.batch_mut().del(raw_key);
    }

    // --- point reads

    pub fn get_tx(&self, hash: &Txid) -> Result<Option<TxRecord>, Error> {
        self.get_table::<TxsKV>(&hash.to_byte_array())
    }

    pub fn has_tx(&self, hash: &Txid) -> Result<bool, Error> {
        self.has_table::<TxsKV>(&hash.to_byte_array())
    }

    /// Spender outpoint for a spent prevout, if any spend was observed.
    pub fn get_spent(&self, outpoint: &OutPoint) -> Result<Option<OutPoint>, Error> {
        self.get_table::<SpentMarkersKV>(&OutpointKey::from(*outpoint))
    }

    pub fn get_credit(&mut self, outpoint: &OutPoint) -> Result<Option<Credit>, Error> {
        match self.cache.lookup(outpoint) {
            Some(Some(raw)) => return Ok(Some(Credit::decode_all(&raw)?)),
            Some(None) => return Ok(None),
            None => {}
        }

        let raw_key = CreditsKV::encode_key(self.wid, &OutpointKey::from(*outpoint));
        match self.store.get(&raw_key)? {
            Some(raw) => {
                let credit = Credit::decode_all(&raw)?;
                self.cache.set(*outpoint, raw);
                Ok(Some(credit))
            }
            None => Ok(None),
        }
    }

    pub fn get_coin(&mut self, outpoint: &OutPoint) -> Result<Option<Coin>, Error> {
        Ok(self.get_credit(outpoint)?.map(|credit| credit.coin))
    }

    pub fn has_coin(&mut self, outpoint: &OutPoint) -> Result<bool, Error> {
        Ok(self.get_credit(outpoint)?.is_some())
    }

    // --- credit maintenance

    fn save_credit(&mut self, credit: &Credit, outpoint: OutPoint, path: &Path) -> Result<(), Error> {
        let key = OutpointKey::from(outpoint);
        let raw = credit.encode();

        self.batch_mut()
            .put(CreditsKV::encode_key(self.wid, &key), raw.clone());
        self.put::<AccountCreditsKV>(
            &AccountOutpointKey {
                account: path.account,
                hash: key.hash,
                index: key.index,
            },
            &(),
        );
        self.cache.push(outpoint, raw);

        self.write_outpoint_map(key)
    }

    fn remove_credit(&mut self, outpoint: OutPoint, path: &Path) -> Result<(), Error> {
        let key = OutpointKey::from(outpoint);

        self.del::<CreditsKV>(&key);
        self.del::<AccountCreditsKV>(&AccountOutpointKey {
            account: path.account,
            hash: key.hash,
            index: key.index,
        });
        self.cache.unpush(outpoint);

        self.unwrite_outpoint_map(key)
    }

    /// Record a spend of `prevout` by input `spender`: the spent marker plus
    /// the undo coin that lets a reorg restore the output.
    fn spend_credit(&mut self, credit: &Credit, prevout: OutPoint, spender: OutPoint) {
        self.put::<SpentMarkersKV>(&OutpointKey::from(prevout), &spender);
        self.put::<UndoCoinsKV>(&OutpointKey::from(spender), credit);
    }

    fn unspend_credit(&mut self, prevout: OutPoint, spender: OutPoint) {
        self.del::<SpentMarkersKV>(&OutpointKey::from(prevout));
        self.del::<UndoCoinsKV>(&OutpointKey::from(spender));
    }

    /// Rewrite the undo coin attached to the spend of `(hash, index)` with a
    /// new height, after the producing transaction confirms or disconnects.
    fn update_spent_coin(&mut self, hash: Txid, index: u32, height: i32) -> Result<(), Error> {
        let outpoint = OutPoint {
            txid: hash,
            vout: index,
        };
        let Some(spender) = self.get_spent(&outpoint)? else {
            return Ok(());
        };
        let Some(mut credit) = self.get_table::<UndoCoinsKV>(&OutpointKey::from(spender))? else {
            return Ok(());
        };

        credit.coin.height = height;
        self.put::<UndoCoinsKV>(&OutpointKey::from(spender), &credit);

        Ok(())
    }

    // --- wallet directory maps

    fn write_outpoint_map(&mut self, key: OutpointKey) -> Result<(), Error> {
        let raw_key = OutpointMapsKV::encode_key(&key);
        let mut map = match self.store.get(&raw_key)? {
            Some(raw) => WalletMap::decode_all(&raw)?,
            None => WalletMap::default(),
        };

        if map.add(self.wid) {
            self.batch_mut().put(raw_key, map.encode());
        }

        Ok(())
    }

    fn unwrite_outpoint_map(&mut self, key: OutpointKey) -> Result<(), Error> {
        let raw_key = OutpointMapsKV::encode_key(&key);
        let Some(raw) = self.store.get(&raw_key)? else {
            return Ok(());
        };

        let mut map = WalletMap::decode_all(&raw)?;
        if !map.remove(self.wid) {
            return Ok(());
        }

        if map.is_empty() {
            self.batch_mut().del(raw_key);
        } else {
            self.batch_mut().put(raw_key, map.encode());
        }

        Ok(())
    }

    fn write_block_map(&mut self, height: u32) -> Result<(), Error> {
        let raw_key = BlockMapsKV::encode_key(&height);
        let mut map = match self.store.get(&raw_key)? {
            Some(raw) => WalletMap::decode_all(&raw)?,
            None => WalletMap::default(),
        };

        if map.add(self.wid) {
            self.batch_mut().put(raw_key, map.encode());
        }

        Ok(())
    }

    fn unwrite_block_map(&mut self, height: u32) -> Result<(), Error> {
        let raw_key = BlockMapsKV::encode_key(&height);
        let Some(raw) = self.store.get(&raw_key)? else {
            return Ok(());
        };

        let mut map = WalletMap::decode_all(&raw)?;
        if !map.remove(self.wid) {
            return Ok(());
        }

        if map.is_empty() {
            self.batch_mut().del(raw_key);
        } else {
            self.batch_mut().put(raw_key, map.encode());
        }

        Ok(())
    }

    fn add_block_entry(&mut self, hash: Txid, block: &BlockMeta) -> Result<(), Error> {
        let mut record = self
            .get_table::<BlocksKV>(&block.height)?
            .unwrap_or_else(|| BlockRecord::from_meta(block));

        if record.add(hash) {
            self.put::<BlocksKV>(&block.height, &record);
        }

        self.write_block_map(block.height)
    }

    fn remove_block_entry(&mut self, hash: &Txid, height: u32) -> Result<(), Error> {
        let Some(mut record) = self.get_table::<BlocksKV>(&height)? else {
            return Ok(());
        };

        if !record.remove(hash) {
            return Ok(());
        }

        if record.is_empty() {
            self.del::<BlocksKV>(&height);
            self.unwrite_block_map(height)?;
        } else {
            self.put::<BlocksKV>(&height, &record);
        }

        Ok(())
    }

    // --- write pipeline

    /// Ingest a transaction, mempool (`block` absent) or confirmed. Returns
    /// the details view when the transaction touches the wallet, `None`
    /// when it was ignored or is foreign.
    pub fn add(&mut self, tx: &Transaction, block: Option<&BlockMeta>) -> Result<Option<Details>, Error> {
        if self.options.resolution && self.maybe_stash_orphan(tx, block)? {
            return Ok(None);
        }

        self.start();
        let details = match self.add_inner(tx, block) {
            Ok(details) => details,
            Err(err) => {
                self.drop_batch();
                return Err(err);
            }
        };
        self.commit()?;

        if self.options.resolution && details.is_some() {
            self.resolve_orphans(tx)?;
        }

        Ok(details)
    }

    fn add_inner(
        &mut self,
        tx: &Transaction,
        block: Option<&BlockMeta>,
    ) -> Result<Option<Details>, Error> {
        let hash = tx.compute_txid();

        if let Some(existing) = self.get_tx(&hash)? {
            if existing.is_confirmed() {
                return Ok(None);
            }

            // Promote a mempool transaction to the chain.
            let Some(block) = block else {
                return Ok(None);
            };
            return Ok(Some(self.confirm_record(existing, block)?));
        }

        match block {
            None => {
                if self.is_rbf(tx)? {
                    // Propagate the taint: the tx and its mempool
                    // descendants are ignored until a confirmation breaks
                    // the chain.
                    self.put::<RbfMarkersKV>(&hash.to_byte_array(), &());
                    warn!(wallet = %self.id, %hash, "ignoring replace-by-fee tx");
                    return Ok(None);
                }

                if !self.remove_conflicts(tx, &hash, true)? {
                    debug!(wallet = %self.id, %hash, "double spend of confirmed coin, ignoring tx");
                    return Ok(None);
                }

                self.insert_record(tx, hash, None)
            }
            Some(block) => {
                self.remove_conflicts(tx, &hash, false)?;
                self.del::<RbfMarkersKV>(&hash.to_byte_array());
                self.insert_record(tx, hash, Some(block))
            }
        }
    }

    fn insert_record(
        &mut self,
        tx: &Transaction,
        hash: Txid,
        block: Option<&BlockMeta>,
    ) -> Result<Option<Details>, Error> {
        let hash_bytes = hash.to_byte_array();
        let network = self.options.network;
        let height = block.map(|b| b.height as i32).unwrap_or(UNCONFIRMED);

        let mut record = TxRecord::from_tx(tx.clone(), now());
        if let Some(block) = block {
            record.set_block(block);
        }

        let mut details = Details::from_record(&record, self.tip_height);
        let mut updated = false;

        if !tx.is_coinbase() {
            for (i, input) in tx.input.iter().enumerate() {
                let prevout = input.previous_output;
                let spender = OutPoint {
                    txid: hash,
                    vout: i as u32,
                };

                let Some(mut credit) = self.get_credit(&prevout)? else {
                    // Stub for later orphan-input resolution.
                    self.put::<SpentMarkersKV>(&OutpointKey::from(prevout), &spender);
                    continue;
                };

                let path = self
                    .resolver
                    .path(&credit.coin.script)?
                    .expect("missing path for wallet credit");

                updated = true;
                let value = credit.coin.value;

                self.spend_credit(&credit, prevout, spender);

                {
                    let pending = &mut self.batch_mut().pending;
                    pending.coin -= 1;
                    pending.unconfirmed -= value;
                }

                if block.is_none() {
                    // Keep the credit around, flagged, until the spend
                    // confirms; the undo coin restores it on reorg.
                    credit.spent = true;
                    self.save_credit(&credit, prevout, &path)?;
                } else {
                    self.batch_mut().pending.confirmed -= value;
                    self.remove_credit(prevout, &path)?;
                }

                details.set_input(i, Some(path), &credit.coin, network);
            }
        }

        for (i, output) in tx.output.iter().enumerate() {
            let Some(path) = self.resolver.path(&output.script_pubkey)? else {
                continue;
            };

            details.set_output(i, Some(path), network);
            updated = true;

            if self.resolve_input(tx, hash, i as u32, &path, block)? {
                continue;
            }

            let outpoint = OutPoint {
                txid: hash,
                vout: i as u32,
            };
            let credit = Credit::from_coin(Coin::from_output(output, height, tx.is_coinbase()));

            {
                let pending = &mut self.batch_mut().pending;
                pending.coin += 1;
                pending.unconfirmed += credit.coin.value;
                if block.is_some() {
                    pending.confirmed += credit.coin.value;
                }
            }

            self.save_credit(&credit, outpoint, &path)?;
        }

        if !updated {
            // Not our transaction: un-stage everything.
            self.clear_batch();
            return Ok(None);
        }

        self.put::<TxsKV>(&hash_bytes, &record);
        self.put::<TimeIndexKV>(
            &TimeKey {
                time: record.ps,
                hash: hash_bytes,
            },
            &(),
        );

        match block {
            None => self.put::<PendingKV>(&hash_bytes, &()),
            Some(block) => self.put::<HeightIndexKV>(
                &HeightKey {
                    height: block.height,
                    hash: hash_bytes,
                },
                &(),
            ),
        }

        for account in details.accounts() {
            self.put::<AccountTxsKV>(
                &AccountHashKey {
                    account,
                    hash: hash_bytes,
                },
                &(),
            );
            self.put::<AccountTimeKV>(
                &AccountTimeKey {
                    account,
                    time: record.ps,
                    hash: hash_bytes,
                },
                &(),
            );

            match block {
                None => self.put::<AccountPendingKV>(
                    &AccountHashKey {
                        account,
                        hash: hash_bytes,
                    },
                    &(),
                ),
                Some(block) => self.put::<AccountHeightKV>(
                    &AccountHeightKey {
                        account,
                        height: block.height,
                        hash: hash_bytes,
                    },
                    &(),
                ),
            }
        }

        if let Some(block) = block {
            self.add_block_entry(hash, block)?;
        }

        self.batch_mut().pending.tx += 1;
        self.unlock_tx(tx);

        debug!(wallet = %self.id, %hash, height, "indexed tx");

        self.buffer(WalletEvent::Tx {
            record,
            details: details.clone(),
        });

        Ok(Some(details))
    }

    /// An output we just indexed may already have a recorded spend (the
    /// spender arrived first, leaving a bare spent marker). Re-attach the
    /// undo coin to that spender and account for the balance.
    fn resolve_input(
        &mut self,
        tx: &Transaction,
        hash: Txid,
        index: u32,
        path: &Path,
        block: Option<&BlockMeta>,
    ) -> Result<bool, Error> {
        let outpoint = OutPoint {
            txid: hash,
            vout: index,
        };

        let Some(spender) = self.get_spent(&outpoint)? else {
            return Ok(false);
        };

        let spender_record = self
            .get_tx(&spender.txid)?
            .expect("missing spender for spent marker");
        let input = &spender_record.tx.input[spender.vout as usize];
        assert_eq!(
            input.previous_output, outpoint,
            "spent marker does not point back at its prevout"
        );

        let coin = Coin::from_output(
            &tx.output[index as usize],
            block.map(|b| b.height as i32).unwrap_or(UNCONFIRMED),
            tx.is_coinbase(),
        );
        let credit = Credit { coin, spent: true };

        if !self.has_table::<UndoCoinsKV>(&OutpointKey::from(spender))? {
            self.spend_credit(&credit, outpoint, spender);
        }

        if !spender_record.is_confirmed() {
            self.save_credit(&credit, outpoint, path)?;
            if block.is_some() {
                self.batch_mut().pending.confirmed += credit.coin.value;
            }
        }

        Ok(true)
    }

    /// Attach a mempool transaction to a block. Fails if the transaction is
    /// unknown or already confirmed.
    pub fn confirm(&mut self, hash: &Txid, block: &BlockMeta) -> Result<Details, Error> {
        let record = self.get_tx(hash)?.ok_or(Error::TxNotFound(*hash))?;
        if record.is_confirmed() {
            return Err(Error::AlreadyConfirmed(*hash));
        }

        self.start();
        match self.confirm_record(record, block) {
            Ok(details) => {
                self.commit()?;
                Ok(details)
            }
            Err(err) => {
                self.drop_batch();
                Err(err)
            }
        }
    }

    fn confirm_record(&mut self, mut record: TxRecord, block: &BlockMeta) -> Result<Details, Error> {
        let hash = record.hash;
        let hash_bytes = hash.to_byte_array();
        let network = self.options.network;
        let tx = record.tx.clone();

        record.set_block(block);
        let mut details = Details::from_record(&record, self.tip_height);

        if !tx.is_coinbase() {
            let credits = self.get_spent_credits(&tx, hash)?;

            for (i, input) in tx.input.iter().enumerate() {
                let prevout = input.previous_output;

                let credit = match credits[i].clone() {
                    Some(credit) => credit,
                    None => {
                        // A credit that appeared after the spend was
                        // indexed: spend it now.
                        let Some(credit) = self.get_credit(&prevout)? else {
                            continue;
                        };

                        let spender = OutPoint {
                            txid: hash,
                            vout: i as u32,
                        };
                        self.spend_credit(&credit, prevout, spender);

                        let pending = &mut self.batch_mut().pending;
                        pending.coin -= 1;
                        pending.unconfirmed -= credit.coin.value;

                        credit
                    }
                };

                let path = self
                    .resolver
                    .path(&credit.coin.script)?
                    .expect("missing path for wallet credit");

                details.set_input(i, Some(path), &credit.coin, network);

                if credit.coin.height != UNCONFIRMED {
                    self.batch_mut().pending.confirmed -= credit.coin.value;
                }
                self.remove_credit(prevout, &path)?;
            }
        }

        for (i, output) in tx.output.iter().enumerate() {
            let outpoint = OutPoint {
                txid: hash,
                vout: i as u32,
            };

            let Some(mut credit) = self.get_credit(&outpoint)? else {
                // Output was spent and settled already; keep its undo coin
                // in step with the new height.
                self.update_spent_coin(hash, i as u32, record.height)?;
                continue;
            };

            let path = self
                .resolver
                .path(&output.script_pubkey)?
                .expect("missing path for wallet credit");

            details.set_output(i, Some(path), network);

            if credit.spent {
                self.update_spent_coin(hash, i as u32, record.height)?;
            }

            credit.coin.height = record.height;
            self.batch_mut().pending.confirmed += credit.coin.value;
            self.save_credit(&credit, outpoint, &path)?;
        }

        self.del::<RbfMarkersKV>(&hash_bytes);
        self.put::<TxsKV>(&hash_bytes, &record);
        self.del::<PendingKV>(&hash_bytes);
        self.put::<HeightIndexKV>(
            &HeightKey {
                height: block.height,
                hash: hash_bytes,
            },
            &(),
        );

        for account in details.accounts() {
            self.del::<AccountPendingKV>(&AccountHashKey {
                account,
                hash: hash_bytes,
            });
            self.put::<AccountHeightKV>(
                &AccountHeightKey {
                    account,
                    height: block.height,
                    hash: hash_bytes,
                },
                &(),
            );
        }

        self.add_block_entry(hash, block)?;

        debug!(wallet = %self.id, %hash, height = block.height, "confirmed tx");

        self.buffer(WalletEvent::Confirmed {
            record,
            details: details.clone(),
        });

        Ok(details)
    }

    /// Detach a confirmed transaction from its block after a reorg. Benign
    /// no-op when the transaction is unknown or already pending.
    pub fn unconfirm(&mut self, hash: &Txid) -> Result<Option<Details>, Error> {
        let Some(record) = self.get_tx(hash)? else {
            return Ok(None);
        };
        if !record.is_confirmed() {
            return Ok(None);
        }

        self.start();
        match self.unconfirm_record(record) {
            Ok(details) => {
                self.commit()?;
                Ok(Some(details))
            }
            Err(err) => {
                self.drop_batch();
                Err(err)
            }
        }
    }

    fn unconfirm_record(&mut self, mut record: TxRecord) -> Result<Details, Error> {
        let hash = record.hash;
        let hash_bytes = hash.to_byte_array();
        let network = self.options.network;
        let tx = record.tx.clone();
        let old_height = record.height as u32;

        record.unset_block();
        let mut details = Details::from_record(&record, self.tip_height);

        if !tx.is_coinbase() {
            let credits = self.get_spent_credits(&tx, hash)?;

            for (i, input) in tx.input.iter().enumerate() {
                let Some(mut credit) = credits[i].clone() else {
                    continue;
                };
                let prevout = input.previous_output;

                let path = self
                    .resolver
                    .path(&credit.coin.script)?
                    .expect("missing path for wallet credit");

                details.set_input(i, Some(path), &credit.coin, network);

                // The coin is still mempool-spent by this tx; it re-enters
                // the confirmed total only.
                if credit.coin.height != UNCONFIRMED {
                    self.batch_mut().pending.confirmed += credit.coin.value;
                }
                credit.spent = true;
                self.save_credit(&credit, prevout, &path)?;
            }
        }

        for (i, output) in tx.output.iter().enumerate() {
            let outpoint = OutPoint {
                txid: hash,
                vout: i as u32,
            };

            let Some(mut credit) = self.get_credit(&outpoint)? else {
                self.update_spent_coin(hash, i as u32, UNCONFIRMED)?;
                continue;
            };

            let path = self
                .resolver
                .path(&output.script_pubkey)?
                .expect("missing path for wallet credit");

            details.set_output(i, Some(path), network);

            if credit.spent {
                self.update_spent_coin(hash, i as u32, UNCONFIRMED)?;
            }

            credit.coin.height = UNCONFIRMED;
            self.batch_mut().pending.confirmed -= credit.coin.value;
            self.save_credit(&credit, outpoint, &path)?;
        }

        self.remove_block_entry(&hash, old_height)?;
        self.put::<TxsKV>(&hash_bytes, &record);
        self.put::<PendingKV>(&hash_bytes, &());
        self.del::<HeightIndexKV>(&HeightKey {
            height: old_height,
            hash: hash_bytes,
        });

        for account in details.accounts() {
            self.put::<AccountPendingKV>(
                &AccountHashKey {
                    account,
                    hash: hash_bytes,
                },
                &(),
            );
            self.del::<AccountHeightKV>(&AccountHeightKey {
                account,
                height: old_height,
                hash: hash_bytes,
            });
        }

        debug!(wallet = %self.id, %hash, old_height, "unconfirmed tx");

        self.buffer(WalletEvent::Unconfirmed {
            record,
            details: details.clone(),
        });

        Ok(details)
    }

    /// Remove a transaction and, first, everything that spends it.
    pub fn remove(&mut self, hash: &Txid) -> Result<Option<Details>, Error> {
        let Some(record) = self.get_tx(hash)? else {
            return Ok(None);
        };

        self.remove_recursive(&record)
    }

    /// Remove a pending transaction. Fails when the transaction is not in
    /// the mempool: confirmed history cannot be abandoned.
    pub fn abandon(&mut self, hash: &Txid) -> Result<Option<Details>, Error> {
        if !self.has_table::<PendingKV>(&hash.to_byte_array())? {
            return Err(Error::NotEligible(*hash));
        }

        self.remove(hash)
    }

    /// Remove unconfirmed transactions first seen more than `age` seconds
    /// ago. Returns the removed hashes.
    pub fn zap(&mut self, account: Option<u32>, age: u32) -> Result<Vec<Txid>, Error> {
        let end = now().saturating_sub(age);
        let hashes = self.range_hashes_until(account, end)?;

        let mut removed = Vec::new();

        for hash in hashes {
            let Some(record) = self.get_tx(&hash)? else {
                continue;
            };
            if record.is_confirmed() {
                continue;
            }

            debug!(wallet = %self.id, %hash, "zapping tx");
            self.remove_recursive(&record)?;
            removed.push(hash);
        }

        Ok(removed)
    }

    /// Erase spenders before spendees so balance decrements net correctly.
    /// Each erase takes its own batch to bound memory.
    fn remove_recursive(&mut self, record: &TxRecord) -> Result<Option<Details>, Error> {
        let hash = record.hash;

        for index in 0..record.tx.output.len() as u32 {
            let outpoint = OutPoint {
                txid: hash,
                vout: index,
            };

            let Some(spender) = self.get_spent(&outpoint)? else {
                continue;
            };
            let Some(spender_record) = self.get_tx(&spender.txid)? else {
                continue;
            };

            self.remove_recursive(&spender_record)?;
        }

        self.start();
        let details = match self.erase(record) {
            Ok(details) => details,
            Err(err) => {
                self.drop_batch();
                return Err(err);
            }
        };
        self.commit()?;

        Ok(Some(details))
    }

    fn erase(&mut self, record: &TxRecord) -> Result<Details, Error> {
        let hash = record.hash;
        let hash_bytes = hash.to_byte_array();
        let network = self.options.network;
        let tx = &record.tx;

        let mut details = Details::from_record(record, self.tip_height);

        if !tx.is_coinbase() {
            let credits = self.get_spent_credits(tx, hash)?;

            for (i, input) in tx.input.iter().enumerate() {
                let prevout = input.previous_output;
                let spender = OutPoint {
                    txid: hash,
                    vout: i as u32,
                };

                let Some(mut credit) = credits[i].clone() else {
                    self.del::<SpentMarkersKV>(&OutpointKey::from(prevout));
                    continue;
                };

                let path = self
                    .resolver
                    .path(&credit.coin.script)?
                    .expect("missing path for wallet credit");

                details.set_input(i, Some(path), &credit.coin, network);

                {
                    let pending = &mut self.batch_mut().pending;
                    pending.coin += 1;
                    pending.unconfirmed += credit.coin.value;
                    if record.is_confirmed() {
                        pending.confirmed += credit.coin.value;
                    }
                }

                self.unspend_credit(prevout, spender);
                credit.spent = false;
                self.save_credit(&credit, prevout, &path)?;
            }
        }

        for (i, output) in tx.output.iter().enumerate() {
            let Some(path) = self.resolver.path(&output.script_pubkey)? else {
                continue;
            };

            details.set_output(i, Some(path), network);

            let outpoint = OutPoint {
                txid: hash,
                vout: i as u32,
            };
            let Some(credit) = self.get_credit(&outpoint)? else {
                continue;
            };

            {
                let pending = &mut self.batch_mut().pending;
                pending.coin -= 1;
                pending.unconfirmed -= credit.coin.value;
                if record.is_confirmed() {
                    pending.confirmed -= credit.coin.value;
                }
            }

            self.remove_credit(outpoint, &path)?;
        }

        self.del::<RbfMarkersKV>(&hash_bytes);
        self.del::<TxsKV>(&hash_bytes);
        self.del::<TimeIndexKV>(&TimeKey {
            time: record.ps,
            hash: hash_bytes,
        });

        if record.is_confirmed() {
            self.del::<HeightIndexKV>(&HeightKey {
                height: record.height as u32,
                hash: hash_bytes,
            });
            self.remove_block_entry(&hash, record.height as u32)?;
        } else {
            self.del::<PendingKV>(&hash_bytes);
        }

        for account in details.accounts() {
            self.del::<AccountTxsKV>(&AccountHashKey {
                account,
                hash: hash_bytes,
            });
            self.del::<AccountTimeKV>(&AccountTimeKey {
                account,
                time: record.ps,
                hash: hash_bytes,
            });

            if record.is_confirmed() {
                self.del::<AccountHeightKV>(&AccountHeightKey {
                    account,
                    height: record.height as u32,
                    hash: hash_bytes,
                });
            } else {
                self.del::<AccountPendingKV>(&AccountHashKey {
                    account,
                    hash: hash_bytes,
                });
            }
        }

        self.batch_mut().pending.tx -= 1;

        debug!(wallet = %self.id, %hash, "erased tx");

        self.buffer(WalletEvent::RemoveTx {
            record: record.clone(),
            details: details.clone(),
        });

        Ok(details)
    }

    /// Evict unconfirmed double-spenders of `tx`'s inputs. With
    /// `unconfirmed_only`, a confirmed conflicting spender wins instead and
    /// the pending add is aborted (returns false).
    fn remove_conflicts(
        &mut self,
        tx: &Transaction,
        hash: &Txid,
        unconfirmed_only: bool,
    ) -> Result<bool, Error> {
        if tx.is_coinbase() {
            return Ok(true);
        }

        let mut spenders = Vec::new();
        let mut seen = HashSet::new();

        for input in &tx.input {
            let prevout = input.previous_output;

            let Some(spender) = self.get_spent(&prevout)? else {
                continue;
            };
            if spender.txid == *hash {
                continue;
            }
            if !seen.insert(spender.txid) {
                continue;
            }

            let record = self
                .get_tx(&spender.txid)?
                .expect("missing spender for spent marker");

            if unconfirmed_only && record.is_confirmed() {
                return Ok(false);
            }

            spenders.push(record);
        }

        for spender in spenders {
            self.remove_conflict(spender)?;
        }

        Ok(true)
    }

    /// The only place the batch rotates mid-call: the recursive removal
    /// takes its own batches, so the current one is dropped and re-opened
    /// around it.
    fn remove_conflict(&mut self, record: TxRecord) -> Result<(), Error> {
        warn!(wallet = %self.id, hash = %record.hash, "handling conflicting tx");

        self.drop_batch();
        let details = self.remove_recursive(&record)?;
        self.start();

        warn!(wallet = %self.id, hash = %record.hash, "removed conflict");

        if let Some(details) = details {
            let _ = self.events.send(WalletEvent::Conflict { record, details });
        }

        Ok(())
    }

    fn is_rbf(&self, tx: &Transaction) -> Result<bool, Error> {
        if tx.is_explicitly_rbf() {
            return Ok(true);
        }

        for input in &tx.input {
            let parent = input.previous_output.txid.to_byte_array();
            if self.has_table::<RbfMarkersKV>(&parent)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    // --- SPV orphan resolution

    /// Stash a transaction whose inputs reference unknown prevouts that
    /// look like ours. Returns true when stashed (the tx is not indexed).
    fn maybe_stash_orphan(
        &mut self,
        tx: &Transaction,
        block: Option<&BlockMeta>,
    ) -> Result<bool, Error> {
        if tx.is_coinbase() {
            return Ok(false);
        }

        let hash = tx.compute_txid();
        if self.orphans.contains(&hash) || self.has_tx(&hash)? {
            return Ok(false);
        }

        let mut orphaned = Vec::new();

        for (i, input) in tx.input.iter().enumerate() {
            let prevout = input.previous_output;

            if self.get_credit(&prevout)?.is_some() {
                continue;
            }
            if self.has_tx(&prevout.txid)? {
                continue;
            }

            let Some(script) = implied_script(input) else {
                continue;
            };

            if self.resolver.has_path(&script)? {
                orphaned.push((i as u32, prevout));
            }
        }

        if orphaned.is_empty() {
            return Ok(false);
        }

        debug!(wallet = %self.id, %hash, inputs = orphaned.len(), "stashing orphan tx");
        self.orphans.insert(hash, tx.clone(), block.copied(), orphaned);

        Ok(true)
    }

    /// New outputs of `tx` may release stashed orphans; verify and re-add
    /// them.
    fn resolve_orphans(&mut self, tx: &Transaction) -> Result<(), Error> {
        let hash = tx.compute_txid();

        for index in 0..tx.output.len() as u32 {
            let outpoint = OutPoint {
                txid: hash,
                vout: index,
            };

            for orphan in self.orphans.resolve(outpoint) {
                if self.options.verify && !verify_orphan(&orphan, tx, hash) {
                    warn!(wallet = %self.id, orphan = %orphan.tx.compute_txid(), "orphan failed verification, discarding");
                    continue;
                }

                self.add(&orphan.tx, orphan.block.as_ref())?;
            }
        }

        Ok(())
    }

    // --- locked outpoints

    /// Freeze an outpoint against coin selection. Locks are in-memory only
    /// and cleared on restart.
    pub fn lock_outpoint(&mut self, outpoint: OutPoint) -> bool {
        self.locked.insert(outpoint)
    }

    pub fn unlock_outpoint(&mut self, outpoint: &OutPoint) -> bool {
        self.locked.remove(outpoint)
    }

    pub fn is_locked(&self, outpoint: &OutPoint) -> bool {
        self.locked.contains(outpoint)
    }

    pub fn lock_tx(&mut self, tx: &Transaction) {
        for input in &tx.input {
            self.lock_outpoint(input.previous_output);
        }
    }

    pub fn unlock_tx(&mut self, tx: &Transaction) {
        for input in &tx.input {
            self.unlock_outpoint(&input.previous_output);
        }
    }

    pub fn locked_outpoints(&self) -> Vec<OutPoint> {
        self.locked.iter().copied().collect()
    }

    /// Strip locked entries from a coin list.
    pub fn filter_locked(&self, coins: Vec<(OutPoint, Coin)>) -> Vec<(OutPoint, Coin)> {
        coins
            .into_iter()
            .filter(|(outpoint, _)| !self.is_locked(outpoint))
            .collect()
    }
}

/// Check a resolved orphan input against the now-known prevout script.
fn verify_orphan(orphan: &OrphanTx, parent: &Transaction, parent_hash: Txid) -> bool {
    for input in &orphan.tx.input {
        let prevout = input.previous_output;
        if prevout.txid != parent_hash {
            continue;
        }

        let Some(output) = parent.output.get(prevout.vout as usize) else {
            return false;
        };
        let Some(implied) = implied_script(input) else {
            continue;
        };

        if implied != output.script_pubkey {
            return false;
        }
    }

    true
}

pub(crate) fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32
}
