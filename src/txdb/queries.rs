//! Range-scan query layer: history, pending, time/height ranges, coins,
//! credits, balances and details views. All scans decode keys as they go
//! and observe committed state only.

use std::ops::Range;

use bitcoin::hashes::Hash;
use bitcoin::{OutPoint, Transaction, Txid};

use crate::error::Error;
use crate::storage::encdec::{prefix_key_range, Decode};
use crate::storage::kv_store::KvStore;
use crate::storage::table::WalletTable;

use super::details::Details;
use super::records::{Balance, BlockRecord, Coin, Credit, TxRecord, UNCONFIRMED};
use super::tables::{
    AccountCreditsKV, AccountHeightKV, AccountPendingKV, AccountTimeKV, AccountTxsKV, BlocksKV,
    CreditsKV, HeightIndexKV, PendingKV, TimeIndexKV, TxsKV, UndoCoinsKV,
};
use super::Txdb;

/// Bounds for a height or time range scan; `start`/`end` are inclusive,
/// `limit` of zero means unlimited.
#[derive(Clone, Copy, Debug, Default)]
pub struct RangeQuery {
    pub start: Option<u32>,
    pub end: Option<u32>,
    pub limit: usize,
    pub reverse: bool,
}

impl<S: KvStore> Txdb<S> {
    pub fn store(&self) -> &S {
        &self.store
    }

    fn scan_hashes<T>(&self, range: Range<Vec<u8>>, options: &RangeQuery) -> Result<Vec<Txid>, Error>
    where
        T: WalletTable,
        T::Key: HashSuffixed,
    {
        let entries = self.store.scan(range, options.reverse, options.limit)?;

        let mut out = Vec::with_capacity(entries.len());
        for (key, _) in entries {
            out.push(Txid::from_byte_array(T::decode_key(&key)?.tx_hash()));
        }

        Ok(out)
    }

    /// Range over a table whose key suffix starts with a u32 (optionally
    /// behind an account prefix).
    fn u32_range<T: WalletTable>(&self, account: Option<u32>, options: &RangeQuery) -> Range<Vec<u8>> {
        let mut prefix = T::prefix(self.wid);
        if let Some(account) = account {
            prefix.extend(account.to_be_bytes());
        }

        let base = prefix_key_range(&prefix);

        let start = match options.start {
            Some(start) => {
                let mut key = prefix.clone();
                key.extend(start.to_be_bytes());
                key
            }
            None => base.start,
        };

        let end = match options.end.and_then(|end| end.checked_add(1)) {
            Some(end) => {
                let mut key = prefix;
                key.extend(end.to_be_bytes());
                key
            }
            None => base.end,
        };

        start..end
    }

    fn account_range<T: WalletTable>(&self, account: u32) -> Range<Vec<u8>> {
        let mut prefix = T::prefix(self.wid);
        prefix.extend(account.to_be_bytes());
        prefix_key_range(&prefix)
    }

    // --- history

    pub fn get_history_hashes(&self, account: Option<u32>) -> Result<Vec<Txid>, Error> {
        let options = RangeQuery::default();
        match account {
            None => {
                let range = prefix_key_range(&TxsKV::prefix(self.wid));
                self.scan_hashes::<TxsKV>(range, &options)
            }
            Some(account) => {
                self.scan_hashes::<AccountTxsKV>(self.account_range::<AccountTxsKV>(account), &options)
            }
        }
    }

    pub fn get_pending_hashes(&self, account: Option<u32>) -> Result<Vec<Txid>, Error> {
        let options = RangeQuery::default();
        match account {
            None => {
                let range = prefix_key_range(&PendingKV::prefix(self.wid));
                self.scan_hashes::<PendingKV>(range, &options)
            }
            Some(account) => self.scan_hashes::<AccountPendingKV>(
                self.account_range::<AccountPendingKV>(account),
                &options,
            ),
        }
    }

    /// Confirmed transactions by height range.
    pub fn get_height_range_hashes(&self, options: &RangeQuery) -> Result<Vec<Txid>, Error> {
        let range = self.u32_range::<HeightIndexKV>(None, options);
        self.scan_hashes::<HeightIndexKV>(range, options)
    }

    pub fn get_account_height_range_hashes(
        &self,
        account: u32,
        options: &RangeQuery,
    ) -> Result<Vec<Txid>, Error> {
        let range = self.u32_range::<AccountHeightKV>(Some(account), options);
        self.scan_hashes::<AccountHeightKV>(range, options)
    }

    /// Transactions by first-seen time range.
    pub fn get_range_hashes(&self, options: &RangeQuery) -> Result<Vec<Txid>, Error> {
        let range = self.u32_range::<TimeIndexKV>(None, options);
        self.scan_hashes::<TimeIndexKV>(range, options)
    }

    pub fn get_account_range_hashes(
        &self,
        account: u32,
        options: &RangeQuery,
    ) -> Result<Vec<Txid>, Error> {
        let range = self.u32_range::<AccountTimeKV>(Some(account), options);
        self.scan_hashes::<AccountTimeKV>(range, options)
    }

    pub(crate) fn range_hashes_until(
        &self,
        account: Option<u32>,
        end: u32,
    ) -> Result<Vec<Txid>, Error> {
        let options = RangeQuery {
            end: Some(end),
            ..Default::default()
        };

        match account {
            None => self.get_range_hashes(&options),
            Some(account) => self.get_account_range_hashes(account, &options),
        }
    }

    // --- coins and credits

    pub fn get_outpoints(&self, account: Option<u32>) -> Result<Vec<OutPoint>, Error> {
        match account {
            None => {
                let range = prefix_key_range(&CreditsKV::prefix(self.wid));
                let entries = self.store.scan(range, false, 0)?;

                entries
                    .iter()
                    .map(|(key, _)| Ok(CreditsKV::decode_key(key)?.outpoint()))
                    .collect()
            }
            Some(account) => {
                let entries = self
                    .store
                    .scan(self.account_range::<AccountCreditsKV>(account), false, 0)?;

                entries
                    .iter()
                    .map(|(key, _)| {
                        let key = AccountCreditsKV::decode_key(key)?;
                        Ok(OutPoint {
                            txid: Txid::from_byte_array(key.hash),
                            vout: key.index,
                        })
                    })
                    .collect()
            }
        }
    }

    /// Every credit in the wallet; populates the coin cache as it scans.
    pub fn get_credits(&mut self) -> Result<Vec<(OutPoint, Credit)>, Error> {
        let range = prefix_key_range(&CreditsKV::prefix(self.wid));
        let entries = self.store.scan(range, false, 0)?;

        let mut out = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let outpoint = CreditsKV::decode_key(&key)?.outpoint();
            let credit = Credit::decode_all(&value)?;
            self.cache.set(outpoint, value);
            out.push((outpoint, credit));
        }

        Ok(out)
    }

    pub fn get_account_credits(&mut self, account: u32) -> Result<Vec<(OutPoint, Credit)>, Error> {
        let outpoints = self.get_outpoints(Some(account))?;

        let mut out = Vec::with_capacity(outpoints.len());
        for outpoint in outpoints {
            let credit = self
                .get_credit(&outpoint)?
                .expect("missing credit for account index");
            out.push((outpoint, credit));
        }

        Ok(out)
    }

    /// Spendable coins: credits with no pending spend against them.
    pub fn get_coins(&mut self) -> Result<Vec<(OutPoint, Coin)>, Error> {
        Ok(self
            .get_credits()?
            .into_iter()
            .filter(|(_, credit)| !credit.spent)
            .map(|(outpoint, credit)| (outpoint, credit.coin))
            .collect())
    }

    pub fn get_account_coins(&mut self, account: u32) -> Result<Vec<(OutPoint, Coin)>, Error> {
        Ok(self
            .get_account_credits(account)?
            .into_iter()
            .filter(|(_, credit)| !credit.spent)
            .map(|(outpoint, credit)| (outpoint, credit.coin))
            .collect())
    }

    /// Undo coins for `tx`'s inputs, aligned with the input list.
    pub fn get_spent_credits(
        &self,
        tx: &Transaction,
        hash: Txid,
    ) -> Result<Vec<Option<Credit>>, Error> {
        let mut out = vec![None; tx.input.len()];

        let mut prefix = UndoCoinsKV::prefix(self.wid);
        prefix.extend(hash.to_byte_array());

        for (key, value) in self.store.scan(prefix_key_range(&prefix), false, 0)? {
            let key = UndoCoinsKV::decode_key(&key)?;
            let credit = Credit::decode_all(&value)?;
            if let Some(slot) = out.get_mut(key.index as usize) {
                *slot = Some(credit);
            }
        }

        Ok(out)
    }

    pub fn get_spent_coins(
        &self,
        tx: &Transaction,
        hash: Txid,
    ) -> Result<Vec<Option<Coin>>, Error> {
        Ok(self
            .get_spent_credits(tx, hash)?
            .into_iter()
            .map(|credit| credit.map(|credit| credit.coin))
            .collect())
    }

    /// Historical view of a record's inputs: the coins it consumed,
    /// recovered from undo coins.
    pub fn fill_history(&self, record: &TxRecord) -> Result<Vec<Option<Coin>>, Error> {
        self.get_spent_coins(&record.tx, record.hash)
    }

    /// Pre-spend view of a transaction's inputs: the spendable credits
    /// currently sitting on its prevouts.
    pub fn fill_coins(&mut self, tx: &Transaction) -> Result<Vec<Option<Coin>>, Error> {
        tx.input
            .iter()
            .map(|input| {
                Ok(match self.get_credit(&input.previous_output)? {
                    Some(credit) if !credit.spent => Some(credit.coin),
                    _ => None,
                })
            })
            .collect()
    }

    // --- balances and views

    /// Committed-state fast path for the global balance; per-account
    /// balances are computed from the account credit index.
    pub fn get_balance(&mut self, account: Option<u32>) -> Result<Balance, Error> {
        let Some(account) = account else {
            return Ok(self.balance());
        };

        let tx = self
            .store
            .scan(self.account_range::<AccountTxsKV>(account), false, 0)?
            .len() as u64;

        let mut balance = Balance {
            account: Some(account),
            tx,
            coin: 0,
            unconfirmed: 0,
            confirmed: 0,
        };

        for (_, credit) in self.get_account_credits(account)? {
            if credit.coin.height != UNCONFIRMED {
                balance.confirmed += credit.coin.value as u64;
            }
            if !credit.spent {
                balance.coin += 1;
                balance.unconfirmed += credit.coin.value as u64;
            }
        }

        Ok(balance)
    }

    pub fn get_block_record(&self, height: u32) -> Result<Option<BlockRecord>, Error> {
        self.get_table::<BlocksKV>(&height)
    }

    pub fn get_details(&mut self, hash: &Txid) -> Result<Option<Details>, Error> {
        let Some(record) = self.get_tx(hash)? else {
            return Ok(None);
        };

        Ok(Some(self.to_details(&record)?))
    }

    /// Full details view with address resolution and account attribution.
    pub fn to_details(&mut self, record: &TxRecord) -> Result<Details, Error> {
        let network = self.options.network;
        let tx = &record.tx;
        let mut details = Details::from_record(record, self.tip_height);

        if !tx.is_coinbase() {
            for (i, coin) in self.get_spent_coins(tx, record.hash)?.iter().enumerate() {
                let Some(coin) = coin else {
                    continue;
                };
                let path = self.resolver.path(&coin.script)?;
                details.set_input(i, path, coin, network);
            }
        }

        for i in 0..tx.output.len() {
            let path = self.resolver.path(&tx.output[i].script_pubkey)?;
            details.set_output(i, path, network);
        }

        Ok(details)
    }
}

/// Key suffixes that end in a transaction hash.
pub trait HashSuffixed {
    fn tx_hash(&self) -> [u8; 32];
}

impl HashSuffixed for [u8; 32] {
    fn tx_hash(&self) -> [u8; 32] {
        *self
    }
}

impl HashSuffixed for super::tables::TimeKey {
    fn tx_hash(&self) -> [u8; 32] {
        self.hash
    }
}

impl HashSuffixed for super::tables::HeightKey {
    fn tx_hash(&self) -> [u8; 32] {
        self.hash
    }
}

impl HashSuffixed for super::tables::AccountHashKey {
    fn tx_hash(&self) -> [u8; 32] {
        self.hash
    }
}

impl HashSuffixed for super::tables::AccountTimeKey {
    fn tx_hash(&self) -> [u8; 32] {
        self.hash
    }
}

impl HashSuffixed for super::tables::AccountHeightKey {
    fn tx_hash(&self) -> [u8; 32] {
        self.hash
    }
}
