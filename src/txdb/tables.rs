//! The wallet schema: one table per tag.
//!
//! Wallet-scoped keys are laid out as `0x74 ‖ wid (u32 BE) ‖ tag ‖ suffix`;
//! all multi-byte key integers are big-endian so lexicographic order equals
//! numeric order for range scans. The two directory tables at the bottom
//! are shared by all wallets and sit outside the wallet prefix.

use bitcoin::hashes::Hash;
use bitcoin::{OutPoint, Txid};

use crate::storage::encdec::{Decode, DecodingResult, Encode, EncodeBuilder};
use crate::txdb::records::{BlockRecord, Credit, TxRecord, TxdbState, WalletMap};
use crate::{define_global_table, define_wallet_table};

// --- key suffix types

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OutpointKey {
    pub hash: [u8; 32],
    pub index: u32,
}

impl OutpointKey {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            txid: Txid::from_byte_array(self.hash),
            vout: self.index,
        }
    }
}

impl From<OutPoint> for OutpointKey {
    fn from(outpoint: OutPoint) -> Self {
        Self {
            hash: outpoint.txid.to_byte_array(),
            index: outpoint.vout,
        }
    }
}

impl Encode for OutpointKey {
    fn encode(&self) -> Vec<u8> {
        EncodeBuilder::new()
            .append(&self.hash)
            .append(&self.index)
            .build()
    }
}

impl Decode for OutpointKey {
    fn decode(bytes: &[u8]) -> DecodingResult<Self> {
        let (hash, bytes) = <[u8; 32]>::decode(bytes)?;
        let (index, bytes) = u32::decode(bytes)?;
        Ok((Self { hash, index }, bytes))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeKey {
    pub time: u32,
    pub hash: [u8; 32],
}

impl Encode for TimeKey {
    fn encode(&self) -> Vec<u8> {
        EncodeBuilder::new()
            .append(&self.time)
            .append(&self.hash)
            .build()
    }
}

impl Decode for TimeKey {
    fn decode(bytes: &[u8]) -> DecodingResult<Self> {
        let (time, bytes) = u32::decode(bytes)?;
        let (hash, bytes) = <[u8; 32]>::decode(bytes)?;
        Ok((Self { time, hash }, bytes))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeightKey {
    pub height: u32,
    pub hash: [u8; 32],
}

impl Encode for HeightKey {
    fn encode(&self) -> Vec<u8> {
        EncodeBuilder::new()
            .append(&self.height)
            .append(&self.hash)
            .build()
    }
}

impl Decode for HeightKey {
    fn decode(bytes: &[u8]) -> DecodingResult<Self> {
        let (height, bytes) = u32::decode(bytes)?;
        let (hash, bytes) = <[u8; 32]>::decode(bytes)?;
        Ok((Self { height, hash }, bytes))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccountHashKey {
    pub account: u32,
    pub hash: [u8; 32],
}

impl Encode for AccountHashKey {
    fn encode(&self) -> Vec<u8> {
        EncodeBuilder::new()
            .append(&self.account)
            .append(&self.hash)
            .build()
    }
}

impl Decode for AccountHashKey {
    fn decode(bytes: &[u8]) -> DecodingResult<Self> {
        let (account, bytes) = u32::decode(bytes)?;
        let (hash, bytes) = <[u8; 32]>::decode(bytes)?;
        Ok((Self { account, hash }, bytes))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccountTimeKey {
    pub account: u32,
    pub time: u32,
    pub hash: [u8; 32],
}

impl Encode for AccountTimeKey {
    fn encode(&self) -> Vec<u8> {
        EncodeBuilder::new()
            .append(&self.account)
            .append(&self.time)
            .append(&self.hash)
            .build()
    }
}

impl Decode for AccountTimeKey {
    fn decode(bytes: &[u8]) -> DecodingResult<Self> {
        let (account, bytes) = u32::decode(bytes)?;
        let (time, bytes) = u32::decode(bytes)?;
        let (hash, bytes) = <[u8; 32]>::decode(bytes)?;
        Ok((Self { account, time, hash }, bytes))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccountHeightKey {
    pub account: u32,
    pub height: u32,
    pub hash: [u8; 32],
}

impl Encode for AccountHeightKey {
    fn encode(&self) -> Vec<u8> {
        EncodeBuilder::new()
            .append(&self.account)
            .append(&self.height)
            .append(&self.hash)
            .build()
    }
}

impl Decode for AccountHeightKey {
    fn decode(bytes: &[u8]) -> DecodingResult<Self> {
        let (account, bytes) = u32::decode(bytes)?;
        let (height, bytes) = u32::decode(bytes)?;
        let (hash, bytes) = <[u8; 32]>::decode(bytes)?;
        Ok((
            Self {
                account,
                height,
                hash,
            },
            bytes,
        ))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccountOutpointKey {
    pub account: u32,
    pub hash: [u8; 32],
    pub index: u32,
}

impl Encode for AccountOutpointKey {
    fn encode(&self) -> Vec<u8> {
        EncodeBuilder::new()
            .append(&self.account)
            .append(&self.hash)
            .append(&self.index)
            .build()
    }
}

impl Decode for AccountOutpointKey {
    fn decode(bytes: &[u8]) -> DecodingResult<Self> {
        let (account, bytes) = u32::decode(bytes)?;
        let (hash, bytes) = <[u8; 32]>::decode(bytes)?;
        let (index, bytes) = u32::decode(bytes)?;
        Ok((
            Self {
                account,
                hash,
                index,
            },
            bytes,
        ))
    }
}

// --- wallet-scoped tables

// Extended transaction payload by hash
define_wallet_table! {
    name: TxsKV,
    tag: b't',
    key_type: [u8; 32],
    value_type: TxRecord
}

// Credit by outpoint
define_wallet_table! {
    name: CreditsKV,
    tag: b'c',
    key_type: OutpointKey,
    value_type: Credit
}

// Undo coin by *spender* outpoint
define_wallet_table! {
    name: UndoCoinsKV,
    tag: b'd',
    key_type: OutpointKey,
    value_type: Credit
}

// Spent marker by prevout; value is the spender outpoint
define_wallet_table! {
    name: SpentMarkersKV,
    tag: b's',
    key_type: OutpointKey,
    value_type: OutPoint
}

// Pending (mempool) flag by hash
define_wallet_table! {
    name: PendingKV,
    tag: b'p',
    key_type: [u8; 32],
    value_type: ()
}

// By first-seen time
define_wallet_table! {
    name: TimeIndexKV,
    tag: b'm',
    key_type: TimeKey,
    value_type: ()
}

// By confirmed height
define_wallet_table! {
    name: HeightIndexKV,
    tag: b'h',
    key_type: HeightKey,
    value_type: ()
}

// By account
define_wallet_table! {
    name: AccountTxsKV,
    tag: b'T',
    key_type: AccountHashKey,
    value_type: ()
}

// Pending by account
define_wallet_table! {
    name: AccountPendingKV,
    tag: b'P',
    key_type: AccountHashKey,
    value_type: ()
}

// By account and first-seen time
define_wallet_table! {
    name: AccountTimeKV,
    tag: b'M',
    key_type: AccountTimeKey,
    value_type: ()
}

// By account and confirmed height
define_wallet_table! {
    name: AccountHeightKV,
    tag: b'H',
    key_type: AccountHeightKey,
    value_type: ()
}

// Credit by account and outpoint; value fetched from CreditsKV
define_wallet_table! {
    name: AccountCreditsKV,
    tag: b'C',
    key_type: AccountOutpointKey,
    value_type: ()
}

// Replace-by-fee taint marker by hash
define_wallet_table! {
    name: RbfMarkersKV,
    tag: b'r',
    key_type: [u8; 32],
    value_type: ()
}

// Block record by height
define_wallet_table! {
    name: BlocksKV,
    tag: b'b',
    key_type: u32,
    value_type: BlockRecord
}

// Singleton wallet state
define_wallet_table! {
    name: StateKV,
    tag: b'R',
    key_type: (),
    value_type: TxdbState
}

// --- directory tables shared by all wallets

// Wallets referencing an outpoint
define_global_table! {
    name: OutpointMapsKV,
    tag: b'o',
    key_type: OutpointKey,
    value_type: WalletMap
}

// Wallets with confirmed transactions at a height
define_global_table! {
    name: BlockMapsKV,
    tag: b'b',
    key_type: u32,
    value_type: WalletMap
}
