use std::ops::Range;

use super::encdec::{decode, prefix_key_range, Decode, DecodingError, Encode, EncodeBuilder};

/// Leading byte of every wallet-scoped key. The full layout is
/// `0x74 ‖ wallet id (u32 BE) ‖ table tag ‖ suffix`, which keeps prefix
/// scans wallet-local and table-local.
pub const WALLET_PREFIX: u8 = 0x74;

/// Bytes preceding the table suffix in a wallet-scoped key.
pub const WALLET_PREFIX_LEN: usize = 6;

/// A wallet-scoped table: a single schema tag with typed key and value.
pub trait WalletTable {
    const TAG: u8;
    /// Key suffix type for the table.
    type Key: Encode + Decode;
    /// Value type for the table.
    type Value: Encode + Decode;

    fn prefix(wid: u32) -> Vec<u8> {
        EncodeBuilder::new()
            .append(&WALLET_PREFIX)
            .append(&wid)
            .append(&Self::TAG)
            .build()
    }

    /// Encodes the full key including the wallet prefix
    fn encode_key(wid: u32, key: &Self::Key) -> Vec<u8> {
        let mut out = Self::prefix(wid);
        out.extend(key.encode());
        out
    }

    /// Decodes the key suffix of a scanned key
    fn decode_key(raw: &[u8]) -> Result<Self::Key, DecodingError> {
        let suffix = raw
            .get(WALLET_PREFIX_LEN..)
            .ok_or_else(|| decode::malformed_input("key shorter than wallet prefix", raw))?;

        Self::Key::decode_all(suffix)
    }

    /// Encodes a range with optional start (inclusive) and end (exclusive)
    /// bounds; unbounded sides cover the whole table.
    fn encode_range(
        wid: u32,
        start: Option<&impl Encode>,
        end: Option<&impl Encode>,
    ) -> Range<Vec<u8>> {
        let prefix = Self::prefix(wid);
        let prefix_range = prefix_key_range(&prefix);

        let start_key = match start {
            Some(start) => {
                let mut key = prefix.clone();
                key.extend(start.encode());
                key
            }
            None => prefix_range.start,
        };

        let end_key = match end {
            Some(end) => {
                let mut key = prefix;
                key.extend(end.encode());
                key
            }
            None => prefix_range.end,
        };

        start_key..end_key
    }
}

/// A table outside any wallet scope, keyed as `tag ‖ suffix`. Used for the
/// directory maps shared by all wallets. The tag must differ from
/// [`WALLET_PREFIX`].
pub trait GlobalTable {
    const TAG: u8;
    type Key: Encode + Decode;
    type Value: Encode + Decode;

    fn encode_key(key: &Self::Key) -> Vec<u8> {
        EncodeBuilder::new().append(&Self::TAG).append(key).build()
    }
}

#[macro_export]
macro_rules! define_wallet_table {
    {
        name: $name:ident,
        tag: $tag:expr,
        key_type: $key_type:ty,
        value_type: $value_type:ty
    } => {
        pub struct $name;

        impl $crate::storage::table::WalletTable for $name {
            const TAG: u8 = $tag;
            type Key = $key_type;
            type Value = $value_type;
        }
    };
}

#[macro_export]
macro_rules! define_global_table {
    {
        name: $name:ident,
        tag: $tag:expr,
        key_type: $key_type:ty,
        value_type: $value_type:ty
    } => {
        pub struct $name;

        impl $crate::storage::table::GlobalTable for $name {
            const TAG: u8 = $tag;
            type Key = $key_type;
            type Value = $value_type;
        }
    };
}
