mod common;

use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, OutPoint, Txid};

use coinledger::storage::encdec::{Decode, Encode};
use coinledger::txdb::records::{BlockRecord, Coin, Credit, TxRecord, UNCONFIRMED};
use coinledger::BlockMeta;

use common::{block, block_at, fund_tx, script, spend_tx, outpoint};

#[test]
fn extended_tx_round_trips_unconfirmed() {
    let tx = fund_tx(&script(1), 5_000_000_000);
    let record = TxRecord::from_tx(tx, 1_700_000_000);

    let raw = record.encode();
    let decoded = TxRecord::decode_all(&raw).unwrap();

    assert_eq!(decoded, record);
    assert_eq!(decoded.height, UNCONFIRMED);
    assert!(decoded.block.is_none());

    // wallet metadata sits after the canonical tx bytes
    let tx_len = bitcoin::consensus::serialize(&record.tx).len();
    assert_eq!(raw.len(), tx_len + 8);
    assert_eq!(&raw[tx_len..tx_len + 4], &1_700_000_000u32.to_le_bytes());
}

#[test]
fn extended_tx_round_trips_confirmed() {
    let tx = spend_tx(
        outpoint(&fund_tx(&script(1), 1000), 0),
        vec![(script(2), 900)],
    );

    let mut record = TxRecord::from_tx(tx, 1_700_000_000);
    record.set_block(&block_at(250, 3));

    let raw = record.encode();
    let decoded = TxRecord::decode_all(&raw).unwrap();

    assert_eq!(decoded, record);
    assert_eq!(decoded.height, 250);
    assert_eq!(decoded.block, Some(block(250).hash));
    assert_eq!(decoded.time, block(250).time);
    assert_eq!(decoded.index, 3);
}

#[test]
fn unset_block_restores_mempool_fields() {
    let tx = fund_tx(&script(1), 1000);
    let mut record = TxRecord::from_tx(tx, 42);

    let mempool_bytes = record.encode();
    record.set_block(&block(10));
    record.unset_block();

    assert_eq!(record.encode(), mempool_bytes);
}

#[test]
fn outpoint_value_codec_is_little_endian() {
    let outpoint = OutPoint {
        txid: Txid::from_byte_array([0xcd; 32]),
        vout: 0x01020304,
    };

    let raw = outpoint.encode();
    assert_eq!(raw.len(), 36);
    assert_eq!(&raw[..32], &[0xcd; 32]);
    assert_eq!(&raw[32..], &[0x04, 0x03, 0x02, 0x01]);

    assert_eq!(OutPoint::decode_all(&raw).unwrap(), outpoint);
}

#[test]
fn block_record_codec_and_membership() {
    let meta = BlockMeta {
        hash: BlockHash::from_byte_array([0xee; 32]),
        height: 77,
        time: 1_650_000_000,
        index: 0,
    };

    let mut record = BlockRecord::from_meta(&meta);
    let a = Txid::from_byte_array([1; 32]);
    let b = Txid::from_byte_array([2; 32]);

    assert!(record.add(a));
    assert!(record.add(b));
    assert!(!record.add(a));

    let raw = record.encode();
    assert_eq!(raw.len(), 32 + 4 + 4 + 4 + 64);
    assert_eq!(BlockRecord::decode_all(&raw).unwrap(), record);

    assert!(record.remove(&a));
    assert!(!record.remove(&a));
    assert!(record.remove(&b));
    assert!(record.is_empty());
}

#[test]
fn credit_round_trips_with_script() {
    let credit = Credit {
        coin: Coin {
            value: 123_456_789,
            script: script(9),
            height: 500,
            coinbase: false,
        },
        spent: true,
    };

    assert_eq!(Credit::decode_all(&credit.encode()).unwrap(), credit);
}

#[test]
fn truncated_records_fail_to_decode() {
    let tx = fund_tx(&script(1), 1000);
    let record = TxRecord::from_tx(tx, 42);
    let raw = record.encode();

    assert!(TxRecord::decode_all(&raw[..raw.len() - 1]).is_err());
    assert!(Coin::decode_all(&[0u8; 4]).is_err());
    assert!(OutPoint::decode_all(&[0u8; 35]).is_err());
}
