use coinledger::storage::kv_store::{KvStore, WriteBatch};
use coinledger::storage::rocks::RocksStore;

#[test]
fn rocks_store_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");

    {
        let store = RocksStore::open(dir.path()).expect("open");

        let mut batch = WriteBatch::new();
        batch.put(b"ka".to_vec(), b"va".to_vec());
        batch.put(b"kb".to_vec(), b"vb".to_vec());
        batch.put(b"kc".to_vec(), b"vc".to_vec());
        batch.delete(b"kb".to_vec());
        store.write(batch).expect("write");

        assert_eq!(store.get(b"ka").unwrap(), Some(b"va".to_vec()));
        assert_eq!(store.get(b"kb").unwrap(), None);
        assert!(store.has(b"kc").unwrap());

        let scanned = store
            .scan(b"ka".to_vec()..b"kd".to_vec(), false, 0)
            .unwrap();
        assert_eq!(scanned.len(), 2);
        assert_eq!(scanned[0].0, b"ka".to_vec());

        let reversed = store
            .scan(b"ka".to_vec()..b"kd".to_vec(), true, 1)
            .unwrap();
        assert_eq!(reversed[0].0, b"kc".to_vec());
    }

    // data survives reopen
    let store = RocksStore::open(dir.path()).expect("reopen");
    assert_eq!(store.get(b"ka").unwrap(), Some(b"va".to_vec()));
}
