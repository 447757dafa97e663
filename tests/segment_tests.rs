//! Durability tests for the segment-backed collection.

use std::sync::Arc;

use std::io::{Seek, SeekFrom, Write};

use secret_exchange::{
    exchange_secret, Collection, ExchangeOutcome, RecordStore, SecretRecord, SegmentCollection, StorageError,
    StoreError,
};
use tempfile::TempDir;

fn segment_path() -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("secrets.seg");
    (dir, path)
}

#[tokio::test]
async fn records_survive_reopen() {
    let (_dir, path) = segment_path();

    let (a_id, latest) = {
        let store = RecordStore::new(Arc::new(SegmentCollection::open(&path, true).await.unwrap()));
        let a = store.save(&SecretRecord::new("persisted secret A")).await.unwrap();
        exchange_secret(&store, "persisted secret B").await.unwrap();
        let latest = store.find_by_id(&a.id).await.unwrap().unwrap();
        (a.id, latest)
    };

    let store = RecordStore::new(Arc::new(SegmentCollection::open(&path, false).await.unwrap()));
    assert_eq!(store.count().await.unwrap(), 2);

    let reloaded = store.find_by_id(&a_id).await.unwrap().unwrap();
    assert_eq!(reloaded, latest);
    assert_eq!(reloaded.usage_count, 1);
    assert_eq!(reloaded.revision_number, 2);

    // The stale revision 1 is not resurrected by replay.
    let stale = SecretRecord {
        revision_number: 1,
        usage_count: 0,
        ..reloaded.clone()
    };
    assert!(store.save(&stale).await.is_err());

    // Rotation state carries over: B is next.
    let next = store.find_next().await.unwrap().unwrap();
    assert_eq!(next.payload, "persisted secret B");
}

#[tokio::test]
async fn compaction_keeps_live_documents_only() {
    let (_dir, path) = segment_path();
    let collection = Arc::new(SegmentCollection::open(&path, false).await.unwrap());
    let store = RecordStore::new(collection.clone());

    let keep = store.save(&SecretRecord::new("this one stays")).await.unwrap();
    let gone = store.save(&SecretRecord::new("this one is deleted")).await.unwrap();
    let mut current = keep.clone();
    for _ in 0..5 {
        current = store.update_atomically(&current, |r| r.usage_count += 1).await.unwrap();
    }
    assert!(collection.delete_one(&gone.id).await.unwrap());

    // 2 inserts + 5 updates + 1 removal
    assert_eq!(collection.entry_count().await.unwrap(), 8);
    let before = std::fs::metadata(&path).unwrap().len();

    let stats = collection.compact().await.unwrap();
    assert_eq!(stats.live, 1);
    assert_eq!(stats.dropped, 7);
    assert!(std::fs::metadata(&path).unwrap().len() < before);

    // Reads and writes keep working on the compacted file.
    assert_eq!(store.find_by_id(&keep.id).await.unwrap().unwrap(), current);
    assert_eq!(store.find_by_id(&gone.id).await.unwrap(), None);
    let after = store.update_atomically(&current, |r| r.usage_count += 1).await.unwrap();
    assert_eq!(after.usage_count, 6);

    // And a reopen sees the same state.
    drop(store);
    drop(collection);
    let reopened = RecordStore::new(Arc::new(SegmentCollection::open(&path, false).await.unwrap()));
    assert_eq!(reopened.count().await.unwrap(), 1);
    assert_eq!(reopened.find_by_id(&keep.id).await.unwrap().unwrap(), after);
}

#[tokio::test]
async fn exchange_rotates_after_reopen() {
    let (_dir, path) = segment_path();
    {
        let store = RecordStore::new(Arc::new(SegmentCollection::open(&path, false).await.unwrap()));
        assert_eq!(
            exchange_secret(&store, "before the restart").await.unwrap(),
            ExchangeOutcome::FirstSubmitter
        );
    }

    let store = RecordStore::new(Arc::new(SegmentCollection::open(&path, false).await.unwrap()));
    let outcome = exchange_secret(&store, "after the restart").await.unwrap();
    assert_eq!(outcome.secret(), "before the restart");
}

#[tokio::test]
async fn oversized_secret_is_refused_and_store_stays_usable() {
    let (_dir, path) = segment_path();
    let store = RecordStore::new(Arc::new(SegmentCollection::open(&path, false).await.unwrap()));
    let small = store.save(&SecretRecord::new("a reasonable secret")).await.unwrap();

    let err = store
        .save(&SecretRecord::new("x".repeat(17 * 1024 * 1024)))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Storage(StorageError::Codec { .. })), "{:?}", err);
    assert_eq!(store.count().await.unwrap(), 1);

    drop(store);
    let reopened = RecordStore::new(Arc::new(SegmentCollection::open(&path, false).await.unwrap()));
    assert_eq!(reopened.count().await.unwrap(), 1);
    assert_eq!(reopened.find_by_id(&small.id).await.unwrap().unwrap(), small);
}

#[tokio::test]
async fn corrupted_segment_fails_open_without_losing_data() {
    let (_dir, path) = segment_path();
    {
        let store = RecordStore::new(Arc::new(SegmentCollection::open(&path, true).await.unwrap()));
        for i in 0..5 {
            store.save(&SecretRecord::new(format!("durable secret {}", i))).await.unwrap();
        }
    }
    let len = std::fs::metadata(&path).unwrap().len();

    {
        let mut raw = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        raw.seek(SeekFrom::Start(0)).unwrap();
        raw.write_all(&0x00FF_FFFFu32.to_le_bytes()).unwrap();
    }

    let err = SegmentCollection::open(&path, false).await.unwrap_err();
    assert!(matches!(err, StorageError::Codec { offset: 0, .. }), "{:?}", err);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), len);
}
