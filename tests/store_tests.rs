//! Integration tests for the optimistic-concurrency record store.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use secret_exchange::{
    Collection, Document, Filter, MemoryCollection, RecordStore, RetryPolicy, SecretRecord, SortOrder,
    StorageError, StoreError,
};

fn memory_store(max_attempts: u32) -> (Arc<MemoryCollection>, RecordStore) {
    let collection = Arc::new(MemoryCollection::new());
    let store = RecordStore::new(collection.clone()).with_retry_policy(RetryPolicy::immediate(max_attempts));
    (collection, store)
}

// ---------------------------------------------------------------------------
// Competing saves
// ---------------------------------------------------------------------------

#[tokio::test]
async fn exactly_one_of_two_stale_saves_wins() {
    let (_col, store) = memory_store(8);
    let saved = store.save(&SecretRecord::new("shared secret text")).await.unwrap();

    // Two callers load the same revision.
    let mut a = store.find_by_id(&saved.id).await.unwrap().unwrap();
    let mut b = store.find_by_id(&saved.id).await.unwrap().unwrap();
    a.usage_count += 1;
    b.usage_count += 10;

    let a_saved = store.save(&a).await.unwrap();
    assert_eq!(a_saved.revision_number, 2);

    let err = store.save(&b).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict { ref id } if *id == saved.id));

    // The loser retries through the update protocol on top of the winner.
    let b_saved = store.update_atomically(&b, |r| r.usage_count += 10).await.unwrap();
    assert_eq!(b_saved.revision_number, 3);
    assert_eq!(b_saved.usage_count, 11);

    let stored = store.find_by_id(&saved.id).await.unwrap().unwrap();
    assert_eq!(stored, b_saved);
}

#[tokio::test]
async fn concurrent_increments_all_land() {
    let (_col, store) = memory_store(128);
    let record = store.save(&SecretRecord::new("hot record in demand")).await.unwrap();

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let store = store.clone();
            let record = record.clone();
            tokio::spawn(async move { store.update_atomically(&record, |r| r.usage_count += 1).await })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let stored = store.find_by_id(&record.id).await.unwrap().unwrap();
    assert_eq!(stored.usage_count, 16);
    assert_eq!(stored.revision_number, 17);
}

// ---------------------------------------------------------------------------
// Failure modes of the retry loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn update_after_delete_is_not_found() {
    let (col, store) = memory_store(8);
    let record = store.save(&SecretRecord::new("soon to be removed")).await.unwrap();

    assert!(col.delete_one(&record.id).await.unwrap());

    let err = store.update_atomically(&record, |r| r.usage_count += 1).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { ref id } if *id == record.id));
}

/// Accepts reads but reports every conditional replace as a miss.
#[derive(Debug, Default)]
struct AlwaysContended {
    inner: MemoryCollection,
    replaces: AtomicU32,
}

#[async_trait]
impl Collection for AlwaysContended {
    async fn find_one(&self, filter: &Filter, sort: SortOrder) -> Result<Option<Document>, StorageError> {
        self.inner.find_one(filter, sort).await
    }

    async fn insert_one(&self, doc: Document) -> Result<(), StorageError> {
        self.inner.insert_one(doc).await
    }

    async fn find_one_and_replace(&self, _filter: &Filter, _doc: Document) -> Result<Option<Document>, StorageError> {
        self.replaces.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }

    async fn delete_one(&self, id: &str) -> Result<bool, StorageError> {
        self.inner.delete_one(id).await
    }

    async fn count_documents(&self) -> Result<u64, StorageError> {
        self.inner.count_documents().await
    }
}

#[tokio::test]
async fn sustained_contention_exhausts_retries() {
    let collection = Arc::new(AlwaysContended::default());
    let store = RecordStore::new(collection.clone()).with_retry_policy(RetryPolicy::immediate(5));

    let record = store.save(&SecretRecord::new("never gets updated")).await.unwrap();
    let err = store.update_atomically(&record, |r| r.usage_count += 1).await.unwrap_err();

    assert!(matches!(err, StoreError::RetryExhausted { attempts: 5, .. }));
    assert_eq!(collection.replaces.load(Ordering::SeqCst), 5);

    // Nothing changed underneath.
    let stored = store.find_by_id(&record.id).await.unwrap().unwrap();
    assert_eq!(stored.usage_count, 0);
    assert_eq!(stored.revision_number, 1);
}

#[tokio::test]
async fn backoff_policy_still_converges() {
    let collection = Arc::new(MemoryCollection::new());
    let store = RecordStore::new(collection).with_retry_policy(RetryPolicy {
        max_attempts: 64,
        initial_backoff: std::time::Duration::from_millis(1),
        max_backoff: std::time::Duration::from_millis(4),
    });
    let record = store.save(&SecretRecord::new("slow and steady")).await.unwrap();

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            let record = record.clone();
            tokio::spawn(async move { store.update_atomically(&record, |r| r.usage_count += 1).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(store.find_by_id(&record.id).await.unwrap().unwrap().usage_count, 4);
}

#[tokio::test]
async fn update_validates_the_mutated_record() {
    let (_col, store) = memory_store(8);
    let record = store.save(&SecretRecord::new("valid to begin with")).await.unwrap();

    let err = store
        .update_atomically(&record, |r| r.payload = "tiny".into())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
    assert_eq!(store.find_by_id(&record.id).await.unwrap().unwrap(), record);
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// A stored document at revision 1 with the given usage count.
fn seeded(id: &str, usage: u64) -> Document {
    Document {
        id: id.into(),
        secret: format!("secret number {}", id),
        showcount: usage,
        rev_id: Some(format!("{}-r1", id)),
        rev_num: 1,
    }
}

#[tokio::test]
async fn find_next_picks_lowest_usage_then_id() {
    let (col, store) = memory_store(8);

    for (id, usage) in [("c", 0), ("a", 3), ("b", 0), ("d", 1)] {
        col.insert_one(seeded(id, usage)).await.unwrap();
    }

    assert_eq!(store.find_next().await.unwrap().unwrap().id, "b");
    assert_eq!(store.find_next_excluding("b").await.unwrap().unwrap().id, "c");
    assert_eq!(store.count().await.unwrap(), 4);
}
