//! Optimistic-concurrency access to secret records.
//!
//! Every write is a compare-and-swap on the record's revision triple. Losing a
//! race surfaces as [`StoreError::Conflict`] from [`RecordStore::save`];
//! [`RecordStore::update_atomically`] absorbs it by reloading and re-applying
//! the mutation, with exponential backoff and a hard attempt limit.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::collection::{Collection, Filter, SortOrder};
use crate::error::{Result, StorageError, StoreError};
use crate::model::SecretRecord;

/// Bounds for the conflict-retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Save attempts before giving up, the first one included.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Retries immediately. Mostly useful in tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// `backoff` plus up to half of it again as random jitter.
    fn jittered(&self, backoff: Duration) -> Duration {
        let ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        if ms == 0 {
            return Duration::ZERO;
        }
        let jitter = rand::thread_rng().gen_range(0..=ms / 2);
        Duration::from_millis(ms.saturating_add(jitter))
    }

    fn next_backoff(&self, backoff: Duration) -> Duration {
        backoff.saturating_mul(2).min(self.max_backoff)
    }
}

/// Record-level operations over an injected [`Collection`] handle.
#[derive(Debug, Clone)]
pub struct RecordStore {
    collection: Arc<dyn Collection>,
    retry: RetryPolicy,
}

impl RecordStore {
    pub fn new(collection: Arc<dyn Collection>) -> Self {
        Self {
            collection,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn collection(&self) -> &Arc<dyn Collection> {
        &self.collection
    }

    /// Point lookup. A missing id is `Ok(None)`.
    pub async fn find_by_id(&self, id: &str) -> Result<Option<SecretRecord>> {
        let doc = self.collection.find_one(&Filter::Id(id.to_string()), SortOrder::Natural).await?;
        Ok(doc.map(SecretRecord::from_document))
    }

    /// The record most due to be shown: lowest usage count, then lowest id.
    pub async fn find_next(&self) -> Result<Option<SecretRecord>> {
        self.select_next(Filter::All).await
    }

    /// Like [`find_next`](Self::find_next) but never returns `id`.
    pub async fn find_next_excluding(&self, id: &str) -> Result<Option<SecretRecord>> {
        self.select_next(Filter::ExcludeId(id.to_string())).await
    }

    async fn select_next(&self, filter: Filter) -> Result<Option<SecretRecord>> {
        let doc = self.collection.find_one(&filter, SortOrder::Rotation).await?;
        Ok(doc.map(SecretRecord::from_document))
    }

    pub async fn count(&self) -> Result<u64> {
        Ok(self.collection.count_documents().await?)
    }

    /// Persists the next revision of `record` and returns it.
    ///
    /// The caller's value is left untouched; on success rebind to the returned
    /// record. Revision 1 is an insert, anything later is a conditional replace
    /// against the revision triple `record` carries. Either losing a race or
    /// colliding on a fresh id yields [`StoreError::Conflict`].
    pub async fn save(&self, record: &SecretRecord) -> Result<SecretRecord> {
        record.validate()?;

        let next = record.next_revision();
        let doc = next.to_document();

        if next.revision_number == 1 {
            match self.collection.insert_one(doc).await {
                Ok(()) => {}
                Err(StorageError::DuplicateId(id)) => return Err(StoreError::Conflict { id }),
                Err(e) => return Err(e.into()),
            }
        } else {
            let expected = Filter::Revision(record.revision());
            if self.collection.find_one_and_replace(&expected, doc).await?.is_none() {
                return Err(StoreError::Conflict { id: record.id.clone() });
            }
        }

        debug!(id = %next.id, revision = next.revision_number, "record saved");
        Ok(next)
    }

    /// Read-modify-write of a single record.
    ///
    /// Applies `mutate` to a copy of the latest known state and saves it. On a
    /// conflict the record is reloaded and `mutate` runs again on the fresh
    /// state, so it must be safe to apply more than once. Fails with
    /// [`StoreError::NotFound`] if the record disappears and with
    /// [`StoreError::RetryExhausted`] once the retry policy runs out.
    pub async fn update_atomically<F>(&self, record: &SecretRecord, mut mutate: F) -> Result<SecretRecord>
    where
        F: FnMut(&mut SecretRecord) + Send,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut current = record.clone();
        let mut backoff = self.retry.initial_backoff;

        for attempt in 1..=max_attempts {
            let mut candidate = current.clone();
            mutate(&mut candidate);

            match self.save(&candidate).await {
                Ok(saved) => return Ok(saved),
                Err(StoreError::Conflict { id }) => {
                    debug!(%id, attempt, "revision conflict, reloading");
                    current = self
                        .find_by_id(&id)
                        .await?
                        .ok_or_else(|| StoreError::NotFound { id: id.clone() })?;

                    if attempt < max_attempts {
                        let delay = self.retry.jittered(backoff);
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        backoff = self.retry.next_backoff(backoff);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        warn!(id = %record.id, attempts = max_attempts, "giving up on contended record");
        Err(StoreError::RetryExhausted {
            id: record.id.clone(),
            attempts: max_attempts,
        })
    }
}
