//! Durable collection backed by an append-only [`Segment`].
//!
//! Only the latest entry per id is live. The in-memory indexes are rebuilt by
//! replaying the segment on open; `compact` rewrites the file with live
//! documents only.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Collection, Filter, SortOrder};
use crate::bloom::BloomFilter;
use crate::error::StorageError;
use crate::model::Document;
use crate::storage::{Entry, Segment};

const BLOOM_CAPACITY: usize = 1_000_000;
const BLOOM_FP_RATE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    offset: u64,
    showcount: u64,
}

/// Outcome of a compaction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompactionStats {
    pub live: usize,
    pub dropped: usize,
}

struct SegmentState {
    segment: Segment,
    strict: bool,
    /// id -> latest live entry
    index: BTreeMap<String, Slot>,
    /// (showcount, id), ordered for rotation
    rotation: BTreeSet<(u64, String)>,
    bloom: BloomFilter,
    entries: usize,
}

impl SegmentState {
    fn load(path: &Path, strict: bool) -> Result<Self, StorageError> {
        let mut segment = Segment::new(path, strict)?;
        let replayed = segment.replay()?;

        let mut state = Self {
            segment,
            strict,
            index: BTreeMap::new(),
            rotation: BTreeSet::new(),
            bloom: BloomFilter::new(BLOOM_CAPACITY, BLOOM_FP_RATE),
            entries: 0,
        };
        for (offset, entry) in replayed {
            state.apply(offset, &entry);
        }
        Ok(state)
    }

    fn apply(&mut self, offset: u64, entry: &Entry) {
        self.entries += 1;
        match entry {
            Entry::Put(doc) => {
                let slot = Slot { offset, showcount: doc.showcount };
                if let Some(old) = self.index.insert(doc.id.clone(), slot) {
                    self.rotation.remove(&(old.showcount, doc.id.clone()));
                }
                self.rotation.insert((doc.showcount, doc.id.clone()));
                self.bloom.insert(&doc.id);
            }
            Entry::Remove(id) => {
                if let Some(old) = self.index.remove(id) {
                    self.rotation.remove(&(old.showcount, id.clone()));
                }
            }
        }
    }

    fn log(&mut self, entry: Entry) -> Result<(), StorageError> {
        let offset = self.segment.append(&entry)?;
        self.apply(offset, &entry);
        Ok(())
    }

    fn load_doc(&self, slot: Slot) -> Result<Document, StorageError> {
        match self.segment.read(slot.offset)? {
            Entry::Put(doc) => Ok(doc),
            Entry::Remove(id) => Err(StorageError::Codec {
                offset: slot.offset,
                reason: format!("index points at a removal of '{}'", id),
            }),
        }
    }

    fn get(&self, id: &str) -> Result<Option<Document>, StorageError> {
        if !self.bloom.may_contain(id) {
            return Ok(None);
        }
        match self.index.get(id) {
            Some(slot) => self.load_doc(*slot).map(Some),
            None => Ok(None),
        }
    }

    fn find_one(&self, filter: &Filter, sort: SortOrder) -> Result<Option<Document>, StorageError> {
        if let Some(id) = filter.pinned_id() {
            return Ok(self.get(id)?.filter(|doc| filter.matches(doc)));
        }

        let candidates: Box<dyn Iterator<Item = (&String, Slot)> + '_> = match sort {
            SortOrder::Natural => Box::new(self.index.iter().map(|(id, slot)| (id, *slot))),
            SortOrder::Rotation => Box::new(self.rotation.iter().filter_map(|(_, id)| {
                self.index.get(id).map(|slot| (id, *slot))
            })),
        };

        for (id, slot) in candidates {
            if let Filter::ExcludeId(excluded) = filter {
                if id == excluded {
                    continue;
                }
            }
            let doc = self.load_doc(slot)?;
            if filter.matches(&doc) {
                return Ok(Some(doc));
            }
        }
        Ok(None)
    }

    fn compact(&mut self) -> Result<CompactionStats, StorageError> {
        let path = self.segment.file_path.clone();
        let tmp_path = path.with_extension("compacted");

        let mut fresh = Segment::new(&tmp_path, false)?;
        if !fresh.is_empty() {
            // Leftover from an interrupted compaction.
            drop(fresh);
            fs::remove_file(&tmp_path)?;
            fresh = Segment::new(&tmp_path, false)?;
        }

        let mut index = BTreeMap::new();
        let mut bloom = self.bloom.cleared();
        for (id, slot) in &self.index {
            let doc = self.load_doc(*slot)?;
            let offset = fresh.append(&Entry::Put(doc))?;
            index.insert(id.clone(), Slot { offset, showcount: slot.showcount });
            bloom.insert(id);
        }
        fresh.sync()?;
        drop(fresh);

        fs::rename(&tmp_path, &path)?;
        self.segment = Segment::new(&path, self.strict)?;

        let stats = CompactionStats {
            live: index.len(),
            dropped: self.entries.saturating_sub(index.len()),
        };
        self.entries = index.len();
        self.index = index;
        self.bloom = bloom;
        Ok(stats)
    }
}

/// Durable [`Collection`] over a single segment file.
pub struct SegmentCollection {
    path: PathBuf,
    state: Arc<Mutex<SegmentState>>,
}

impl fmt::Debug for SegmentCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("SegmentCollection");
        s.field("path", &self.path);
        if let Ok(state) = self.state.try_lock() {
            s.field("live", &state.index.len())
            .field("entries", &state.entries)
            .field("bytes", &state.segment.len());
        }
        s.finish()
    }
}

impl SegmentCollection {
    /// Opens the segment at `path`, replaying it into memory.
    pub async fn open(path: impl AsRef<Path>, strict_durability: bool) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let load_path = path.clone();
        let state = tokio::task::spawn_blocking(move || SegmentState::load(&load_path, strict_durability)).await??;

        info!(
            path = %path.display(),
            live = state.index.len(),
            entries = state.entries,
            strict_durability,
            "segment collection opened"
        );

        Ok(Self {
            path,
            state: Arc::new(Mutex::new(state)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrites the segment keeping only live documents.
    pub async fn compact(&self) -> Result<CompactionStats, StorageError> {
        let stats = self.with_state(|state| state.compact()).await?;
        info!(path = %self.path.display(), live = stats.live, dropped = stats.dropped, "segment compacted");
        Ok(stats)
    }

    /// Total number of logged entries, superseded ones included.
    pub async fn entry_count(&self) -> Result<usize, StorageError> {
        self.with_state(|state| Ok(state.entries)).await
    }

    async fn with_state<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SegmentState) -> Result<T, StorageError> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || {
            let mut guard = state.lock().map_err(|_| StorageError::Poisoned)?;
            f(&mut guard)
        })
        .await?
    }
}

#[async_trait]
impl Collection for SegmentCollection {
    async fn find_one(&self, filter: &Filter, sort: SortOrder) -> Result<Option<Document>, StorageError> {
        let filter = filter.clone();
        self.with_state(move |state| state.find_one(&filter, sort)).await
    }

    async fn insert_one(&self, doc: Document) -> Result<(), StorageError> {
        self.with_state(move |state| {
            if state.bloom.may_contain(&doc.id) && state.index.contains_key(&doc.id) {
                return Err(StorageError::DuplicateId(doc.id));
            }
            debug!(id = %doc.id, "segment insert");
            state.log(Entry::Put(doc))
        })
        .await
    }

    async fn find_one_and_replace(&self, filter: &Filter, doc: Document) -> Result<Option<Document>, StorageError> {
        let filter = filter.clone();
        self.with_state(move |state| {
            let current = match state.get(&doc.id)? {
                Some(current) if filter.matches(&current) => current,
                _ => return Ok(None),
            };
            debug!(id = %doc.id, rev_num = doc.rev_num, "segment replace");
            state.log(Entry::Put(doc))?;
            Ok(Some(current))
        })
        .await
    }

    async fn delete_one(&self, id: &str) -> Result<bool, StorageError> {
        let id = id.to_string();
        self.with_state(move |state| {
            if !state.index.contains_key(&id) {
                return Ok(false);
            }
            state.log(Entry::Remove(id))?;
            Ok(true)
        })
        .await
    }

    async fn count_documents(&self) -> Result<u64, StorageError> {
        self.with_state(|state| Ok(state.index.len() as u64)).await
    }
}
