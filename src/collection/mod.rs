//! Store-handle contract over a flat collection of documents keyed by id.
//!
//! Every backend makes a single `insert_one` / `find_one_and_replace` call
//! atomic with respect to other writers of the same id. Nothing spans two
//! documents.

pub mod memory;
pub mod segment;

use std::cmp::Ordering;
use std::fmt;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::model::{Document, RevisionTriple};

pub use memory::MemoryCollection;
pub use segment::SegmentCollection;

/// Document matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    All,
    Id(String),
    /// Exact revision triple. Used for conditional replaces.
    Revision(RevisionTriple),
    ExcludeId(String),
}

impl Filter {
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Id(id) => doc.id == *id,
            Filter::Revision(expected) => doc.matches_revision(expected),
            Filter::ExcludeId(id) => doc.id != *id,
        }
    }

    /// The single id this filter pins down, if any.
    pub fn pinned_id(&self) -> Option<&str> {
        match self {
            Filter::Id(id) => Some(id),
            Filter::Revision(triple) => Some(&triple.id),
            Filter::All | Filter::ExcludeId(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Ascending id.
    #[default]
    Natural,
    /// Least shown first, ties broken by ascending id.
    Rotation,
}

impl SortOrder {
    pub fn compare(self, a: &Document, b: &Document) -> Ordering {
        match self {
            SortOrder::Natural => a.id.cmp(&b.id),
            SortOrder::Rotation => (a.showcount, &a.id).cmp(&(b.showcount, &b.id)),
        }
    }
}

/// Picks the first document matching `filter` under `sort`.
pub(crate) fn select<'a, I>(docs: I, filter: &Filter, sort: SortOrder) -> Option<&'a Document>
where
    I: IntoIterator<Item = &'a Document>,
{
    docs.into_iter()
        .filter(|doc| filter.matches(doc))
        .min_by(|a, b| sort.compare(a, b))
}

#[async_trait]
pub trait Collection: Send + Sync + fmt::Debug {
    /// First matching document under `sort`, or `None`.
    async fn find_one(&self, filter: &Filter, sort: SortOrder) -> Result<Option<Document>, StorageError>;

    /// Inserts a new document. Fails with `DuplicateId` when the id is taken.
    async fn insert_one(&self, doc: Document) -> Result<(), StorageError>;

    /// Atomically replaces the document stored under `doc.id` when it matches
    /// `filter`. Returns the replaced document, or `None` if nothing matched.
    async fn find_one_and_replace(&self, filter: &Filter, doc: Document) -> Result<Option<Document>, StorageError>;

    /// Removes a document. Returns whether it existed.
    async fn delete_one(&self, id: &str) -> Result<bool, StorageError>;

    async fn count_documents(&self) -> Result<u64, StorageError>;
}
