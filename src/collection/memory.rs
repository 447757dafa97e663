use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{select, Collection, Filter, SortOrder};
use crate::error::StorageError;
use crate::model::Document;

/// Volatile collection. Each write holds the lock across compare and swap.
#[derive(Debug, Default)]
pub struct MemoryCollection {
    docs: RwLock<BTreeMap<String, Document>>,
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Collection for MemoryCollection {
    async fn find_one(&self, filter: &Filter, sort: SortOrder) -> Result<Option<Document>, StorageError> {
        let docs = self.docs.read().await;
        if let Some(id) = filter.pinned_id() {
            return Ok(docs.get(id).filter(|doc| filter.matches(doc)).cloned());
        }
        Ok(select(docs.values(), filter, sort).cloned())
    }

    async fn insert_one(&self, doc: Document) -> Result<(), StorageError> {
        let mut docs = self.docs.write().await;
        if docs.contains_key(&doc.id) {
            return Err(StorageError::DuplicateId(doc.id));
        }
        docs.insert(doc.id.clone(), doc);
        Ok(())
    }

    async fn find_one_and_replace(&self, filter: &Filter, doc: Document) -> Result<Option<Document>, StorageError> {
        let mut docs = self.docs.write().await;
        match docs.get_mut(&doc.id) {
            Some(current) if filter.matches(current) => Ok(Some(std::mem::replace(current, doc))),
            _ => Ok(None),
        }
    }

    async fn delete_one(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.docs.write().await.remove(id).is_some())
    }

    async fn count_documents(&self) -> Result<u64, StorageError> {
        Ok(self.docs.read().await.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, rev_num: u64) -> Document {
        Document {
            id: id.into(),
            secret: "memory secret".into(),
            showcount: 0,
            rev_id: Some(format!("{}-{}", id, rev_num)),
            rev_num,
        }
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_ids() {
        let col = MemoryCollection::new();
        col.insert_one(doc("a", 1)).await.unwrap();
        let err = col.insert_one(doc("a", 1)).await.unwrap_err();
        assert!(matches!(err, StorageError::DuplicateId(id) if id == "a"));
        assert_eq!(col.count_documents().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn replace_only_when_revision_matches() {
        let col = MemoryCollection::new();
        let v1 = doc("a", 1);
        col.insert_one(v1.clone()).await.unwrap();

        let previous = col
            .find_one_and_replace(&Filter::Revision(v1.revision()), doc("a", 2))
            .await
            .unwrap();
        assert_eq!(previous, Some(v1.clone()));

        // v1 is stale now
        let missed = col
            .find_one_and_replace(&Filter::Revision(v1.revision()), doc("a", 3))
            .await
            .unwrap();
        assert_eq!(missed, None);

        let stored = col.find_one(&Filter::Id("a".into()), SortOrder::Natural).await.unwrap();
        assert_eq!(stored.map(|d| d.rev_num), Some(2));
    }

    #[tokio::test]
    async fn delete_and_missing_lookups() {
        let col = MemoryCollection::new();
        col.insert_one(doc("a", 1)).await.unwrap();
        assert!(col.delete_one("a").await.unwrap());
        assert!(!col.delete_one("a").await.unwrap());
        assert_eq!(col.find_one(&Filter::Id("a".into()), SortOrder::Natural).await.unwrap(), None);
        assert_eq!(col.find_one(&Filter::All, SortOrder::Rotation).await.unwrap(), None);
        assert_eq!(
            col.find_one_and_replace(&Filter::Id("a".into()), doc("a", 2)).await.unwrap(),
            None
        );
    }
}
