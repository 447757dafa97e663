use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Shortest secret (in characters) the exchange accepts.
pub const MIN_SECRET_LEN: usize = 10;

/// Compare-and-swap key of a stored document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RevisionTriple {
    pub id: String,
    pub revision_id: Option<String>,
    pub revision_number: u64,
}

/// Storage representation of a record. Field names match the persisted shape.
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: String,

    pub secret: String,

    pub showcount: u64,

    #[serde(rename = "_revId")]
    pub rev_id: Option<String>,

    #[serde(rename = "_revNum")]
    pub rev_num: u64,
}

impl Document {
    pub fn revision(&self) -> RevisionTriple {
        RevisionTriple {
            id: self.id.clone(),
            revision_id: self.rev_id.clone(),
            revision_number: self.rev_num,
        }
    }

    pub fn matches_revision(&self, expected: &RevisionTriple) -> bool {
        self.id == expected.id
            && self.rev_id == expected.revision_id
            && self.rev_num == expected.revision_number
    }
}

/// One stored secret together with its rotation counter and revision token.
///
/// Records are plain values: persisting one never mutates it in place, the
/// store hands back the newly persisted revision instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRecord {
    pub id: String,
    pub payload: String,
    pub usage_count: u64,
    pub revision_id: Option<String>,
    pub revision_number: u64,
}

impl SecretRecord {
    /// Builds an unpersisted record with a fresh random id. Does not validate.
    pub fn new(payload: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), payload)
    }

    pub fn with_id(id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
            usage_count: 0,
            revision_id: None,
            revision_number: 0,
        }
    }

    /// Checks the payload rules. Has no side effects and performs no I/O.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let actual = self.payload.chars().count();
        if actual < MIN_SECRET_LEN {
            return Err(ValidationError::TooShort { min: MIN_SECRET_LEN, actual });
        }
        Ok(())
    }

    pub fn is_persisted(&self) -> bool {
        self.revision_number > 0
    }

    pub fn revision(&self) -> RevisionTriple {
        RevisionTriple {
            id: self.id.clone(),
            revision_id: self.revision_id.clone(),
            revision_number: self.revision_number,
        }
    }

    /// Returns the revision that follows this one, carrying a new random token.
    pub(crate) fn next_revision(&self) -> Self {
        Self {
            revision_id: Some(Uuid::new_v4().to_string()),
            revision_number: self.revision_number + 1,
            ..self.clone()
        }
    }

    pub fn to_document(&self) -> Document {
        Document {
            id: self.id.clone(),
            secret: self.payload.clone(),
            showcount: self.usage_count,
            rev_id: self.revision_id.clone(),
            rev_num: self.revision_number,
        }
    }

    pub fn from_document(doc: Document) -> Self {
        Self {
            id: doc.id,
            payload: doc.secret,
            usage_count: doc.showcount,
            revision_id: doc.rev_id,
            revision_number: doc.rev_num,
        }
    }
}

impl From<Document> for SecretRecord {
    fn from(doc: Document) -> Self {
        Self::from_document(doc)
    }
}

impl From<&SecretRecord> for Document {
    fn from(record: &SecretRecord) -> Self {
        record.to_document()
    }
}
