use tracing::info;

use crate::error::Result;
use crate::model::SecretRecord;
use crate::store::RecordStore;

/// Returned in place of a secret when nothing was stored before the submission.
pub const FIRST_SUBMITTER: &str = "You are the first!";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// The secret handed out, as persisted after its usage count was bumped.
    Rotated(SecretRecord),
    FirstSubmitter,
}

impl ExchangeOutcome {
    /// What the submitter gets to read.
    pub fn secret(&self) -> &str {
        match self {
            ExchangeOutcome::Rotated(record) => &record.payload,
            ExchangeOutcome::FirstSubmitter => FIRST_SUBMITTER,
        }
    }
}

/// Stores `payload` and hands back the least-shown other secret.
///
/// Validation happens before any I/O. Storing the new secret and advancing the
/// rotation counter are two separate atomic writes; if the second never
/// happens the new secret is still kept.
pub async fn exchange_secret(store: &RecordStore, payload: impl Into<String>) -> Result<ExchangeOutcome> {
    let submitted = SecretRecord::new(payload);
    submitted.validate()?;

    let stored = store.save(&submitted).await?;

    let Some(next) = store.find_next_excluding(&stored.id).await? else {
        info!(id = %stored.id, "first secret stored");
        return Ok(ExchangeOutcome::FirstSubmitter);
    };

    let shown = store
        .update_atomically(&next, |record| record.usage_count += 1)
        .await?;

    info!(
        stored = %stored.id,
        returned = %shown.id,
        usage_count = shown.usage_count,
        "secret exchanged"
    );
    Ok(ExchangeOutcome::Rotated(shown))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::collection::MemoryCollection;

    #[tokio::test]
    async fn submitter_never_gets_own_secret() {
        let store = RecordStore::new(Arc::new(MemoryCollection::new()));
        let first = exchange_secret(&store, "the very first one").await.unwrap();
        assert_eq!(first, ExchangeOutcome::FirstSubmitter);
        assert_eq!(first.secret(), FIRST_SUBMITTER);

        let second = exchange_secret(&store, "the second secret").await.unwrap();
        assert_eq!(second.secret(), "the very first one");
    }
}
