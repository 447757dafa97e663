//! Secret exchange: submit a secret, receive the least-shown secret someone
//! else submitted before you.
//!
//! Records are versioned documents written with compare-and-swap on their
//! revision triple; see [`store::RecordStore`].

pub mod bloom;
pub mod collection;
pub mod config;
pub mod error;
pub mod exchange;
pub mod manager;
pub mod model;
pub mod parser;
pub mod server;
pub mod storage;
pub mod store;

pub use collection::{Collection, Filter, MemoryCollection, SegmentCollection, SortOrder};
pub use error::{Result, StorageError, StoreError, ValidationError};
pub use exchange::{exchange_secret, ExchangeOutcome, FIRST_SUBMITTER};
pub use model::{Document, RevisionTriple, SecretRecord, MIN_SECRET_LEN};
pub use store::{RecordStore, RetryPolicy};
