use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::collection::SegmentCollection;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemProfile {
    pub logical_cores: usize,
    pub worker_threads: usize,
    pub strict_durability: bool, // true = fsync per write, false = OS buffer (faster)
}

impl SystemProfile {
    pub fn detect() -> Self {
        let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::for_cores(cores)
    }

    pub fn for_cores(cores: usize) -> Self {
        // Single core: 1 request worker + 1 for blocking segment I/O, no fsync
        if cores <= 1 {
            warn!(cores, "CPU constraint detected, disabling fsync");
            Self {
                logical_cores: cores,
                worker_threads: 2,
                strict_durability: false,
            }
        } else {
            Self {
                logical_cores: cores,
                worker_threads: cores,
                strict_durability: true,
            }
        }
    }
}

/// Starts the background compaction task.
/// Every `interval` the segment is rewritten without superseded revisions.
pub fn start_compaction_task(collection: Arc<SegmentCollection>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(path = %collection.path().display(), interval_secs = interval.as_secs(), "compaction task started");
        let mut ticker = tokio::time::interval(interval);
        // first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = collection.compact().await {
                error!(error = %e, "compaction failed");
            }
        }
    })
}
