//! Service configuration.
//!
//! All configuration is code-level: an [`IndexConfig`] value handed to the
//! service constructor. The library reads no environment variables and no
//! config files.

use std::thread;
use std::time::Duration;

/// Default maximum size of an indexable file (larger files are skipped)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Default interval at which the watcher thread checks its shutdown flag
pub const DEFAULT_WATCH_POLL_MS: u64 = 100;

/// Configuration for a [`FileIndexService`](crate::FileIndexService)
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Number of indexing worker threads
    pub worker_threads: usize,
    /// Watcher thread poll interval in milliseconds
    pub watch_poll_ms: u64,
    /// Files larger than this are treated as unprocessable
    pub max_file_size: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            watch_poll_ms: DEFAULT_WATCH_POLL_MS,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl IndexConfig {
    pub fn watch_poll_interval(&self) -> Duration {
        Duration::from_millis(self.watch_poll_ms)
    }
}

/// Default pool size: at least two workers, one per logical CPU otherwise
fn default_worker_threads() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .max(2)
}
