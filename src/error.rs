use std::io;

/// Errors surfaced by the service facade.
///
/// Worker and watcher threads never propagate errors across the pool
/// boundary; failures there are logged and the affected file is dropped
/// from the index. Only lifecycle misuse and watch registration reach the
/// caller.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("already watching")]
    AlreadyWatching,

    #[error("service is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, IndexError>;
