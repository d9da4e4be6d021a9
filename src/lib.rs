//! # pindex - Live Positional File Index
//!
//! pindex is an in-process, concurrent file-indexing and phrase-search
//! library. It ingests text files rooted at caller-supplied paths, maintains
//! a positional inverted index from normalized tokens to file locations,
//! follows the filesystem for changes, and answers token and phrase queries
//! against a view that reflects all indexing work scheduled before the query.
//!
//! ## Architecture
//!
//! The crate is organized into these main modules:
//!
//! - [`store`] - Concurrent positional inverted index (sharded)
//! - [`schedule`] - Worker-pool scheduler with per-file dedup and batch handles
//! - [`watch`] - Filesystem watcher pipeline (create/modify/delete dispatch)
//! - [`tokenize`] - Pluggable tokenization (stateless and chunked sessions)
//! - [`process`] - File reading and position assignment
//! - [`service`] - The [`FileIndexService`] facade wiring everything together
//!
//! ## Quick Start
//!
//! ```no_run
//! use pindex::FileIndexService;
//! use std::path::PathBuf;
//!
//! let service = FileIndexService::new();
//! service.index(&[PathBuf::from("/path/to/docs")]);
//!
//! // Queries wait for all previously scheduled indexing to finish.
//! let files = service.query("kotlin").wait();
//! let phrased = service.query_phrase("quick brown fox").wait();
//!
//! service.close();
//! # let _ = (files, phrased);
//! ```
//!
//! ## Guarantees
//!
//! - Per-file updates are atomic: readers see either the previous or the new
//!   entry for a file, never a mix.
//! - At most one indexing run per file is in flight at any time; bursts of
//!   change events for the same file coalesce into a single trailing rerun.
//! - Queries observe a state reflecting every schedule admitted before the
//!   query was issued.

pub mod config;
pub mod error;
pub mod process;
pub mod schedule;
pub mod service;
pub mod store;
pub mod tokenize;
pub mod walk;
pub mod watch;

pub use config::IndexConfig;
pub use error::{IndexError, Result};
pub use process::FileProcessor;
pub use schedule::{CompletionHandle, IndexJob, IndexScheduler};
pub use service::{FileIndexService, SearchFuture};
pub use store::{IndexStore, Position};
pub use tokenize::{Tokenizer, TokenizerSession, WordTokenizer};
pub use watch::FsEvent;
