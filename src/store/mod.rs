//! Concurrent positional inverted index.
//!
//! The store maps normalized tokens to the files containing them together
//! with each occurrence's 0-based position in the file's token stream, and
//! keeps the inverse per-file view used to diff entries on reindex.
//!
//! ## Sharding
//!
//! State is split across a fixed number of shards, each guarded by its own
//! `RwLock`. A file's entire entry lives in the shard its path hashes to,
//! so a per-file replace takes exactly one write lock and mutations on
//! different files contend only on shard collisions. Phrase evaluation for
//! a file happens under that shard's read lock, which is what makes the
//! observed state consistent per file.
//!
//! All returned collections are owned snapshots; no internal state is ever
//! aliased to callers.

mod shard;

use ahash::{AHashMap, AHashSet, RandomState};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};

use shard::Shard;

/// 0-based ordinal of a token within a file's global token stream
pub type Position = u32;

/// Number of independently locked shards
const SHARD_COUNT: usize = 16;

/// Sharded positional inverted index.
///
/// Every operation is safe to call from multiple threads concurrently.
pub struct IndexStore {
    shards: Vec<RwLock<Shard>>,
    hasher: RandomState,
}

impl Default for IndexStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexStore {
    pub fn new() -> Self {
        let shards = (0..SHARD_COUNT).map(|_| RwLock::new(Shard::default())).collect();
        Self {
            shards,
            hasher: RandomState::new(),
        }
    }

    fn shard_for(&self, path: &Path) -> &RwLock<Shard> {
        let hash = self.hasher.hash_one(path);
        &self.shards[(hash as usize) % SHARD_COUNT]
    }

    /// Atomically replace the entry for `path`.
    ///
    /// Tokens from the prior entry absent in `new_positions` are removed
    /// from their postings; an empty `new_positions` is equivalent to
    /// [`remove_file`](Self::remove_file). `hint_old_tokens` is consulted
    /// only when no prior entry exists (recovery from dropped intermediate
    /// state when the caller read the old tokens before reprocessing).
    pub fn replace_file(
        &self,
        path: &Path,
        new_positions: AHashMap<String, Vec<Position>>,
        hint_old_tokens: Option<&AHashSet<String>>,
    ) {
        self.shard_for(path)
            .write()
            .replace_file(path, new_positions, hint_old_tokens);
    }

    /// Remove `path` from all postings; returns the tokens it carried.
    pub fn remove_file(&self, path: &Path) -> AHashSet<String> {
        self.shard_for(path).write().remove_file(path)
    }

    /// Files whose posting contains `token`.
    pub fn query(&self, token: &str) -> AHashSet<PathBuf> {
        let mut out = AHashSet::new();
        for shard in &self.shards {
            shard.read().query_into(token, &mut out);
        }
        out
    }

    /// Files containing `phrase` at consecutive positions.
    ///
    /// A single-token phrase degenerates to [`query`](Self::query); an
    /// empty phrase matches nothing. Tokens must already be normalized.
    pub fn query_phrase(&self, phrase: &[String]) -> AHashSet<PathBuf> {
        match phrase {
            [] => AHashSet::new(),
            [token] => self.query(token),
            _ => {
                let mut out = AHashSet::new();
                for shard in &self.shards {
                    shard.read().query_phrase_into(phrase, &mut out);
                }
                out
            }
        }
    }

    /// Token set currently indexed for `path`, or `None` if absent.
    pub fn tokens_of(&self, path: &Path) -> Option<AHashSet<String>> {
        self.shard_for(path).read().tokens_of(path)
    }

    /// Positions of `token` within `path`, or `None` if either is absent.
    pub fn positions_of(&self, path: &Path, token: &str) -> Option<Vec<Position>> {
        self.shard_for(path).read().positions_of(path, token)
    }

    /// Snapshot of the token -> files mapping (no position data).
    pub fn dump(&self) -> AHashMap<String, AHashSet<PathBuf>> {
        let mut out = AHashMap::new();
        for shard in &self.shards {
            shard.read().dump_into(&mut out);
        }
        out
    }

    /// Drop all state.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.write().clear();
        }
    }

    /// Number of indexed files.
    pub fn file_count(&self) -> usize {
        self.shards.iter().map(|s| s.read().file_count()).sum()
    }

    /// Number of distinct tokens with at least one posting.
    pub fn token_count(&self) -> usize {
        self.shards.iter().map(|s| s.read().token_count()).sum()
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        for shard in &self.shards {
            shard.read().check_invariants();
        }
    }
}
