//! A single shard of the positional index.
//!
//! Each shard owns both views of every file hashed to it: the inverted map
//! (token -> file -> positions) and the file map (file -> token -> positions).
//! Confining a file's entire entry to one shard is what makes per-file
//! replacement atomic under the shard's write lock.

use ahash::{AHashMap, AHashSet};
use std::path::{Path, PathBuf};

use super::Position;

#[derive(Debug, Default)]
pub(crate) struct Shard {
    /// token -> file -> strictly increasing positions
    inverted: AHashMap<String, AHashMap<PathBuf, Vec<Position>>>,
    /// file -> token -> positions (same lists as `inverted`)
    files: AHashMap<PathBuf, AHashMap<String, Vec<Position>>>,
}

impl Shard {
    /// Replace the entry for `path` with `new_positions`.
    ///
    /// Tokens present before but absent from `new_positions` lose their
    /// posting for this file. Empty position lists are pruned on entry, and
    /// an entirely empty update degenerates to removal. When no prior entry
    /// exists, `hint_old_tokens` stands in for the old token set.
    pub fn replace_file(
        &mut self,
        path: &Path,
        mut new_positions: AHashMap<String, Vec<Position>>,
        hint_old_tokens: Option<&AHashSet<String>>,
    ) {
        for list in new_positions.values_mut() {
            list.sort_unstable();
            list.dedup();
        }
        new_positions.retain(|token, list| !token.is_empty() && !list.is_empty());

        if new_positions.is_empty() {
            self.remove_file(path);
            return;
        }

        let old_tokens: AHashSet<String> = match self.files.get(path) {
            Some(entry) => entry.keys().cloned().collect(),
            None => hint_old_tokens.cloned().unwrap_or_default(),
        };

        for token in &old_tokens {
            if !new_positions.contains_key(token) {
                self.drop_posting(token, path);
            }
        }

        for (token, list) in &new_positions {
            self.inverted
                .entry(token.clone())
                .or_default()
                .insert(path.to_path_buf(), list.clone());
        }
        self.files.insert(path.to_path_buf(), new_positions);
    }

    /// Remove `path` everywhere; returns the token set it carried.
    pub fn remove_file(&mut self, path: &Path) -> AHashSet<String> {
        let Some(entry) = self.files.remove(path) else {
            return AHashSet::new();
        };
        let tokens: AHashSet<String> = entry.into_iter().map(|(token, _)| token).collect();
        for token in &tokens {
            self.drop_posting(token, path);
        }
        tokens
    }

    /// Remove one (token, file) posting, pruning the token when empty
    fn drop_posting(&mut self, token: &str, path: &Path) {
        if let Some(posting) = self.inverted.get_mut(token) {
            posting.remove(path);
            if posting.is_empty() {
                self.inverted.remove(token);
            }
        }
    }

    /// Add every file containing `token` to `out`.
    pub fn query_into(&self, token: &str, out: &mut AHashSet<PathBuf>) {
        if let Some(posting) = self.inverted.get(token) {
            out.extend(posting.keys().cloned());
        }
    }

    /// Add every file containing the phrase at consecutive positions to `out`.
    ///
    /// For each candidate file from the first token's posting, each start
    /// position `s` matches iff every following token `t_i` has a posting
    /// for the file containing `s + i`. A file missing any token is skipped
    /// outright. Membership is answered by binary search on the sorted
    /// position lists.
    pub fn query_phrase_into(&self, phrase: &[String], out: &mut AHashSet<PathBuf>) {
        debug_assert!(phrase.len() >= 2);
        let Some(first) = self.inverted.get(&phrase[0]) else {
            return;
        };

        'files: for (path, starts) in first {
            let mut rest = Vec::with_capacity(phrase.len() - 1);
            for token in &phrase[1..] {
                match self.inverted.get(token).and_then(|p| p.get(path)) {
                    Some(list) => rest.push(list),
                    None => continue 'files,
                }
            }

            'starts: for &start in starts {
                for (i, list) in rest.iter().enumerate() {
                    let want = start + 1 + i as Position;
                    if list.binary_search(&want).is_err() {
                        continue 'starts;
                    }
                }
                out.insert(path.clone());
                break;
            }
        }
    }

    /// Token set for `path`, if indexed.
    pub fn tokens_of(&self, path: &Path) -> Option<AHashSet<String>> {
        self.files
            .get(path)
            .map(|entry| entry.keys().cloned().collect())
    }

    /// Positions of `token` within `path`, if both exist.
    pub fn positions_of(&self, path: &Path, token: &str) -> Option<Vec<Position>> {
        self.files.get(path).and_then(|entry| entry.get(token)).cloned()
    }

    /// Merge this shard's token -> files view into `out`.
    pub fn dump_into(&self, out: &mut AHashMap<String, AHashSet<PathBuf>>) {
        for (token, posting) in &self.inverted {
            out.entry(token.clone())
                .or_default()
                .extend(posting.keys().cloned());
        }
    }

    pub fn clear(&mut self) {
        self.inverted.clear();
        self.files.clear();
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn token_count(&self) -> usize {
        self.inverted.len()
    }

    /// Structural consistency check used by tests.
    #[cfg(test)]
    pub fn check_invariants(&self) {
        for (token, posting) in &self.inverted {
            assert!(!posting.is_empty(), "empty posting kept for {token:?}");
            for (path, list) in posting {
                assert!(!list.is_empty(), "empty position list for {token:?}");
                assert!(
                    list.windows(2).all(|w| w[0] < w[1]),
                    "positions not strictly increasing for {token:?}"
                );
                let file_side = self
                    .files
                    .get(path)
                    .and_then(|entry| entry.get(token))
                    .unwrap_or_else(|| panic!("missing file-side entry for {token:?}"));
                assert_eq!(file_side, list, "position mismatch for {token:?}");
            }
        }
        for (path, entry) in &self.files {
            for token in entry.keys() {
                assert!(
                    self.inverted
                        .get(token)
                        .is_some_and(|posting| posting.contains_key(path)),
                    "file-side token {token:?} missing from inverted index"
                );
            }
        }
    }
}
