//! File processing: streaming tokenization with position assignment.
//!
//! The processor reads a file line by line through one tokenizer session
//! and assigns each emitted token its 0-based ordinal in the file's global
//! token stream. The position counter runs across every chunk and through
//! the session's finish phase without resetting.

use ahash::{AHashMap, AHashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use crate::store::Position;
use crate::tokenize::Tokenizer;

/// Reads files and turns them into token position maps.
pub struct FileProcessor {
    tokenizer: Arc<dyn Tokenizer>,
    max_file_size: u64,
}

impl FileProcessor {
    pub fn new(tokenizer: Arc<dyn Tokenizer>, max_file_size: u64) -> Self {
        Self {
            tokenizer,
            max_file_size,
        }
    }

    /// Whether `path` is currently indexable: an existing regular file
    /// within the size limit.
    pub fn can_process(&self, path: &Path) -> bool {
        match std::fs::metadata(path) {
            Ok(meta) => meta.is_file() && meta.len() <= self.max_file_size,
            Err(_) => false,
        }
    }

    /// Token -> positions for `path`, or `None` when the file is not
    /// indexable right now (missing, unreadable, not valid text, too
    /// large). Callers treat `None` as removal.
    pub fn positions(&self, path: &Path) -> Option<AHashMap<String, Vec<Position>>> {
        if !self.can_process(path) {
            return None;
        }

        let file = match File::open(path) {
            Ok(file) => file,
            Err(error) => {
                log::warn!("cannot open {}: {error}", path.display());
                return None;
            }
        };

        let mut reader = BufReader::new(file);
        let mut session = self.tokenizer.session();
        let mut map: AHashMap<String, Vec<Position>> = AHashMap::new();
        let mut next_position: Position = 0;
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    for token in session.process_chunk(&line) {
                        map.entry(token).or_default().push(next_position);
                        next_position += 1;
                    }
                }
                Err(error) => {
                    log::warn!("cannot read {}: {error}", path.display());
                    return None;
                }
            }
        }

        // The finish phase continues the same position counter
        for token in session.finish() {
            map.entry(token).or_default().push(next_position);
            next_position += 1;
        }

        Some(map)
    }

    /// Simple variant: just the token set.
    pub fn token_set(&self, path: &Path) -> Option<AHashSet<String>> {
        self.positions(path)
            .map(|map| map.into_iter().map(|(token, _)| token).collect())
    }
}
