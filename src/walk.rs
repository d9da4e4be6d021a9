//! Filesystem walking.
//!
//! Yields the set of regular files rooted at a path. A file root yields
//! itself; a directory root is walked recursively. Unreadable entries are
//! skipped.

use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

/// Collect every regular file under `root`.
///
/// Standard gitignore/hidden filtering is disabled: the index covers
/// whatever the caller points it at. Symlinks are not followed.
pub fn walk_files(root: &Path) -> Vec<PathBuf> {
    if root.is_file() {
        return vec![root.to_path_buf()];
    }
    if !root.is_dir() {
        return Vec::new();
    }

    WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .build()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .map(|entry| entry.into_path())
        .collect()
}
