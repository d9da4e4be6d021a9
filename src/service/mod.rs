//! Service facade.
//!
//! [`FileIndexService`] wires the store, the scheduler, the processor and
//! the watcher pipeline together and exposes the public operations:
//! `index`, `start_watching`, `query`, `query_phrase`, `dump`, `close`.
//!
//! Queries return a [`SearchFuture`] that waits for every indexing job
//! admitted before the query was issued, then evaluates against the store.

use ahash::{AHashMap, AHashSet};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::process::FileProcessor;
use crate::schedule::{CompletionHandle, IndexJob, IndexScheduler};
use crate::store::IndexStore;
use crate::tokenize::{Tokenizer, WordTokenizer};
use crate::walk::walk_files;
use crate::watch::{FileWatcher, FsEvent};

/// A deferred query result.
///
/// Holds the batch completion handle captured when the query was issued;
/// [`wait`](Self::wait) blocks until that batch drains, then evaluates the
/// query against the store. Indexing admitted after the query was issued
/// is not waited for.
pub struct SearchFuture {
    handle: CompletionHandle,
    eval: Box<dyn FnOnce() -> AHashSet<PathBuf> + Send>,
}

impl SearchFuture {
    fn new(handle: CompletionHandle, eval: impl FnOnce() -> AHashSet<PathBuf> + Send + 'static) -> Self {
        Self {
            handle,
            eval: Box::new(eval),
        }
    }

    fn ready(result: AHashSet<PathBuf>) -> Self {
        Self {
            handle: CompletionHandle::completed(),
            eval: Box::new(move || result),
        }
    }

    /// Block until the index is quiescent, then evaluate.
    pub fn wait(self) -> AHashSet<PathBuf> {
        self.handle.wait();
        (self.eval)()
    }

    /// Like [`wait`](Self::wait) with an upper bound; `None` on timeout.
    pub fn wait_timeout(self, timeout: Duration) -> Option<AHashSet<PathBuf>> {
        if self.handle.wait_timeout(timeout) {
            Some((self.eval)())
        } else {
            None
        }
    }

    /// Whether the result is already available without blocking.
    pub fn is_ready(&self) -> bool {
        self.handle.is_complete()
    }
}

/// Everything the indexing and watch paths share.
struct ServiceCore {
    store: Arc<IndexStore>,
    processor: Arc<FileProcessor>,
    scheduler: IndexScheduler,
}

impl ServiceCore {
    /// Build and admit the indexing job for one file.
    fn schedule_file(&self, path: PathBuf) {
        let gate_processor = Arc::clone(&self.processor);
        let processor = Arc::clone(&self.processor);
        let store = Arc::clone(&self.store);
        let job = IndexJob::new(
            move |p| gate_processor.can_process(p),
            move |p| apply_index(&store, &processor, p),
        );
        self.scheduler.schedule(path, job);
    }

    /// Watcher dispatch: creations and modifications are (re-)indexed,
    /// deletions drop straight out of the store.
    fn dispatch(&self, event: FsEvent) {
        match event {
            FsEvent::Created(path) => {
                if path.is_dir() {
                    for file in walk_files(&path) {
                        self.schedule_file(file);
                    }
                } else {
                    self.schedule_file(path);
                }
            }
            FsEvent::Modified(path) => self.schedule_file(path),
            FsEvent::Deleted(path) => {
                self.store.remove_file(&path);
            }
        }
    }
}

/// One indexing run for one file.
///
/// The gate is re-checked here so a deletion racing a scheduled reindex
/// converges on removal instead of resurrecting the entry. The old token
/// set is read before reprocessing and passed as the replace hint.
fn apply_index(store: &IndexStore, processor: &FileProcessor, path: &Path) {
    if !processor.can_process(path) {
        store.remove_file(path);
        return;
    }
    let hint = store.tokens_of(path);
    match processor.positions(path) {
        Some(map) if !map.is_empty() => store.replace_file(path, map, hint.as_ref()),
        Some(_) | None => {
            store.remove_file(path);
        }
    }
}

/// In-process concurrent file index with token and phrase search.
///
/// Multiple instances may coexist; each owns its resources and releases
/// them on [`close`](Self::close) (also run on drop).
pub struct FileIndexService {
    core: Arc<ServiceCore>,
    tokenizer: Arc<dyn Tokenizer>,
    config: IndexConfig,
    watcher: Mutex<Option<FileWatcher>>,
    closed: AtomicBool,
}

impl Default for FileIndexService {
    fn default() -> Self {
        Self::new()
    }
}

impl FileIndexService {
    pub fn new() -> Self {
        Self::with_config(IndexConfig::default())
    }

    pub fn with_config(config: IndexConfig) -> Self {
        Self::with_tokenizer(Arc::new(WordTokenizer), config)
    }

    /// Build a service around a custom tokenizer.
    pub fn with_tokenizer(tokenizer: Arc<dyn Tokenizer>, config: IndexConfig) -> Self {
        let store = Arc::new(IndexStore::new());
        let processor = Arc::new(FileProcessor::new(
            Arc::clone(&tokenizer),
            config.max_file_size,
        ));
        let scheduler = IndexScheduler::new(config.worker_threads);
        Self {
            core: Arc::new(ServiceCore {
                store,
                processor,
                scheduler,
            }),
            tokenizer,
            config,
            watcher: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Walk each root and schedule every regular file for indexing.
    ///
    /// Returns once the work is admitted; use a query to await completion.
    pub fn index(&self, roots: &[PathBuf]) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        for root in roots {
            for file in walk_files(root) {
                self.core.schedule_file(file);
            }
        }
    }

    /// Begin following filesystem changes under `roots`.
    ///
    /// Created and modified files are (re-)indexed, deleted files drop out
    /// of the index, and files inside directories created later are picked
    /// up as well. Fails with [`IndexError::AlreadyWatching`] while a
    /// watcher is active.
    pub fn start_watching(&self, roots: &[PathBuf]) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(IndexError::Closed);
        }
        let mut guard = self.watcher.lock();
        if guard.as_ref().is_some_and(|w| w.is_running()) {
            return Err(IndexError::AlreadyWatching);
        }

        let core = Arc::clone(&self.core);
        let watcher = FileWatcher::spawn(roots, self.config.watch_poll_interval(), move |event| {
            core.dispatch(event)
        })?;
        *guard = Some(watcher);
        Ok(())
    }

    /// Stop following filesystem changes. Idempotent.
    pub fn stop_watching(&self) {
        if let Some(mut watcher) = self.watcher.lock().take() {
            watcher.stop();
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.lock().as_ref().is_some_and(|w| w.is_running())
    }

    /// Files containing the single token `text` (normalized first).
    ///
    /// Blank input completes immediately with an empty set.
    pub fn query(&self, text: &str) -> SearchFuture {
        let token = self.tokenizer.normalize(text);
        if token.is_empty() {
            return SearchFuture::ready(AHashSet::new());
        }
        let store = Arc::clone(&self.core.store);
        SearchFuture::new(self.core.scheduler.completion_handle(), move || {
            store.query(&token)
        })
    }

    /// Files containing `text`'s tokens as a consecutive phrase.
    pub fn query_phrase(&self, text: &str) -> SearchFuture {
        self.phrase_future(self.tokenizer.tokens(text))
    }

    /// Phrase query over pre-split tokens; each token is normalized
    /// individually.
    pub fn query_phrase_tokens(&self, tokens: &[String]) -> SearchFuture {
        let normalized = tokens
            .iter()
            .map(|t| self.tokenizer.normalize(t))
            .collect::<Vec<_>>();
        self.phrase_future(normalized)
    }

    fn phrase_future(&self, tokens: Vec<String>) -> SearchFuture {
        if tokens.is_empty() {
            return SearchFuture::ready(AHashSet::new());
        }
        let store = Arc::clone(&self.core.store);
        SearchFuture::new(self.core.scheduler.completion_handle(), move || {
            store.query_phrase(&tokens)
        })
    }

    /// Non-blocking snapshot of the token -> files mapping.
    pub fn dump(&self) -> AHashMap<String, AHashSet<PathBuf>> {
        self.core.store.dump()
    }

    /// Direct read access to the underlying store.
    pub fn store(&self) -> &IndexStore {
        &self.core.store
    }

    /// Shut down the watcher, then the scheduler. Idempotent; queries keep
    /// answering against the last indexed state.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_watching();
        self.core.scheduler.close();
    }
}

impl Drop for FileIndexService {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_blank_query_is_ready_and_empty() {
        let service = FileIndexService::new();
        let future = service.query("   ");
        assert!(future.is_ready());
        assert!(future.wait().is_empty());
        service.close();
    }

    #[test]
    fn test_empty_phrase_is_ready_and_empty() {
        let service = FileIndexService::new();
        assert!(service.query_phrase("").wait().is_empty());
        assert!(service.query_phrase_tokens(&[]).wait().is_empty());
        service.close();
    }

    #[test]
    fn test_index_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("doc.txt");
        fs::write(&file, "kotlin").unwrap();

        let service = FileIndexService::new();
        service.index(&[dir.path().to_path_buf()]);

        let hits = service.query("kotlin").wait();
        assert!(hits.contains(&file));
        // Service normalizes query text
        assert!(service.query("Kotlin").wait().contains(&file));
        service.close();
    }

    #[test]
    fn test_query_phrase_tokens_normalizes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("doc.txt");
        fs::write(&file, "quick brown fox").unwrap();

        let service = FileIndexService::new();
        service.index(&[dir.path().to_path_buf()]);

        let tokens = vec!["Quick".to_string(), " Brown ".to_string()];
        assert!(service.query_phrase_tokens(&tokens).wait().contains(&file));
        service.close();
    }

    #[test]
    fn test_start_watching_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let service = FileIndexService::new();
        service.start_watching(&[dir.path().to_path_buf()]).unwrap();
        assert!(matches!(
            service.start_watching(&[dir.path().to_path_buf()]),
            Err(IndexError::AlreadyWatching)
        ));
        service.close();
    }

    #[test]
    fn test_watching_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let service = FileIndexService::new();
        service.close();
        assert!(matches!(
            service.start_watching(&[dir.path().to_path_buf()]),
            Err(IndexError::Closed)
        ));
    }

    #[test]
    fn test_close_idempotent() {
        let service = FileIndexService::new();
        service.close();
        service.close();
    }

    #[test]
    fn test_index_after_close_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("doc.txt"), "alpha").unwrap();

        let service = FileIndexService::new();
        service.close();
        service.index(&[dir.path().to_path_buf()]);
        assert!(service.query("alpha").wait().is_empty());
    }
}
