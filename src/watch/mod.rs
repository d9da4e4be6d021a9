//! Filesystem watcher pipeline.
//!
//! Translates native filesystem notifications into the three events the
//! service understands and delivers them to a handler on a dedicated
//! thread. Newly created directories are registered with the backend
//! before their Created event is dispatched, so events inside a fresh
//! subtree are not lost on platforms whose recursive watch is emulated.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::Result;

/// A filesystem change the pipeline reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
}

impl FsEvent {
    pub fn path(&self) -> &Path {
        match self {
            FsEvent::Created(p) | FsEvent::Modified(p) | FsEvent::Deleted(p) => p,
        }
    }
}

/// What a watched root covers. Directory roots are recursive; a file root
/// watches its parent and filters events down to the file itself.
#[derive(Debug, Clone)]
enum WatchScope {
    Dir(PathBuf),
    File(PathBuf),
}

impl WatchScope {
    fn covers(&self, path: &Path) -> bool {
        match self {
            WatchScope::Dir(root) => path.starts_with(root),
            WatchScope::File(file) => path == file,
        }
    }
}

/// Handle to a running watcher thread.
///
/// Stopping is idempotent and safe from any thread; dropping the handle
/// stops the thread.
pub struct FileWatcher {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl FileWatcher {
    /// Start watching `roots`, delivering events to `handler` from a
    /// dedicated thread.
    ///
    /// Non-existent roots are skipped silently; no event ever fires for
    /// them. The thread re-checks its shutdown flag every `poll` interval.
    pub fn spawn(
        roots: &[PathBuf],
        poll: Duration,
        handler: impl Fn(FsEvent) + Send + 'static,
    ) -> Result<Self> {
        let (event_tx, event_rx) = unbounded();
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    let _ = event_tx.send(event);
                }
                Err(error) => {
                    log::warn!("watch backend error: {error}");
                }
            },
            notify::Config::default(),
        )?;

        let mut scopes = Vec::new();
        for root in roots {
            if root.is_dir() {
                watcher.watch(root, RecursiveMode::Recursive)?;
                scopes.push(WatchScope::Dir(root.clone()));
            } else if root.is_file() {
                if let Some(parent) = root.parent() {
                    watcher.watch(parent, RecursiveMode::NonRecursive)?;
                    scopes.push(WatchScope::File(root.clone()));
                }
            } else {
                log::debug!("skipping non-existent watch root {}", root.display());
            }
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = Arc::clone(&shutdown);
        let thread = thread::Builder::new()
            .name("pindex-watcher".to_string())
            .spawn(move || {
                watch_loop(watcher, event_rx, scopes, poll, thread_shutdown, handler);
            })?;

        Ok(Self {
            shutdown,
            thread: Some(thread),
        })
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::SeqCst)
            && self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signal the thread to stop and wait for it to exit.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn watch_loop(
    mut watcher: RecommendedWatcher,
    events: Receiver<Event>,
    scopes: Vec<WatchScope>,
    poll: Duration,
    shutdown: Arc<AtomicBool>,
    handler: impl Fn(FsEvent),
) {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let event = match events.recv_timeout(poll) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        for fs_event in translate(&event) {
            if !scopes.iter().any(|scope| scope.covers(fs_event.path())) {
                continue;
            }

            // Register fresh subtrees before dispatching their Created
            // event so later events inside them are not lost.
            if let FsEvent::Created(path) = &fs_event {
                if path.is_dir() {
                    if let Err(error) = watcher.watch(path, RecursiveMode::Recursive) {
                        log::warn!("failed to watch new directory {}: {error}", path.display());
                    }
                }
            }

            log::debug!("dispatching {fs_event:?}");
            handler(fs_event);
        }
    }
}

/// Map a native notification onto the pipeline's event vocabulary.
///
/// Renames become delete + create so no stale entry survives; access and
/// other informational kinds (including queue-overflow notices) are
/// discarded.
fn translate(event: &Event) -> Vec<FsEvent> {
    match &event.kind {
        EventKind::Create(_) => event.paths.iter().cloned().map(FsEvent::Created).collect(),
        EventKind::Remove(_) => event.paths.iter().cloned().map(FsEvent::Deleted).collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => event.paths.iter().cloned().map(FsEvent::Deleted).collect(),
            RenameMode::To => event.paths.iter().cloned().map(FsEvent::Created).collect(),
            RenameMode::Both => {
                let mut out = Vec::with_capacity(2);
                if let Some(from) = event.paths.first() {
                    out.push(FsEvent::Deleted(from.clone()));
                }
                if let Some(to) = event.paths.get(1) {
                    out.push(FsEvent::Created(to.clone()));
                }
                out
            }
            _ => event
                .paths
                .iter()
                .cloned()
                .map(|p| {
                    if p.exists() {
                        FsEvent::Modified(p)
                    } else {
                        FsEvent::Deleted(p)
                    }
                })
                .collect(),
        },
        EventKind::Modify(_) => event.paths.iter().cloned().map(FsEvent::Modified).collect(),
        _ => Vec::new(),
    }
}
