//! Indexing work scheduler.
//!
//! A fixed pool of worker threads executes per-file indexing jobs with two
//! guarantees the rest of the system leans on:
//!
//! - **At most one run per file.** A file admitted while already in flight
//!   is deferred; repeated admissions overwrite the deferred job, so a
//!   burst of N change events costs at most two runs (the one already
//!   executing and one trailing rerun with the latest job).
//! - **Batch completion.** All outstanding files form the current batch; a
//!   [`CompletionHandle`] completes when every file in the batch has
//!   finished its last-scheduled run. Queries use the handle to observe a
//!   quiescent index.
//!
//! Job failures are contained: a panicking job is logged at warning level
//! and never takes down a worker.

use ahash::{AHashMap, AHashSet};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A per-file indexing job.
///
/// `gate` is consulted on every admission (including the deferred rerun);
/// a false gate makes the admission a no-op. `apply` performs the actual
/// processing and store mutation. Both run outside scheduler locks.
#[derive(Clone)]
pub struct IndexJob {
    gate: Arc<dyn Fn(&Path) -> bool + Send + Sync>,
    apply: Arc<dyn Fn(&Path) + Send + Sync>,
}

impl IndexJob {
    pub fn new(
        gate: impl Fn(&Path) -> bool + Send + Sync + 'static,
        apply: impl Fn(&Path) + Send + Sync + 'static,
    ) -> Self {
        Self {
            gate: Arc::new(gate),
            apply: Arc::new(apply),
        }
    }
}

/// Completion handle for the current scheduler batch.
///
/// Clonable; every clone observes the same completion. Obtained from
/// [`IndexScheduler::completion_handle`], which returns a pre-completed
/// handle when no work is outstanding.
#[derive(Clone)]
pub struct CompletionHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    done: Mutex<bool>,
    cond: Condvar,
}

impl CompletionHandle {
    fn new() -> Self {
        Self {
            inner: Arc::new(HandleInner {
                done: Mutex::new(false),
                cond: Condvar::new(),
            }),
        }
    }

    pub(crate) fn completed() -> Self {
        Self {
            inner: Arc::new(HandleInner {
                done: Mutex::new(true),
                cond: Condvar::new(),
            }),
        }
    }

    fn complete(&self) {
        let mut done = self.inner.done.lock();
        *done = true;
        self.inner.cond.notify_all();
    }

    /// Block until the batch completes.
    pub fn wait(&self) {
        let mut done = self.inner.done.lock();
        while !*done {
            self.inner.cond.wait(&mut done);
        }
    }

    /// Block up to `timeout`; returns whether the batch completed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.inner.done.lock();
        while !*done {
            if self.inner.cond.wait_until(&mut done, deadline).timed_out() {
                return *done;
            }
        }
        true
    }

    pub fn is_complete(&self) -> bool {
        *self.inner.done.lock()
    }
}

struct Task {
    path: PathBuf,
    job: IndexJob,
}

/// All bookkeeping mutates under one lock so the batch handle is installed
/// and completed exactly once per batch.
#[derive(Default)]
struct State {
    in_flight: AHashSet<PathBuf>,
    pending_rerun: AHashMap<PathBuf, IndexJob>,
    outstanding: AHashSet<PathBuf>,
    batch: Option<CompletionHandle>,
}

struct Inner {
    state: Mutex<State>,
    sender: Mutex<Option<Sender<Task>>>,
    closed: AtomicBool,
}

/// Worker-pool scheduler with per-file dedup and latest-wins reruns.
pub struct IndexScheduler {
    inner: Arc<Inner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl IndexScheduler {
    /// Start a scheduler with `worker_threads` workers.
    pub fn new(worker_threads: usize) -> Self {
        let (tx, rx) = unbounded::<Task>();
        let inner = Arc::new(Inner {
            state: Mutex::new(State::default()),
            sender: Mutex::new(Some(tx)),
            closed: AtomicBool::new(false),
        });

        let workers = (0..worker_threads.max(1))
            .map(|i| {
                let inner = Arc::clone(&inner);
                let rx: Receiver<Task> = rx.clone();
                thread::Builder::new()
                    .name(format!("pindex-worker-{i}"))
                    .spawn(move || worker_loop(inner, rx))
                    .expect("failed to spawn indexing worker")
            })
            .collect();

        Self {
            inner,
            workers: Mutex::new(workers),
        }
    }

    /// Request that `path` be (re-)indexed.
    ///
    /// No-op when the gate rejects the path or the scheduler is closed. If
    /// the path is already in flight the job is queued as its single
    /// deferred rerun, overwriting any earlier deferred job.
    pub fn schedule(&self, path: PathBuf, job: IndexJob) {
        self.inner.submit(path, job);
    }

    /// Handle completing when every file outstanding right now finishes its
    /// last-scheduled run. Pre-completed when the scheduler is idle.
    ///
    /// Work admitted after this call is not waited for.
    pub fn completion_handle(&self) -> CompletionHandle {
        let state = self.inner.state.lock();
        if state.outstanding.is_empty() {
            CompletionHandle::completed()
        } else {
            state
                .batch
                .clone()
                .unwrap_or_else(CompletionHandle::completed)
        }
    }

    /// Stop accepting work and shut the pool down.
    ///
    /// In-flight jobs finish; queued-but-unstarted jobs and pending reruns
    /// are dropped; the current batch handle is completed so waiting
    /// queries unblock. Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Disconnect the channel so workers exit once drained
        drop(self.inner.sender.lock().take());

        {
            let mut state = self.inner.state.lock();
            state.pending_rerun.clear();
            state.outstanding.clear();
            if let Some(batch) = state.batch.take() {
                batch.complete();
            }
        }

        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            let _ = handle.join();
        }
    }
}

impl Drop for IndexScheduler {
    fn drop(&mut self) {
        self.close();
    }
}

impl Inner {
    /// Admission. Returns whether the job was accepted (directly or as a
    /// deferred rerun).
    fn submit(&self, path: PathBuf, job: IndexJob) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        if !(job.gate)(&path) {
            return false;
        }

        let task = {
            let mut state = self.state.lock();
            if !state.in_flight.insert(path.clone()) {
                // Already running: keep only the latest deferred job
                state.pending_rerun.insert(path, job);
                return true;
            }
            if state.outstanding.is_empty() {
                state.batch = Some(CompletionHandle::new());
            }
            state.outstanding.insert(path.clone());
            Task { path, job }
        };

        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(tx) => {
                let _ = tx.send(task);
                true
            }
            None => {
                // Closed between admission and send: roll back
                drop(sender);
                {
                    let mut state = self.state.lock();
                    state.in_flight.remove(&task.path);
                    state.pending_rerun.remove(&task.path);
                }
                self.retire_if_idle(&task.path);
                false
            }
        }
    }

    /// Post-run bookkeeping: honor the deferred rerun or retire the path
    /// from the batch.
    fn finish(&self, path: &Path) {
        let rerun = {
            let mut state = self.state.lock();
            state.in_flight.remove(path);
            let rerun = state.pending_rerun.remove(path);
            if rerun.is_none() {
                state.outstanding.remove(path);
                if state.outstanding.is_empty() {
                    if let Some(batch) = state.batch.take() {
                        batch.complete();
                    }
                }
            }
            rerun
        };

        if let Some(job) = rerun {
            // Rerun chains stay in the current batch; a rerun whose gate
            // turned false must still retire the path or the batch never
            // completes.
            if !self.submit(path.to_path_buf(), job) {
                self.retire_if_idle(path);
            }
        }
    }

    fn retire_if_idle(&self, path: &Path) {
        let mut state = self.state.lock();
        if state.in_flight.contains(path) {
            return;
        }
        state.outstanding.remove(path);
        if state.outstanding.is_empty() {
            if let Some(batch) = state.batch.take() {
                batch.complete();
            }
        }
    }
}

fn worker_loop(inner: Arc<Inner>, rx: Receiver<Task>) {
    while let Ok(task) = rx.recv() {
        if !inner.closed.load(Ordering::SeqCst) {
            let apply = Arc::clone(&task.job.apply);
            let path = task.path.clone();
            if catch_unwind(AssertUnwindSafe(|| (apply)(&path))).is_err() {
                log::warn!("indexing job for {} panicked", path.display());
            }
        }
        inner.finish(&task.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_job(counter: Arc<AtomicUsize>) -> IndexJob {
        IndexJob::new(
            |_| true,
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
    }

    #[test]
    fn test_idle_handle_precompleted() {
        let scheduler = IndexScheduler::new(2);
        assert!(scheduler.completion_handle().is_complete());
        scheduler.close();
    }

    #[test]
    fn test_runs_every_scheduled_file() {
        let scheduler = IndexScheduler::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for i in 0..32 {
            scheduler.schedule(
                PathBuf::from(format!("/tmp/file-{i}")),
                counting_job(Arc::clone(&counter)),
            );
        }
        assert!(scheduler.completion_handle().wait_timeout(Duration::from_secs(10)));
        assert_eq!(counter.load(Ordering::SeqCst), 32);
        assert!(scheduler.completion_handle().is_complete());
        scheduler.close();
    }

    #[test]
    fn test_gate_false_is_noop() {
        let scheduler = IndexScheduler::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&counter);
        scheduler.schedule(
            PathBuf::from("/tmp/rejected"),
            IndexJob::new(
                |_| false,
                move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                },
            ),
        );
        assert!(scheduler.completion_handle().is_complete());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        scheduler.close();
    }

    #[test]
    fn test_burst_coalesces_to_two_runs() {
        let scheduler = IndexScheduler::new(2);
        let path = PathBuf::from("/tmp/busy");
        let applies = Arc::new(AtomicUsize::new(0));
        let (unblock_tx, unblock_rx) = unbounded::<()>();

        let count = Arc::clone(&applies);
        let job = IndexJob::new(
            |_| true,
            move |_| {
                count.fetch_add(1, Ordering::SeqCst);
                let _ = unblock_rx.recv();
            },
        );

        // First admission starts running and blocks; in_flight is set at
        // admission time, so the burst below always coalesces.
        scheduler.schedule(path.clone(), job.clone());
        for _ in 0..10 {
            scheduler.schedule(path.clone(), job.clone());
        }
        let handle = scheduler.completion_handle();
        for _ in 0..12 {
            let _ = unblock_tx.send(());
        }

        assert!(handle.wait_timeout(Duration::from_secs(10)));
        assert_eq!(applies.load(Ordering::SeqCst), 2);
        scheduler.close();
    }

    #[test]
    fn test_at_most_one_run_per_file() {
        let scheduler = Arc::new(IndexScheduler::new(8));
        let path = PathBuf::from("/tmp/unique");
        let current = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let (cur, max) = (Arc::clone(&current), Arc::clone(&max_seen));
        let job = IndexJob::new(
            |_| true,
            move |_| {
                let now = cur.fetch_add(1, Ordering::SeqCst) + 1;
                max.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(2));
                cur.fetch_sub(1, Ordering::SeqCst);
            },
        );

        let mut handles = Vec::new();
        for _ in 0..4 {
            let sched = Arc::clone(&scheduler);
            let scheduler_job = job.clone();
            let p = path.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..50 {
                    sched.schedule(p.clone(), scheduler_job.clone());
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(scheduler.completion_handle().wait_timeout(Duration::from_secs(10)));
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        scheduler.close();
    }

    #[test]
    fn test_rerun_with_failed_gate_still_completes_batch() {
        let scheduler = IndexScheduler::new(2);
        let path = PathBuf::from("/tmp/vanishing");
        let gate_open = Arc::new(AtomicBool::new(true));
        let applies = Arc::new(AtomicUsize::new(0));
        let (unblock_tx, unblock_rx) = unbounded::<()>();

        let (gate, count) = (Arc::clone(&gate_open), Arc::clone(&applies));
        let job = IndexJob::new(
            move |_| gate.load(Ordering::SeqCst),
            move |_| {
                count.fetch_add(1, Ordering::SeqCst);
                let _ = unblock_rx.recv();
            },
        );

        scheduler.schedule(path.clone(), job.clone());
        scheduler.schedule(path.clone(), job.clone());
        let handle = scheduler.completion_handle();

        // The deferred rerun re-evaluates the gate and must retire the file
        gate_open.store(false, Ordering::SeqCst);
        let _ = unblock_tx.send(());

        assert!(handle.wait_timeout(Duration::from_secs(10)));
        assert_eq!(applies.load(Ordering::SeqCst), 1);
        scheduler.close();
    }

    #[test]
    fn test_panicking_job_does_not_kill_pool() {
        let scheduler = IndexScheduler::new(1);
        scheduler.schedule(
            PathBuf::from("/tmp/boom"),
            IndexJob::new(|_| true, |_| panic!("boom")),
        );
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.schedule(PathBuf::from("/tmp/ok"), counting_job(Arc::clone(&counter)));

        assert!(scheduler.completion_handle().wait_timeout(Duration::from_secs(10)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        scheduler.close();
    }

    #[test]
    fn test_schedule_after_close_ignored() {
        let scheduler = IndexScheduler::new(2);
        scheduler.close();

        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.schedule(PathBuf::from("/tmp/late"), counting_job(Arc::clone(&counter)));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(scheduler.completion_handle().is_complete());
    }

    #[test]
    fn test_close_unblocks_waiters() {
        let scheduler = Arc::new(IndexScheduler::new(1));
        let (unblock_tx, unblock_rx) = unbounded::<()>();
        scheduler.schedule(
            PathBuf::from("/tmp/slow"),
            IndexJob::new(
                |_| true,
                move |_| {
                    let _ = unblock_rx.recv_timeout(Duration::from_secs(5));
                },
            ),
        );
        let handle = scheduler.completion_handle();

        let closer = Arc::clone(&scheduler);
        let join = thread::spawn(move || {
            unblock_tx.send(()).unwrap();
            closer.close();
        });

        assert!(handle.wait_timeout(Duration::from_secs(10)));
        join.join().unwrap();
    }

    #[test]
    fn test_close_idempotent() {
        let scheduler = IndexScheduler::new(2);
        scheduler.close();
        scheduler.close();
    }

    #[test]
    fn test_batches_are_successive() {
        let scheduler = IndexScheduler::new(2);
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler.schedule(PathBuf::from("/tmp/one"), counting_job(Arc::clone(&counter)));
        assert!(scheduler.completion_handle().wait_timeout(Duration::from_secs(10)));

        scheduler.schedule(PathBuf::from("/tmp/two"), counting_job(Arc::clone(&counter)));
        assert!(scheduler.completion_handle().wait_timeout(Duration::from_secs(10)));

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        scheduler.close();
    }
}
