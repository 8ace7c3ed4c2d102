//! Coalescing background task processor
//!
//! A [`TaskCoalescer`] runs "save the latest state" work on a single serial
//! worker thread. While a submitted task is still waiting, newer submissions are
//! folded into it instead of queueing another run, so a burst of N submissions
//! costs at most one execution. Once a task has started, the next submission
//! starts a new pending task that runs after it.
//!
//! Each pending task holds a background-execution grant from the platform. If
//! the platform revokes the grant, the expiration handler runs the task on the
//! spot instead of abandoning it. A per-task lock makes sure only one of the two
//! triggers (worker or expiration) actually runs it.
//!
//! Tasks may submit to their own coalescer. A submission made while a task runs
//! on the same thread is left to the worker.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

// =============================================================================
// Task
// =============================================================================

/// Unit of background work.
pub trait Task: Send + 'static {
    /// Whether running `self` would redo the work `other` already does.
    fn is_duplicate(&self, other: &Self) -> bool;

    /// Fold a newer submission into this still-pending task.
    ///
    /// The default keeps only the newer payload.
    fn merge(&mut self, newer: Self)
    where
        Self: Sized,
    {
        *self = newer;
    }

    fn run(self);
}

/// Adapter for one-off closures. Never a duplicate; a newer closure replaces a
/// pending one.
pub struct ClosureTask(Box<dyn FnOnce() + Send>);

impl ClosureTask {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(f))
    }
}

impl Task for ClosureTask {
    fn is_duplicate(&self, _other: &Self) -> bool {
        false
    }

    fn run(self) {
        (self.0)()
    }
}

// =============================================================================
// Background Execution
// =============================================================================

/// Handle for a granted stretch of background run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GrantId(pub u64);

/// Platform API for finishing work while the app is backgrounded.
pub trait BackgroundExecution: Send + Sync {
    /// Ask for extra run time. `on_expire` is called if the time runs out first.
    fn begin(&self, label: &str, on_expire: Box<dyn FnOnce() + Send>) -> Option<GrantId>;

    /// Give back a grant obtained from [`begin`](Self::begin).
    fn end(&self, grant: GrantId);
}

/// For platforms without background grants.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBackgroundExecution;

impl BackgroundExecution for NoBackgroundExecution {
    fn begin(&self, _label: &str, _on_expire: Box<dyn FnOnce() + Send>) -> Option<GrantId> {
        None
    }

    fn end(&self, _grant: GrantId) {}
}

// =============================================================================
// Pending Task
// =============================================================================

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Serializes task runs across the worker and expiration handlers.
#[derive(Default)]
struct RunLock {
    lock: Mutex<()>,
    owner: Mutex<Option<ThreadId>>,
}

struct RunGuard<'a> {
    run_lock: &'a RunLock,
    _guard: MutexGuard<'a, ()>,
}

impl RunLock {
    /// `None` if the calling thread is already running a task.
    fn acquire(&self) -> Option<RunGuard<'_>> {
        let me = thread::current().id();
        if *lock(&self.owner) == Some(me) {
            return None;
        }
        let guard = lock(&self.lock);
        *lock(&self.owner) = Some(me);
        Some(RunGuard {
            run_lock: self,
            _guard: guard,
        })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *lock(&self.run_lock.owner) = None;
    }
}

#[derive(Default)]
struct GrantSlot {
    id: Option<GrantId>,
    finished: bool,
}

/// A submitted task. `task` is `Some` exactly while it is pending.
struct PendingTask<T> {
    task: Mutex<Option<T>>,
    grant: Mutex<GrantSlot>,
}

impl<T: Task> PendingTask<T> {
    fn new(task: T) -> Self {
        Self {
            task: Mutex::new(Some(task)),
            grant: Mutex::new(GrantSlot::default()),
        }
    }

    fn is_pending(&self) -> bool {
        lock(&self.task).is_some()
    }

    /// Fold `newer` into this task if it has not started. Hands it back otherwise.
    fn try_update(&self, newer: T) -> Result<(), T> {
        let mut task = lock(&self.task);
        match task.as_mut() {
            Some(current) => {
                if newer.is_duplicate(current) {
                    log::debug!("Dropping duplicate background task");
                } else {
                    log::debug!("Merging into pending background task");
                    current.merge(newer);
                }
                Ok(())
            }
            None => Err(newer),
        }
    }

    fn attach_grant(&self, id: GrantId, background: &dyn BackgroundExecution) {
        let mut grant = lock(&self.grant);
        if grant.finished {
            drop(grant);
            background.end(id);
        } else {
            grant.id = Some(id);
        }
    }

    /// Run the task unless another trigger already did.
    ///
    /// Called from inside a running task, this leaves the task pending for the
    /// worker.
    fn finish(&self, run_lock: &RunLock, background: &dyn BackgroundExecution) {
        let Some(_running) = run_lock.acquire() else {
            log::debug!("Task submitted from a running task, leaving it to the worker");
            return;
        };

        let Some(task) = lock(&self.task).take() else {
            return;
        };

        if panic::catch_unwind(AssertUnwindSafe(|| task.run())).is_err() {
            log::error!("Background task panicked");
        }

        let grant = {
            let mut grant = lock(&self.grant);
            grant.finished = true;
            grant.id.take()
        };
        if let Some(id) = grant {
            background.end(id);
        }
    }
}

// =============================================================================
// Coalescer
// =============================================================================

enum Message<T> {
    Run(Arc<PendingTask<T>>),
    Flush(Sender<()>),
}

/// Serial, coalescing executor for one kind of background task.
pub struct TaskCoalescer<T: Task> {
    label: String,
    current: Mutex<Option<Arc<PendingTask<T>>>>,
    sender: Mutex<Option<Sender<Message<T>>>>,
    worker: Option<JoinHandle<()>>,
    run_lock: Arc<RunLock>,
    background: Arc<dyn BackgroundExecution>,
}

impl<T: Task> TaskCoalescer<T> {
    pub fn new(label: impl Into<String>) -> Self {
        Self::with_background(label, Arc::new(NoBackgroundExecution))
    }

    pub fn with_background(label: impl Into<String>, background: Arc<dyn BackgroundExecution>) -> Self {
        let label = label.into();
        let run_lock = Arc::new(RunLock::default());
        let (sender, receiver) = mpsc::channel::<Message<T>>();

        let worker_lock = Arc::clone(&run_lock);
        let worker_background = Arc::clone(&background);
        let spawned = thread::Builder::new()
            .name(format!("{}:background-task-queue", label))
            .spawn(move || {
                for message in receiver {
                    match message {
                        Message::Run(pending) => pending.finish(&worker_lock, worker_background.as_ref()),
                        Message::Flush(ack) => {
                            let _ = ack.send(());
                        }
                    }
                }
            });

        let (sender, worker) = match spawned {
            Ok(handle) => (Some(sender), Some(handle)),
            Err(e) => {
                log::error!("Failed to start worker for '{}', running tasks inline: {}", label, e);
                (None, None)
            }
        };

        Self {
            label,
            current: Mutex::new(None),
            sender: Mutex::new(sender),
            worker,
            run_lock,
            background,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether a submitted task is still waiting to start.
    pub fn has_pending(&self) -> bool {
        lock(&self.current).as_ref().is_some_and(|p| p.is_pending())
    }

    /// Submit work. Folds into the pending task if there is one, otherwise
    /// schedules a new run behind any task already executing.
    pub fn submit(&self, task: T) {
        let mut current = lock(&self.current);

        let task = match current.as_ref() {
            Some(pending) => match pending.try_update(task) {
                Ok(()) => return,
                Err(task) => task,
            },
            None => task,
        };

        let pending = Arc::new(PendingTask::new(task));
        *current = Some(Arc::clone(&pending));

        let sender = lock(&self.sender).clone();
        let delivered = sender.is_some_and(|sender| sender.send(Message::Run(Arc::clone(&pending))).is_ok());
        drop(current);

        // The platform may expire the grant inside `begin`, so no locks are held
        let on_expire: Box<dyn FnOnce() + Send> = {
            let pending = Arc::clone(&pending);
            let run_lock = Arc::clone(&self.run_lock);
            let background = Arc::clone(&self.background);
            Box::new(move || {
                log::warn!("Background time expired, finishing task synchronously");
                pending.finish(&run_lock, background.as_ref());
            })
        };
        if let Some(id) = self.background.begin(&self.label, on_expire) {
            pending.attach_grant(id, self.background.as_ref());
        }

        if !delivered {
            pending.finish(&self.run_lock, self.background.as_ref());
        }
    }

    /// Block until everything submitted so far has run.
    pub fn flush(&self) {
        let Some(sender) = lock(&self.sender).clone() else {
            return;
        };
        let (ack_tx, ack_rx) = mpsc::channel();
        if sender.send(Message::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }
}

impl TaskCoalescer<ClosureTask> {
    /// Submit a closure. A pending closure is replaced by the newer one.
    pub fn submit_fn(&self, f: impl FnOnce() + Send + 'static) {
        self.submit(ClosureTask::new(f));
    }
}

impl<T: Task> Drop for TaskCoalescer<T> {
    fn drop(&mut self) {
        // Closing the queue lets the worker drain what is left, then exit
        lock(&self.sender).take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Worker for '{}' panicked", self.label);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::mpsc::Receiver;
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<(u32, &'static str)>>>;

    struct TestTask {
        value: u32,
        tag: &'static str,
        log: Log,
        gate: Option<(Sender<()>, Receiver<()>)>,
    }

    impl TestTask {
        fn new(value: u32, tag: &'static str, log: &Log) -> Self {
            Self {
                value,
                tag,
                log: Arc::clone(log),
                gate: None,
            }
        }

        /// Task that signals `started` and then waits for `release`.
        fn gated(value: u32, log: &Log, started: Sender<()>, release: Receiver<()>) -> Self {
            Self {
                gate: Some((started, release)),
                ..Self::new(value, "gate", log)
            }
        }
    }

    impl Task for TestTask {
        fn is_duplicate(&self, other: &Self) -> bool {
            self.value == other.value
        }

        fn run(self) {
            if let Some((started, release)) = self.gate {
                started.send(()).unwrap();
                release.recv().unwrap();
            }
            self.log.lock().unwrap().push((self.value, self.tag));
        }
    }

    fn values(log: &Log) -> Vec<u32> {
        log.lock().unwrap().iter().map(|(v, _)| *v).collect()
    }

    /// Occupy the worker so later submissions stay pending.
    fn block_worker(coalescer: &TaskCoalescer<TestTask>, log: &Log) -> Sender<()> {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        coalescer.submit(TestTask::gated(0, log, started_tx, release_rx));
        started_rx.recv().unwrap();
        release_tx
    }

    #[derive(Default)]
    struct ManualBackground {
        next: AtomicU64,
        handlers: Mutex<HashMap<u64, Box<dyn FnOnce() + Send>>>,
        ended: Mutex<Vec<u64>>,
    }

    impl ManualBackground {
        fn expire(&self, id: u64) {
            let handler = self.handlers.lock().unwrap().remove(&id);
            if let Some(handler) = handler {
                handler();
            }
        }

        fn ended(&self) -> Vec<u64> {
            let mut ended = self.ended.lock().unwrap().clone();
            ended.sort_unstable();
            ended
        }
    }

    impl BackgroundExecution for ManualBackground {
        fn begin(&self, _label: &str, on_expire: Box<dyn FnOnce() + Send>) -> Option<GrantId> {
            let id = self.next.fetch_add(1, Ordering::SeqCst) + 1;
            self.handlers.lock().unwrap().insert(id, on_expire);
            Some(GrantId(id))
        }

        fn end(&self, grant: GrantId) {
            let handler = self.handlers.lock().unwrap().remove(&grant.0);
            drop(handler);
            self.ended.lock().unwrap().push(grant.0);
        }
    }

    #[test]
    fn submissions_before_start_run_once_with_latest() {
        let log: Log = Arc::default();
        let coalescer = TaskCoalescer::new("coalesce");

        let release = block_worker(&coalescer, &log);
        coalescer.submit(TestTask::new(1, "p1", &log));
        assert!(coalescer.has_pending());
        coalescer.submit(TestTask::new(2, "p2", &log));
        release.send(()).unwrap();
        coalescer.flush();

        assert_eq!(values(&log), vec![0, 2]);
        assert!(!coalescer.has_pending());
    }

    #[test]
    fn submission_after_start_runs_again() {
        let log: Log = Arc::default();
        let coalescer = TaskCoalescer::new("sequential");

        let release = block_worker(&coalescer, &log);
        assert!(!coalescer.has_pending());
        coalescer.submit(TestTask::new(1, "p1", &log));
        release.send(()).unwrap();
        coalescer.flush();

        assert_eq!(values(&log), vec![0, 1]);
    }

    #[test]
    fn duplicate_keeps_pending_payload() {
        let log: Log = Arc::default();
        let coalescer = TaskCoalescer::new("duplicates");

        let release = block_worker(&coalescer, &log);
        coalescer.submit(TestTask::new(7, "first", &log));
        coalescer.submit(TestTask::new(7, "second", &log));
        release.send(()).unwrap();
        coalescer.flush();

        assert_eq!(*log.lock().unwrap(), vec![(0, "gate"), (7, "first")]);
    }

    #[test]
    fn closure_tasks_latest_wins() {
        let log: Arc<Mutex<Vec<u32>>> = Arc::default();
        let coalescer: TaskCoalescer<ClosureTask> = TaskCoalescer::new("closures");

        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let first = Arc::clone(&log);
        coalescer.submit_fn(move || {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            first.lock().unwrap().push(1);
        });
        started_rx.recv().unwrap();

        for value in [2, 3] {
            let log = Arc::clone(&log);
            coalescer.submit_fn(move || log.lock().unwrap().push(value));
        }
        release_tx.send(()).unwrap();
        coalescer.flush();

        assert_eq!(*log.lock().unwrap(), vec![1, 3]);
    }

    #[test]
    fn grants_are_released_after_run() {
        let log: Log = Arc::default();
        let background = Arc::new(ManualBackground::default());
        let coalescer = TaskCoalescer::with_background("grants", background.clone());

        coalescer.submit(TestTask::new(1, "a", &log));
        coalescer.flush();
        coalescer.submit(TestTask::new(2, "b", &log));
        coalescer.flush();

        assert_eq!(values(&log), vec![1, 2]);
        assert_eq!(background.ended(), vec![1, 2]);
        assert!(background.handlers.lock().unwrap().is_empty());
    }

    #[test]
    fn expiration_runs_pending_task_exactly_once() {
        let log: Log = Arc::default();
        let background = Arc::new(ManualBackground::default());
        let coalescer = TaskCoalescer::with_background("expire", background.clone());

        let release = block_worker(&coalescer, &log);
        coalescer.submit(TestTask::new(1, "pending", &log));

        // Grant 2 belongs to the pending task; its handler waits for the run lock
        let expirer = {
            let background = Arc::clone(&background);
            thread::spawn(move || background.expire(2))
        };
        release.send(()).unwrap();
        expirer.join().unwrap();
        coalescer.flush();

        assert_eq!(values(&log), vec![0, 1]);
        assert_eq!(background.ended(), vec![1, 2]);

        // A late expiration is a no-op
        background.expire(2);
        assert_eq!(values(&log), vec![0, 1]);
    }

    /// Platform with no background time left: expires inside `begin`.
    #[derive(Default)]
    struct ExhaustedBackground {
        ended: Mutex<Vec<u64>>,
    }

    impl BackgroundExecution for ExhaustedBackground {
        fn begin(&self, _label: &str, on_expire: Box<dyn FnOnce() + Send>) -> Option<GrantId> {
            on_expire();
            Some(GrantId(9))
        }

        fn end(&self, grant: GrantId) {
            self.ended.lock().unwrap().push(grant.0);
        }
    }

    #[test]
    fn immediate_expiration_completes_before_submit_returns() {
        let log: Log = Arc::default();
        let background = Arc::new(ExhaustedBackground::default());
        let coalescer = TaskCoalescer::with_background("exhausted", background.clone());

        coalescer.submit(TestTask::new(3, "now", &log));
        assert_eq!(values(&log), vec![3]);
        assert_eq!(*background.ended.lock().unwrap(), vec![9]);

        coalescer.flush();
        assert_eq!(values(&log), vec![3]);
        assert!(!coalescer.has_pending());
    }

    #[test]
    fn resubmit_from_expired_task_does_not_deadlock() {
        let background = Arc::new(ExhaustedBackground::default());
        let coalescer: Arc<TaskCoalescer<ClosureTask>> =
            Arc::new(TaskCoalescer::with_background("resubmit", background));
        let (tx, rx) = mpsc::channel();

        let weak = Arc::downgrade(&coalescer);
        coalescer.submit_fn(move || {
            if let Some(coalescer) = weak.upgrade() {
                let tx = tx.clone();
                coalescer.submit_fn(move || tx.send(2).unwrap());
            }
            tx.send(1).unwrap();
        });

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(1));
        coalescer.flush();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(2));
        assert!(!coalescer.has_pending());
    }

    #[test]
    fn late_expiration_is_noop() {
        let log: Log = Arc::default();
        let background = Arc::new(ManualBackground::default());
        let coalescer = TaskCoalescer::with_background("late", background.clone());

        coalescer.submit(TestTask::new(5, "late", &log));
        coalescer.flush();
        background.expire(1);

        assert_eq!(values(&log), vec![5]);
        assert_eq!(background.ended(), vec![1]);
    }

    #[test]
    fn drop_drains_queued_work() {
        let log: Log = Arc::default();
        {
            let coalescer = TaskCoalescer::new("drain");
            for value in 1..=5 {
                coalescer.submit(TestTask::new(value, "q", &log));
            }
        }
        let ran = values(&log);
        assert_eq!(ran.last(), Some(&5));
        assert!(ran.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn panicking_task_does_not_kill_worker() {
        let coalescer: TaskCoalescer<ClosureTask> = TaskCoalescer::new("panics");
        coalescer.submit_fn(|| panic!("boom"));
        coalescer.flush();

        let (tx, rx) = mpsc::channel();
        coalescer.submit_fn(move || tx.send(42).unwrap());
        coalescer.flush();
        assert_eq!(rx.recv().unwrap(), 42);
    }
}
