//! Background work and the path back to the state thread.
//!
//! Tree nodes are confined to the thread that created them. Work that must not block that thread
//! runs on a [`TaskRunner`]. Results travel back as jobs posted through a [`StatePoster`] and
//! run by [`StateQueue::dispatch_pending`] on the state thread. A job that needs a state-thread
//! object carries a [`SafeHandle`] to it and resolves the handle only when it runs. If the
//! object is gone by then, resolution yields `None`.

use crate::statics;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::{
    any::Any,
    cell::{Cell, RefCell},
    collections::HashMap,
    fmt,
    marker::PhantomData,
    rc::{Rc, Weak},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle, ThreadId},
    time::Duration,
};

type Task = Box<dyn FnOnce() + Send>;

/// Runs tasks one after another on a single background thread.
///
/// Dropping the runner stops it accepting tasks, lets the already queued ones finish and joins
/// the thread.
pub struct TaskRunner {
    name: String,
    tx: Option<Sender<Task>>,
    worker: Option<JoinHandle<()>>,
}

impl TaskRunner {
    pub fn new(name: impl Into<String>) -> std::io::Result<Self> {
        let name = name.into();
        let (tx, rx) = crossbeam_channel::unbounded::<Task>();
        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_task_loop(rx))?;
        Ok(Self {
            name,
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queues a task. `false` when the worker is no longer running.
    pub fn add_task(&self, task: impl FnOnce() + Send + 'static) -> bool {
        match &self.tx {
            Some(tx) => tx.send(Box::new(task)).is_ok(),
            None => false,
        }
    }
}

fn run_task_loop(rx: Receiver<Task>) {
    while let Ok(task) = rx.recv() {
        task();
    }
    tracing::debug!("task runner drained");
}

impl Drop for TaskRunner {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::warn!(runner = %self.name, "task runner thread panicked");
        }
    }
}

impl fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRunner").field("name", &self.name).finish()
    }
}

/// Progress of one piece of background work, shared between the worker and the state thread.
///
/// Values are in `[0, 1]`; a negative value means the amount of work is unknown.
#[derive(Debug)]
pub struct Progress {
    name: String,
    progress: AtomicU64,
    cancelled: AtomicBool,
}

impl Progress {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            progress: AtomicU64::new(0.0_f64.to_bits()),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_progress(&self, progress: f64) {
        debug_assert!(progress <= 1.0, "progress {progress} out of range");
        self.progress.store(progress.to_bits(), Ordering::Release);
    }

    pub fn set_indeterminate(&self) {
        self.set_progress(-1.0);
    }

    pub fn progress(&self) -> f64 {
        f64::from_bits(self.progress.load(Ordering::Acquire))
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.is_cancelled() || self.progress() >= 1.0
    }
}

/// The progresses of all running background work, owned by the state thread.
#[derive(Debug, Default)]
pub struct ProgressList {
    progresses: Vec<Arc<Progress>>,
}

impl ProgressList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_progress(&mut self, name: impl Into<String>) -> Arc<Progress> {
        let progress = Arc::new(Progress::new(name));
        self.progresses.push(Arc::clone(&progress));
        progress
    }

    pub fn progresses(&self) -> &[Arc<Progress>] {
        &self.progresses
    }

    /// Mean progress. `1.0` with nothing running, `-1.0` if any entry is indeterminate.
    pub fn total_progress(&self) -> f64 {
        if self.progresses.is_empty() {
            return 1.0;
        }
        let mut total = 0.0;
        for p in &self.progresses {
            let value = p.progress();
            if value < 0.0 {
                return -1.0;
            }
            total += value.clamp(0.0, 1.0);
        }
        total / self.progresses.len() as f64
    }

    /// Drops cancelled and completed entries. Returns how many were removed.
    pub fn remove_finished(&mut self) -> usize {
        let before = self.progresses.len();
        self.progresses.retain(|p| !p.is_finished());
        before - self.progresses.len()
    }
}

/// Identity of the thread that owns the state trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateThread {
    id: ThreadId,
}

impl StateThread {
    /// Designates the calling thread.
    pub fn current() -> Self {
        Self {
            id: thread::current().id(),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn is_current(&self) -> bool {
        thread::current().id() == self.id
    }

    pub fn assert_current(&self) {
        debug_assert!(self.is_current(), "called off the state thread");
    }
}

type Job = Box<dyn FnOnce(&StateQueue) + Send>;

/// Revocable, thread-safe reference to an object living on the state thread.
pub struct SafeHandle<T> {
    id: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for SafeHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SafeHandle<T> {}

impl<T> PartialEq for SafeHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for SafeHandle<T> {}

impl<T> fmt::Debug for SafeHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SafeHandle").field(&self.id).finish()
    }
}

/// Sends jobs to a [`StateQueue`] from any thread.
#[derive(Clone)]
pub struct StatePoster {
    tx: Sender<Job>,
}

impl StatePoster {
    /// Queues `job` to run on the state thread. `false` when the queue no longer exists.
    pub fn post(&self, job: impl FnOnce(&StateQueue) + Send + 'static) -> bool {
        self.tx.send(Box::new(job)).is_ok()
    }
}

impl fmt::Debug for StatePoster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatePoster").finish_non_exhaustive()
    }
}

/// Runs posted jobs on the state thread and resolves [`SafeHandle`]s for them.
pub struct StateQueue {
    thread: StateThread,
    tx: Sender<Job>,
    rx: Receiver<Job>,
    registry: RefCell<HashMap<u64, Weak<dyn Any>>>,
    next_id: Cell<u64>,
    sweep_at: Cell<usize>,
}

impl Default for StateQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl StateQueue {
    /// Creates a queue owned by the calling thread.
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            thread: StateThread::current(),
            tx,
            rx,
            registry: RefCell::new(HashMap::new()),
            next_id: Cell::new(1),
            sweep_at: Cell::new(statics::MIN_REGISTRY_SWEEP),
        }
    }

    pub fn state_thread(&self) -> StateThread {
        self.thread
    }

    pub fn poster(&self) -> StatePoster {
        StatePoster {
            tx: self.tx.clone(),
        }
    }

    /// Hands out a handle to `target` without keeping it alive.
    pub fn register<T: 'static>(&self, target: &Rc<T>) -> SafeHandle<T> {
        self.thread.assert_current();
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        if self.registry.borrow().len() >= self.sweep_at.get() {
            self.prune();
        }

        let target: Rc<dyn Any> = target.clone();
        self.registry
            .borrow_mut()
            .insert(id, Rc::downgrade(&target));
        SafeHandle {
            id,
            _marker: PhantomData,
        }
    }

    /// The target, if it is still alive and the handle has not been revoked.
    pub fn resolve<T: 'static>(&self, handle: SafeHandle<T>) -> Option<Rc<T>> {
        self.thread.assert_current();
        let target = self.registry.borrow().get(&handle.id)?.upgrade()?;
        target.downcast::<T>().ok()
    }

    pub fn revoke<T>(&self, handle: SafeHandle<T>) {
        self.registry.borrow_mut().remove(&handle.id);
    }

    /// Number of registry entries, including ones whose target died since the last sweep.
    pub fn num_registered(&self) -> usize {
        self.registry.borrow().len()
    }

    /// Runs every job queued so far. Returns how many ran.
    pub fn dispatch_pending(&self) -> usize {
        self.thread.assert_current();
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job(self);
            ran += 1;
        }
        if ran > 0 {
            self.prune();
            tracing::debug!(jobs = ran, "dispatched state-thread jobs");
        }
        ran
    }

    /// Waits up to `timeout` for at least one job, then runs everything queued.
    pub fn wait_and_dispatch(&self, timeout: Duration) -> usize {
        self.thread.assert_current();
        match self.rx.recv_timeout(timeout) {
            Ok(job) => {
                job(self);
                1 + self.dispatch_pending()
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => 0,
        }
    }

    fn prune(&self) {
        let mut registry = self.registry.borrow_mut();
        registry.retain(|_, target| target.strong_count() > 0);
        self.sweep_at
            .set((registry.len() * 2).max(statics::MIN_REGISTRY_SWEEP));
    }
}

impl fmt::Debug for StateQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateQueue")
            .field("thread", &self.thread)
            .field("pending", &self.rx.len())
            .field("registered", &self.registry.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Progress, ProgressList, StateQueue, StateThread};
    use std::rc::Rc;

    #[test]
    fn total_progress_averages_and_flags_unknown_work() {
        let mut list = ProgressList::new();
        assert_eq!(list.total_progress(), 1.0);

        let a = list.create_progress("a");
        let b = list.create_progress("b");
        a.set_progress(0.5);
        b.set_progress(1.0);
        assert_eq!(list.total_progress(), 0.75);

        b.set_indeterminate();
        assert_eq!(list.total_progress(), -1.0);

        a.cancel();
        assert_eq!(list.remove_finished(), 1);
        assert_eq!(list.progresses().len(), 1);
    }

    #[test]
    fn progress_finishes_at_one() {
        let p = Progress::new("scan");
        assert!(!p.is_finished());
        p.set_progress(1.0);
        assert!(p.is_finished());
        assert_eq!(p.name(), "scan");
    }

    #[test]
    fn handles_resolve_only_while_the_target_lives() {
        let queue = StateQueue::new();
        let target = Rc::new(String::from("alive"));
        let handle = queue.register(&target);
        assert_eq!(queue.resolve(handle).as_deref().map(String::as_str), Some("alive"));

        drop(target);
        assert!(queue.resolve(handle).is_none());
    }

    #[test]
    fn registering_sweeps_dead_handles() {
        let queue = StateQueue::new();
        let survivor = Rc::new(0_usize);
        queue.register(&survivor);
        for i in 0..1000 {
            let target = Rc::new(i);
            queue.register(&target);
        }
        assert!(queue.num_registered() <= 2 * crate::statics::MIN_REGISTRY_SWEEP);

        let kept: Vec<_> = (0..100).map(Rc::new).collect();
        for target in &kept {
            queue.register(target);
        }
        assert!(queue.num_registered() >= kept.len() + 1);
        assert!(queue.num_registered() <= 2 * (kept.len() + 1) + 1);
    }

    #[test]
    fn revoked_handles_do_not_resolve() {
        let queue = StateQueue::new();
        let target = Rc::new(5_u32);
        let handle = queue.register(&target);
        queue.revoke(handle);
        assert!(queue.resolve(handle).is_none());
    }

    #[test]
    fn state_thread_identifies_the_caller() {
        let state = StateThread::current();
        assert!(state.is_current());
        let other = std::thread::spawn(move || state.is_current()).join().unwrap();
        assert!(!other);
    }
}
