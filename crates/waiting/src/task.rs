use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use serial_executor::Executor;

type Continuation<E> = Box<dyn FnOnce(Option<E>) + Send + 'static>;

/// A continuation that runs exactly once, after every
/// [`WaitingTaskHolder`] referencing it has released.
///
/// `E` plays the role of the original's `exception_ptr`: a caller-chosen,
/// cloneable error type aggregated across dependents. The first dependent
/// to report a failure wins; later failures are silently discarded (a
/// deliberate, documented loss — see spec's "first-exception wins").
pub struct WaitingTask<E> {
    continuation: Mutex<Option<Continuation<E>>>,
    ref_count: AtomicUsize,
    first_error: OnceLock<E>,
    executor: Arc<dyn Executor>,
}

impl<E> WaitingTask<E>
where
    E: Clone + Send + Sync + 'static,
{
    /// Wraps `continuation`. `ref_count` starts at zero; each
    /// [`WaitingTaskHolder`] built over this task increments it, and the
    /// task is spawned on `executor` once the count returns to zero.
    pub fn new<F>(executor: Arc<dyn Executor>, continuation: F) -> Arc<Self>
    where
        F: FnOnce(Option<E>) + Send + 'static,
    {
        Arc::new(Self {
            continuation: Mutex::new(Some(Box::new(continuation))),
            ref_count: AtomicUsize::new(0),
            first_error: OnceLock::new(),
            executor,
        })
    }

    /// Records `err` as the task's failure iff no earlier dependent has
    /// already done so. Idempotent: losers of the race are discarded.
    pub fn dependent_task_failed(&self, err: E) {
        let _ = self.first_error.set(err);
    }

    /// The first reported failure, if any.
    pub fn first_error(&self) -> Option<E> {
        self.first_error.get().cloned()
    }

    pub(crate) fn acquire(self: &Arc<Self>) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Reports `err` (if any) and drops the reference count by one. When
    /// the count reaches zero, spawns the continuation on the executor.
    pub(crate) fn release(self: &Arc<Self>, err: Option<E>) {
        if let Some(err) = err {
            self.dependent_task_failed(err);
        }
        if self.ref_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.spawn_self();
        }
    }

    fn spawn_self(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.executor.spawn(Box::new(move || {
            let continuation = this.continuation.lock().unwrap().take();
            if let Some(continuation) = continuation {
                let err = this.first_error();
                continuation(err);
            } else {
                tracing::error!("waiting task spawned more than once; this is a bug");
            }
        }));
    }
}

/// A movable, single-owner handle to exactly one [`WaitingTask`].
///
/// Constructing a holder increments the task's ref count; releasing it
/// (explicitly via [`WaitingTaskHolder::done_waiting`] or implicitly via
/// `Drop`) decrements it, spawning the task once every holder has
/// released. Dropping a non-empty holder is equivalent to releasing with
/// no exception.
pub struct WaitingTaskHolder<E> {
    task: Option<Arc<WaitingTask<E>>>,
}

impl<E> WaitingTaskHolder<E>
where
    E: Clone + Send + Sync + 'static,
{
    /// Attaches to `task`, incrementing its ref count.
    pub fn new(task: Arc<WaitingTask<E>>) -> Self {
        task.acquire();
        Self { task: Some(task) }
    }

    /// Releases this holder, optionally reporting `err` as the task's
    /// failure. A no-op if the holder is already empty. After this call
    /// the holder is empty; dropping it afterward does nothing further.
    pub fn done_waiting(&mut self, err: Option<E>) {
        if let Some(task) = self.task.take() {
            task.release(err);
        }
    }

    /// Whether this holder still references a task.
    pub fn is_empty(&self) -> bool {
        self.task.is_none()
    }
}

impl<E> Drop for WaitingTaskHolder<E> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.release(None);
        }
    }
}
