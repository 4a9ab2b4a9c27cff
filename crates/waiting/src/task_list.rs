use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::task::WaitingTask;

enum Mode {
    Waiting,
    Fired,
}

struct Inner<E> {
    mode: Mode,
    pending: VecDeque<Arc<WaitingTask<E>>>,
    error: Option<E>,
}

/// A buffer-then-fire list of waiting-task continuations.
///
/// In the `Waiting` state, [`add`](Self::add) just enqueues. A single
/// [`done_waiting`](Self::done_waiting) call transitions to `Fired`,
/// records the (possibly absent) failure, and releases every queued task.
/// After that edge, further `add` calls run their task immediately instead
/// of queueing, propagating the stored failure. [`reset`](Self::reset)
/// returns the list to `Waiting`, and requires the queue to already be
/// empty — quiescence is the caller's responsibility, not something this
/// type defends against.
pub struct WaitingTaskList<E> {
    inner: Mutex<Inner<E>>,
}

impl<E> Default for WaitingTaskList<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> WaitingTaskList<E>
where
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                mode: Mode::Waiting,
                pending: VecDeque::new(),
                error: None,
            }),
        }
    }

    /// Adds `task`, incrementing its ref count. Queued while `Waiting`;
    /// released immediately (propagating the stored failure, if any) once
    /// `Fired`.
    pub fn add(&self, task: Arc<WaitingTask<E>>) {
        task.acquire();

        let mut inner = self.inner.lock().unwrap();
        match inner.mode {
            Mode::Waiting => {
                inner.pending.push_back(task);
            }
            Mode::Fired => {
                let err = inner.error.clone();
                // Never run user code (the spawn path) while holding our
                // own lock.
                drop(inner);
                task.release(err);
            }
        }
    }

    /// Transitions `Waiting -> Fired`, stores `err`, and drains every
    /// queued task, releasing each (propagating `err`).
    ///
    /// # Panics
    ///
    /// Panics if the list is already `Fired` — call [`reset`](Self::reset)
    /// first.
    pub fn done_waiting(&self, err: Option<E>) {
        let drained = {
            let mut inner = self.inner.lock().unwrap();
            assert!(
                matches!(inner.mode, Mode::Waiting),
                "done_waiting() called on a list that has already fired"
            );
            inner.mode = Mode::Fired;
            inner.error = err;
            inner.pending.drain(..).collect::<Vec<_>>()
        };

        for task in drained {
            let err = self.inner.lock().unwrap().error.clone();
            task.release(err);
        }
    }

    /// Transitions `Fired -> Waiting` and clears the stored failure.
    ///
    /// # Panics
    ///
    /// Panics if the queue is non-empty — quiescence between cycles is a
    /// precondition, not something `reset` arbitrates against concurrent
    /// `add` calls for.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        assert!(
            inner.pending.is_empty(),
            "reset() requires the waiting task list to be empty"
        );
        inner.mode = Mode::Waiting;
        inner.error = None;
    }
}
