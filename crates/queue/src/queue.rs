use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use serial_executor::Executor;

/// A nullary, type-erased task pushed onto a [`SerialTaskQueue`].
pub type Runnable = Box<dyn FnOnce() + Send + 'static>;

struct State {
    pending: VecDeque<Runnable>,
    /// Nests: paired `pause`/`resume` calls must not unblock the queue early.
    pause_count: usize,
    /// At most one dispatched runnable from this queue is ever in flight.
    running: bool,
}

/// FIFO serialization of runnables onto a shared executor.
///
/// At most one runnable pushed to a given queue executes at a time, and
/// runnables always execute in push order. `pause`/`resume` gate dispatch
/// without discarding anything already queued. A user runnable's panic is
/// swallowed here: the queue keeps running, and the caller is responsible
/// for surfacing failure some other way (typically a
/// [`serial_waiting::WaitingTaskList`](../serial_waiting/struct.WaitingTaskList.html)).
pub struct SerialTaskQueue {
    executor: Arc<dyn Executor>,
    state: Mutex<State>,
}

impl SerialTaskQueue {
    /// Builds a new, empty, unpaused queue dispatching onto `executor`.
    pub fn new(executor: Arc<dyn Executor>) -> Arc<Self> {
        Arc::new(Self {
            executor,
            state: Mutex::new(State {
                pending: VecDeque::new(),
                pause_count: 0,
                running: false,
            }),
        })
    }

    /// Enqueues `task`. On return, `task` is either queued behind earlier
    /// work or has already been handed to the executor.
    pub fn push(self: &Arc<Self>, task: Runnable) {
        let mut state = self.state.lock().unwrap();
        state.pending.push_back(task);
        let next = pick_next(&mut state);
        drop(state);
        if let Some(next) = next {
            self.dispatch(next);
        }
    }

    /// Increments the pause counter. Returns `true` iff this call
    /// transitioned the counter from 0 to 1 (i.e. the queue is now gated
    /// when it was not before).
    pub fn pause(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        state.pause_count += 1;
        state.pause_count == 1
    }

    /// Decrements the pause counter. Returns `true` iff this call
    /// transitioned the counter to 0, in which case dispatch of the next
    /// eligible runnable (if any) is attempted.
    ///
    /// # Panics
    ///
    /// Panics if called without a matching prior `pause` — the counter
    /// must never go negative.
    pub fn resume(self: &Arc<Self>) -> bool {
        let mut state = self.state.lock().unwrap();
        assert!(
            state.pause_count > 0,
            "resume() called without a matching pause()"
        );
        state.pause_count -= 1;
        let transitioned = state.pause_count == 0;
        let next = if transitioned {
            pick_next(&mut state)
        } else {
            None
        };
        drop(state);
        if let Some(next) = next {
            self.dispatch(next);
        }
        transitioned
    }

    /// Called by a dispatched runnable's wrapper once it has finished
    /// (successfully or not); marks this queue idle and dispatches the
    /// next eligible runnable.
    fn notify_and_run(self: &Arc<Self>) {
        let mut state = self.state.lock().unwrap();
        state.running = false;
        let next = pick_next(&mut state);
        drop(state);
        if let Some(next) = next {
            self.dispatch(next);
        }
    }

    /// Hands `task` to the executor wrapped so that a panic is swallowed
    /// and `notify_and_run` always runs afterward, whether or not the task
    /// panicked.
    fn dispatch(self: &Arc<Self>, task: Runnable) {
        let queue = Arc::clone(self);
        self.executor.spawn(Box::new(move || {
            if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                tracing::debug!("serial task queue runnable panicked; swallowing");
            }
            queue.notify_and_run();
        }));
    }
}

/// Dispatch rule ("pickNext"): pop the front runnable iff the queue is
/// unpaused and nothing of ours is already in flight.
fn pick_next(state: &mut State) -> Option<Runnable> {
    if state.pause_count == 0 && !state.running {
        if let Some(task) = state.pending.pop_front() {
            state.running = true;
            return Some(task);
        }
    }
    None
}
