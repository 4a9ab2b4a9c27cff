use std::sync::Arc;

use serial_executor::RunOnDrop;
use thiserror::Error;

use crate::queue::{Runnable, SerialTaskQueue};

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("a chain must be built from at least one queue")]
    EmptyChain,
}

/// Composes `N` [`SerialTaskQueue`]s into a single serial resource: a task
/// pushed to the chain runs only once it holds every member queue,
/// simultaneously, in the order the chain was constructed with.
///
/// That construction order is also the lock-acquisition order; callers
/// must keep it consistent across every chain sharing member queues, or
/// risk deadlock (spec's own caveat — this type does nothing to detect it).
pub struct SerialTaskQueueChain {
    /// Fixed at construction and never mutated, so — unlike the original
    /// implementation this is grounded on — no internal lock is needed to
    /// guard this list.
    queues: Vec<Arc<SerialTaskQueue>>,
}

impl SerialTaskQueueChain {
    /// Builds a chain over `queues`, acquired in the given order for every
    /// task pushed to it.
    pub fn new(queues: Vec<Arc<SerialTaskQueue>>) -> Result<Arc<Self>, ChainError> {
        if queues.is_empty() {
            return Err(ChainError::EmptyChain);
        }
        Ok(Arc::new(Self { queues }))
    }

    /// Pushes `f` onto the chain. `f` runs only once every member queue is
    /// held, in construction order.
    pub fn push<F>(self: &Arc<Self>, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let task: Runnable = Box::new(f);
        let chain = Arc::clone(self);
        if self.queues.len() == 1 {
            self.queues[0].push(Box::new(move || chain.run_and_release(task)));
        } else {
            self.queues[0].push(Box::new(move || chain.pass_down(1, task)));
        }
    }

    /// Invoked while running inside `queues[idx - 1]`'s dispatched task:
    /// pauses that queue (so it cannot release its in-flight slot to
    /// another task until this chained task returns) and pushes onward
    /// into `queues[idx]`.
    fn pass_down(self: &Arc<Self>, idx: usize, task: Runnable) {
        self.queues[idx - 1].pause();

        let chain = Arc::clone(self);
        let n = self.queues.len();
        self.queues[idx].push(Box::new(move || {
            if idx + 1 == n {
                chain.run_and_release(task)
            } else {
                chain.pass_down(idx + 1, task)
            }
        }));
    }

    /// Runs `task`, then resumes every previously paused queue
    /// (`queues[0..len-1]`, in reverse order) whether or not `task`
    /// panicked. A panic is allowed to keep unwinding past this point —
    /// the innermost queue's own dispatch wrapper is what actually
    /// swallows it.
    fn run_and_release(self: &Arc<Self>, task: Runnable) {
        let chain = Arc::clone(self);
        let _release_upstream = RunOnDrop::new(move || {
            for queue in chain.queues[..chain.queues.len() - 1].iter().rev() {
                queue.resume();
            }
        });
        task();
    }
}
