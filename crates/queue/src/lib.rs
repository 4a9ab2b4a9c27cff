//! FIFO serial task queues, and chains composing several of them.
//!
//! A [`SerialTaskQueue`] guarantees at most one of its pushed runnables is
//! in flight at any instant, in push order, on top of a shared
//! [`serial_executor::Executor`]. A [`SerialTaskQueueChain`] composes `N`
//! queues so a task runs only once it holds all of them, in the order the
//! chain was built with.

mod chain;
mod queue;

pub use chain::{ChainError, SerialTaskQueueChain};
pub use queue::{Runnable, SerialTaskQueue};
