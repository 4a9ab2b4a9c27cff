//! A minimal thread pool executor adapter.
//!
//! The rest of this workspace treats the executor purely through the
//! [`Executor`] trait: `spawn` hands a task to some worker, `wait_for_idle`
//! blocks until every previously spawned task has returned. [`ThreadPoolExecutor`]
//! is the concrete, testable implementation the other crates run their tests
//! against; production embedders may swap in their own `Executor` (a
//! framework's own thread pool, a tokio `Handle`'s blocking pool, etc.)
//! without touching `serial_queue`, `serial_waiting`, or `serial_cache`.

use std::env;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use concurrent_queue::ConcurrentQueue;

mod defer;
pub use defer::RunOnDrop;

/// A type-erased, nullary task handed to an [`Executor`].
pub type BoxedTask = Box<dyn FnOnce() + Send + 'static>;

/// Contract required of a parallel task executor (spec §4.1).
///
/// `spawn` must not run `task` inline before returning, and establishes a
/// happens-before from the call site to the task's entry. `wait_for_idle`
/// establishes a happens-before from every completed task's exit to its own
/// return.
pub trait Executor: Send + Sync {
    /// Schedule `task` for execution on some worker thread.
    fn spawn(&self, task: BoxedTask);

    /// Block until every task previously `spawn`ed has returned.
    fn wait_for_idle(&self);
}

/// Environment variable used to override the worker thread count, mirroring
/// the teacher's `VALTRON_NUM_THREADS` convention.
pub const NUM_THREADS_ENV: &str = "SERIAL_EXEC_NUM_THREADS";

pub(crate) fn get_max_threads() -> usize {
    let system_value = thread::available_parallelism()
        .ok()
        .map_or(1, std::num::NonZero::get);
    tracing::debug!("thread::available_parallelism() reported: {system_value}");
    system_value
}

pub(crate) fn get_num_threads() -> usize {
    let thread_num = match env::var(NUM_THREADS_ENV)
        .ok()
        .and_then(|s| usize::from_str(&s).ok())
    {
        Some(n) if n > 0 => {
            tracing::debug!("retrieved thread count {n} from {NUM_THREADS_ENV}");
            n
        }
        _ => get_max_threads(),
    };

    tracing::debug!("thread pool will use {thread_num} worker threads");
    thread_num
}

struct Gate {
    /// Tasks pushed but not yet popped by a worker; guards against missed wakeups.
    pending_wakeups: usize,
    /// Tasks queued or currently in-flight; zero means the pool is idle.
    outstanding: usize,
    shutdown: bool,
}

struct Shared {
    queue: ConcurrentQueue<BoxedTask>,
    gate: Mutex<Gate>,
    work_ready: Condvar,
    idle: Condvar,
}

/// A fixed-size pool of worker threads implementing [`Executor`].
///
/// Tasks run to completion on whichever worker picks them up; there is no
/// work-stealing between workers beyond pulling from the single shared
/// queue, and no suspension mid-task (spec §5).
pub struct ThreadPoolExecutor {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPoolExecutor {
    /// Builds a pool sized from [`NUM_THREADS_ENV`] or
    /// `std::thread::available_parallelism`.
    pub fn new() -> Self {
        Self::with_threads(get_num_threads())
    }

    /// Builds a pool with exactly `threads` worker threads.
    ///
    /// # Panics
    ///
    /// Panics if `threads == 0`.
    pub fn with_threads(threads: usize) -> Self {
        assert!(threads > 0, "thread pool requires at least one worker thread");

        let shared = Arc::new(Shared {
            queue: ConcurrentQueue::unbounded(),
            gate: Mutex::new(Gate {
                pending_wakeups: 0,
                outstanding: 0,
                shutdown: false,
            }),
            work_ready: Condvar::new(),
            idle: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(threads);
        for idx in 0..threads {
            let worker_shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("serial-exec-worker-{idx}"))
                .spawn(move || worker_loop(&worker_shared))
                .expect("failed to spawn executor worker thread");
            workers.push(handle);
        }

        tracing::debug!("thread pool executor started with {threads} workers");

        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }
}

impl Default for ThreadPoolExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for ThreadPoolExecutor {
    fn spawn(&self, task: BoxedTask) {
        {
            let mut gate = self.shared.gate.lock().unwrap();
            gate.outstanding += 1;
            gate.pending_wakeups += 1;
        }
        self.shared
            .queue
            .push(task)
            .unwrap_or_else(|_| unreachable!("executor queue is never closed while the pool is alive"));
        self.shared.work_ready.notify_one();
    }

    fn wait_for_idle(&self) {
        let mut gate = self.shared.gate.lock().unwrap();
        while gate.outstanding != 0 {
            gate = self.shared.idle.wait(gate).unwrap();
        }
    }
}

impl Drop for ThreadPoolExecutor {
    fn drop(&mut self) {
        {
            let mut gate = self.shared.gate.lock().unwrap();
            gate.shutdown = true;
        }
        self.shared.work_ready.notify_all();

        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for handle in workers {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: &Arc<Shared>) {
    loop {
        let mut gate = shared.gate.lock().unwrap();
        while gate.pending_wakeups == 0 && !gate.shutdown {
            gate = shared.work_ready.wait(gate).unwrap();
        }
        if gate.pending_wakeups == 0 {
            debug_assert!(gate.shutdown);
            return;
        }
        gate.pending_wakeups -= 1;
        drop(gate);

        let task = match shared.queue.pop() {
            Ok(task) => task,
            Err(_) => continue,
        };

        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            tracing::error!("executor task panicked; continuing with remaining work");
        }

        let mut gate = shared.gate.lock().unwrap();
        gate.outstanding -= 1;
        if gate.outstanding == 0 {
            shared.idle.notify_all();
        }
    }
}
