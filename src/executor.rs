//! Worker pool for partitioned system execution
//!
//! Fixed-size pool of OS threads blocking on a condition variable.
//! Tasks go through a mutex-protected FIFO; `wait_all` blocks the caller
//! until the queue is empty and nothing is in flight. A panic on a
//! worker is captured and re-raised from `wait_all`, so a failing
//! partitioned system surfaces on the dispatching thread.

use std::collections::VecDeque;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::error::{EcsError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    queue: VecDeque<Job>,
    stopped: bool,
    in_flight: usize,
    panic: Option<Box<dyn std::any::Any + Send>>,
}

struct PoolShared {
    state: Mutex<PoolState>,
    job_available: Condvar,
    all_done: Condvar,
}

/// Fixed-size thread pool owned by the engine
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Worker count used by default: hardware concurrency, 4 when the
    /// platform reports nothing.
    pub fn default_threads() -> usize {
        std::thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(4)
    }

    /// Spawn a pool with `threads` workers (at least one)
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                stopped: false,
                in_flight: 0,
                panic: None,
            }),
            job_available: Condvar::new(),
            all_done: Condvar::new(),
        });

        let workers = (0..threads)
            .map(|index| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("weft-worker-{index}"))
                    .spawn(move || worker_loop(shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        tracing::debug!(threads, "worker pool started");
        Self { shared, workers }
    }

    /// Number of worker threads
    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Submit a task.
    ///
    /// Fails with [`EcsError::WorkerPoolStopped`] once the pool has shut
    /// down.
    pub fn execute<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.shared.state.lock();
            if state.stopped {
                return Err(EcsError::WorkerPoolStopped);
            }
            state.queue.push_back(Box::new(job));
        }
        self.shared.job_available.notify_one();
        Ok(())
    }

    /// Block until the queue is empty and no task is in flight.
    ///
    /// Re-raises the first panic captured on a worker.
    pub fn wait_all(&self) {
        let mut state = self.shared.state.lock();
        while !state.queue.is_empty() || state.in_flight > 0 {
            self.shared.all_done.wait(&mut state);
        }
        if let Some(payload) = state.panic.take() {
            drop(state);
            resume_unwind(payload);
        }
    }

    /// Stop accepting tasks, drain the queue, and join every worker.
    ///
    /// Idempotent; also performed on drop.
    pub fn shutdown(&mut self) {
        {
            let mut state = self.shared.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
        }
        self.shared.job_available.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        tracing::debug!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    loop {
        let job = {
            let mut state = shared.state.lock();
            loop {
                if let Some(job) = state.queue.pop_front() {
                    state.in_flight += 1;
                    break job;
                }
                if state.stopped {
                    return;
                }
                shared.job_available.wait(&mut state);
            }
        };

        let outcome = catch_unwind(AssertUnwindSafe(job));

        let mut state = shared.state.lock();
        state.in_flight -= 1;
        if let Err(payload) = outcome {
            // Keep the first panic; wait_all re-raises it on the caller.
            if state.panic.is_none() {
                state.panic = Some(payload);
            }
        }
        if state.queue.is_empty() && state.in_flight == 0 {
            shared.all_done.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_tasks_all_run() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..64 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.wait_all();
        assert_eq!(counter.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn test_execute_after_shutdown_fails() {
        let mut pool = WorkerPool::new(2);
        pool.execute(|| {}).unwrap();
        pool.shutdown();
        assert_eq!(pool.execute(|| {}), Err(EcsError::WorkerPoolStopped));
    }

    #[test]
    fn test_wait_all_with_empty_queue_returns() {
        let pool = WorkerPool::new(2);
        pool.wait_all();
    }

    #[test]
    fn test_worker_panic_reaches_caller() {
        let pool = WorkerPool::new(2);
        pool.execute(|| panic!("task failed")).unwrap();
        let result = catch_unwind(AssertUnwindSafe(|| pool.wait_all()));
        assert!(result.is_err());

        // The pool survives a panicking task.
        let counter = Arc::new(AtomicUsize::new(0));
        let probe = Arc::clone(&counter);
        pool.execute(move || {
            probe.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        pool.wait_all();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
