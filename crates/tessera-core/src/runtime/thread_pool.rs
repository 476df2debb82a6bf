//! Executor thread pool
//!
//! A fixed set of worker threads draining a shared task queue. The pool is an
//! explicit object: it is started once, handed to every execution context
//! that may fan out work, and shut down explicitly (or on drop).

use super::{RuntimeState, TaskInfo};
use crate::error::{Error, Result};
use crate::proxy::TaskFunction;
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

/// Commands sent to worker threads
enum PoolCommand {
    /// Run a task
    Run {
        state: Arc<RuntimeState>,
        task: Arc<TaskInfo>,
        function: TaskFunction,
    },
    /// Exit the worker loop
    Shutdown,
}

/// Counters of the pool
#[derive(Debug, Default)]
pub struct ThreadPoolStats {
    /// Tasks accepted by `submit_task`
    pub tasks_submitted: AtomicU64,
    /// Tasks that returned successfully
    pub tasks_completed: AtomicU64,
    /// Tasks that returned an error
    pub tasks_failed: AtomicU64,
}

/// Text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Fixed-size pool of worker threads
pub struct ExecutorThreadPool {
    sender: Sender<PoolCommand>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    num_workers: usize,
    shutdown: Arc<AtomicBool>,
    stats: Arc<ThreadPoolStats>,
}

crate::proxy_opaque!(ExecutorThreadPool => "ExecutorThreadPool");

impl ExecutorThreadPool {
    /// Start `num_workers` worker threads
    pub fn start(num_workers: usize) -> Result<Arc<Self>> {
        if num_workers == 0 {
            return Err(Error::config("thread pool needs at least one worker"));
        }
        let (sender, receiver) = unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(ThreadPoolStats::default());

        let mut workers = Vec::with_capacity(num_workers);
        for worker_id in 0..num_workers {
            let receiver = receiver.clone();
            let stats = stats.clone();
            let handle = thread::Builder::new()
                .name(format!("tessera-worker-{worker_id}"))
                .spawn(move || Self::worker_loop(worker_id, receiver, stats))
                .map_err(|e| Error::executor(format!("failed to spawn worker: {e}")))?;
            workers.push(handle);
        }

        tracing::info!(num_workers, "executor thread pool started");
        Ok(Arc::new(Self {
            sender,
            workers: Mutex::new(workers),
            num_workers,
            shutdown,
            stats,
        }))
    }

    /// Start one worker per hardware thread
    pub fn with_hardware_concurrency() -> Result<Arc<Self>> {
        let n = thread::available_parallelism().map_or(1, |n| n.get());
        Self::start(n)
    }

    fn worker_loop(worker_id: usize, receiver: Receiver<PoolCommand>, stats: Arc<ThreadPoolStats>) {
        tracing::trace!(worker_id, "worker started");
        while let Ok(command) = receiver.recv() {
            match command {
                PoolCommand::Run {
                    state,
                    task,
                    function,
                } => {
                    tracing::trace!(worker_id, task_id = task.task_id, function = function.name(), "running task");
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| function.run(state.clone(), task)))
                        .unwrap_or_else(|payload| {
                            let message = panic_message(payload.as_ref());
                            tracing::error!(worker_id, function = function.name(), %message, "task panicked");
                            Err(Error::executor(format!("task '{}' panicked: {message}", function.name())))
                        });
                    match outcome {
                        Ok(()) => {
                            stats.tasks_completed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(error) => {
                            stats.tasks_failed.fetch_add(1, Ordering::Relaxed);
                            state.record_task_error(error);
                        }
                    }
                }
                PoolCommand::Shutdown => break,
            }
        }
        tracing::trace!(worker_id, "worker stopped");
    }

    /// Enqueue `function(state, task)` on some worker; never blocks
    pub fn submit_task(
        &self,
        state: Arc<RuntimeState>,
        task: Arc<TaskInfo>,
        function: TaskFunction,
    ) -> Result<()> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::executor("thread pool is shut down"));
        }
        self.stats.tasks_submitted.fetch_add(1, Ordering::Relaxed);
        self.sender
            .send(PoolCommand::Run {
                state,
                task,
                function,
            })
            .map_err(|_| Error::executor("thread pool queue is closed"))
    }

    /// Number of worker threads
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Counters
    pub fn stats(&self) -> &ThreadPoolStats {
        &self.stats
    }

    /// Whether `shutdown` was called
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stop accepting tasks, let queued tasks finish and join the workers
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        for _ in 0..self.num_workers {
            let _ = self.sender.send(PoolCommand::Shutdown);
        }
        let workers = std::mem::take(&mut *self.workers.lock());
        let current = thread::current().id();
        for worker in workers {
            // the last handle may be released by a worker finishing its task
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                tracing::error!("executor worker panicked");
            }
        }
        tracing::info!(
            completed = self.stats.tasks_completed.load(Ordering::Relaxed),
            failed = self.stats.tasks_failed.load(Ordering::Relaxed),
            "executor thread pool stopped"
        );
    }
}

impl Drop for ExecutorThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::TypeRegistry;
    use crate::runtime::RuntimeStateBuilder;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn empty_state() -> Arc<RuntimeState> {
        Arc::new(
            RuntimeStateBuilder::new()
                .finalize(&mut TypeRegistry::new(), "PoolTest")
                .instantiate(),
        )
    }

    #[test]
    fn test_tasks_run_on_workers() {
        let pool = ExecutorThreadPool::start(3).unwrap();
        let hits = Arc::new(AtomicU32::new(0));
        let (done_tx, done_rx) = crossbeam_channel::unbounded();
        let state = empty_state();
        for i in 0..8 {
            let hits = hits.clone();
            let done_tx = done_tx.clone();
            let f = TaskFunction::new("count", move |_, task: Arc<TaskInfo>| {
                hits.fetch_add(task.task_id + 1, Ordering::SeqCst);
                let _ = done_tx.send(());
                Ok(())
            });
            pool.submit_task(state.clone(), TaskInfo::shared(i, 8, 0, 0), f)
                .unwrap();
        }
        for _ in 0..8 {
            done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 36);
        pool.shutdown();
        assert_eq!(pool.stats().tasks_completed.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_task_errors_are_recorded_in_state() {
        let pool = ExecutorThreadPool::start(1).unwrap();
        let state = empty_state();
        let f = TaskFunction::new("fail", |_, _| Err(Error::DivideByZero));
        pool.submit_task(state.clone(), TaskInfo::shared(0, 1, 0, 0), f)
            .unwrap();
        pool.shutdown();
        assert_eq!(state.raise_task_error().unwrap_err(), Error::DivideByZero);
    }

    #[test]
    fn test_panicking_task_keeps_worker_alive() {
        let pool = ExecutorThreadPool::start(1).unwrap();
        let state = empty_state();
        let f = TaskFunction::new("explode", |_, _| panic!("kaboom"));
        pool.submit_task(state.clone(), TaskInfo::shared(0, 2, 0, 0), f)
            .unwrap();

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let f = TaskFunction::new("after", move |_, _| {
            let _ = done_tx.send(());
            Ok(())
        });
        pool.submit_task(state.clone(), TaskInfo::shared(1, 2, 0, 0), f)
            .unwrap();
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        pool.shutdown();

        assert_eq!(pool.stats().tasks_failed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().tasks_completed.load(Ordering::SeqCst), 1);
        match state.raise_task_error() {
            Err(Error::Executor(message)) => assert!(message.contains("kaboom")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let pool = ExecutorThreadPool::start(1).unwrap();
        pool.shutdown();
        let f = TaskFunction::new("noop", |_, _| Ok(()));
        assert!(matches!(
            pool.submit_task(empty_state(), TaskInfo::shared(0, 1, 0, 0), f),
            Err(Error::Executor(_))
        ));
        assert!(ExecutorThreadPool::start(0).is_err());
    }
}
