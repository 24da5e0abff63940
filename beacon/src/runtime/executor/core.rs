use crate::runtime::builder::PoolConfig;
use crate::runtime::executor::worker::Worker;
use crate::runtime::queue::BoundedQueue;
use crate::utils::lock;

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, trace};

/// A unit of work accepted by a [`WorkerPool`].
///
/// Jobs are consumed when they run, so each submitted job runs at most
/// once, either on a worker or on the submitting thread.
pub trait Job: Send + 'static {
    fn run(self);
}

/// Where a submitted job ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    /// The job was queued for a worker thread.
    Queued,

    /// The queue was full (or the pool stopped), so the job already ran on
    /// the caller's thread.
    RanInline,
}

/// Fixed-size pool of worker threads fed by a bounded queue.
///
/// The `WorkerPool` is responsible for:
/// - spawning its worker threads (`beacon-worker-N`),
/// - accepting jobs without ever blocking the submitter,
/// - running jobs on the caller when saturated,
/// - orderly shutdown and thread joining.
pub struct WorkerPool<J: Job> {
    /// Queue shared with every worker.
    queue: Arc<BoundedQueue<J>>,

    /// Join handles for worker threads.
    handles: Mutex<Vec<JoinHandle<()>>>,

    /// Set once [`shutdown`](Self::shutdown) has begun.
    shutdown: AtomicBool,
}

impl<J: Job> WorkerPool<J> {
    /// Starts a pool sized by `config`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if a worker thread cannot be spawned. Threads
    /// already started are stopped before returning.
    pub fn new(config: PoolConfig) -> io::Result<Self> {
        let pool = Self {
            queue: Arc::new(BoundedQueue::new(config.capacity())),
            handles: Mutex::new(Vec::with_capacity(config.worker_count())),
            shutdown: AtomicBool::new(false),
        };

        for id in 0..config.worker_count() {
            let worker = Worker::new(id, pool.queue.clone());

            match worker.spawn() {
                Ok(handle) => lock(&pool.handles).push(handle),
                Err(e) => {
                    pool.shutdown();
                    return Err(e);
                }
            }
        }

        debug!(
            workers = config.worker_count(),
            queue_capacity = config.capacity(),
            "worker pool started"
        );

        Ok(pool)
    }

    /// Hands `job` to a worker, or runs it right here if no slot is free.
    pub fn submit(&self, job: J) -> Submitted {
        if self.shutdown.load(Ordering::Acquire) {
            job.run();
            return Submitted::RanInline;
        }

        match self.queue.try_push(job) {
            Ok(()) => Submitted::Queued,
            Err(job) => {
                trace!("worker pool saturated, running job on the caller");
                job.run();
                Submitted::RanInline
            }
        }
    }

    /// Number of jobs waiting for a worker.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Stops accepting jobs, lets the workers finish what is queued and
    /// joins them.
    ///
    /// Calling it more than once is harmless.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.queue.close();

        let handles: Vec<_> = lock(&self.handles).drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl<J: Job> Drop for WorkerPool<J> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc::{Sender, channel};
    use std::thread;

    struct Count(Arc<AtomicUsize>);

    impl Job for Count {
        fn run(self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Report(Sender<String>);

    impl Job for Report {
        fn run(self) {
            let name = thread::current().name().unwrap_or_default().to_string();
            self.0.send(name).unwrap();
        }
    }

    #[test]
    fn every_job_runs_once_before_shutdown_returns() {
        let pool = WorkerPool::new(PoolConfig::new().workers(3).queue_capacity(8)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..500 {
            pool.submit(Count(counter.clone()));
        }
        pool.shutdown();

        assert_eq!(counter.load(Ordering::SeqCst), 500);
    }

    #[test]
    fn workers_carry_their_thread_name() {
        let pool = WorkerPool::new(PoolConfig::new().workers(1).queue_capacity(1)).unwrap();
        let (tx, rx) = channel();

        assert_eq!(pool.submit(Report(tx)), Submitted::Queued);
        assert_eq!(rx.recv().unwrap(), "beacon-worker-0");
    }

    #[test]
    fn submit_after_shutdown_runs_inline() {
        let pool = WorkerPool::new(PoolConfig::new().workers(1).queue_capacity(1)).unwrap();
        pool.shutdown();

        let counter = Arc::new(AtomicUsize::new(0));
        assert_eq!(pool.submit(Count(counter.clone())), Submitted::RanInline);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
