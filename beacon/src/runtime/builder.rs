use std::thread;

/// Default capacity of the pending-job queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 200;

/// Returns the default number of worker threads.
///
/// Two cores are left for the dispatcher and acceptor threads, with a
/// floor of two workers on small machines.
pub fn default_workers() -> usize {
    let cpus = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    cpus.saturating_sub(2).max(2)
}

/// Sizing of a [`WorkerPool`](super::WorkerPool).
///
/// # Examples
///
/// ```rust
/// use beacon::runtime::PoolConfig;
///
/// let config = PoolConfig::new().workers(4).queue_capacity(64);
/// assert_eq!(config.worker_count(), 4);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker threads.
    workers: usize,

    /// Maximum number of jobs waiting for a worker.
    queue_capacity: usize,
}

impl PoolConfig {
    /// Creates a configuration with [`default_workers`] threads and a
    /// queue of [`DEFAULT_QUEUE_CAPACITY`] jobs.
    pub fn new() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Sets the number of worker threads.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn workers(mut self, n: usize) -> Self {
        assert!(n > 0, "workers must be > 0");

        self.workers = n;
        self
    }

    /// Sets the capacity of the pending-job queue.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn queue_capacity(mut self, n: usize) -> Self {
        assert!(n > 0, "queue_capacity must be > 0");

        self.queue_capacity = n;
        self
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }

    pub fn capacity(&self) -> usize {
        self.queue_capacity
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_leave_room_for_io_threads() {
        let config = PoolConfig::default();

        assert!(config.worker_count() >= 2);
        assert_eq!(config.capacity(), DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    #[should_panic(expected = "workers must be > 0")]
    fn zero_workers_is_rejected() {
        let _ = PoolConfig::new().workers(0);
    }
}
