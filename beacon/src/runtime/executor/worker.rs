use crate::runtime::executor::core::Job;
use crate::runtime::queue::BoundedQueue;

use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::error;

/// A worker thread of the pool.
///
/// The worker pops jobs from the shared queue in FIFO order and parks
/// while the queue is empty. It exits once the queue is closed and
/// drained.
pub(crate) struct Worker<J> {
    /// Index of the worker, used in its thread name.
    id: usize,

    /// Queue shared by all workers of the pool.
    queue: Arc<BoundedQueue<J>>,
}

impl<J: Job> Worker<J> {
    /// Creates a new worker.
    ///
    /// # Arguments
    ///
    /// * `id` - Worker identifier
    /// * `queue` - Queue shared with the other workers
    pub(crate) fn new(id: usize, queue: Arc<BoundedQueue<J>>) -> Self {
        Self { id, queue }
    }

    /// Starts the worker on a dedicated thread named `beacon-worker-<id>`.
    pub(crate) fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("beacon-worker-{}", self.id))
            .spawn(move || self.run())
    }

    /// Runs jobs until the queue is closed and empty.
    ///
    /// A panicking job is logged and the worker moves on to the next one.
    fn run(self) {
        while let Some(job) = self.queue.pop() {
            if catch_unwind(AssertUnwindSafe(|| job.run())).is_err() {
                error!(worker = self.id, "job panicked");
            }
        }
    }
}
