use crate::utils::lock;

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Fixed-capacity FIFO shared by the pool's workers.
///
/// Producers never block: [`try_push`](Self::try_push) hands the job back
/// when the queue is full. Consumers park on a condition variable until a
/// job arrives or the queue is closed.
pub(crate) struct BoundedQueue<J> {
    state: Mutex<State<J>>,
    capacity: usize,
    available: Condvar,
}

struct State<J> {
    jobs: VecDeque<J>,
    closed: bool,
}

impl<J> BoundedQueue<J> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                jobs: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            available: Condvar::new(),
        }
    }

    /// Enqueues `job`, or returns it if the queue is full or closed.
    pub(crate) fn try_push(&self, job: J) -> Result<(), J> {
        let mut state = lock(&self.state);

        if state.closed || state.jobs.len() >= self.capacity {
            return Err(job);
        }

        state.jobs.push_back(job);
        drop(state);

        self.available.notify_one();
        Ok(())
    }

    /// Takes the oldest job, parking until one is available.
    ///
    /// Returns `None` once the queue is closed **and** empty: jobs queued
    /// before [`close`](Self::close) are still handed out.
    pub(crate) fn pop(&self) -> Option<J> {
        let mut state = lock(&self.state);

        loop {
            if let Some(job) = state.jobs.pop_front() {
                return Some(job);
            }

            if state.closed {
                return None;
            }

            state = self
                .available
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// Refuses further jobs and wakes every parked consumer.
    pub(crate) fn close(&self) {
        lock(&self.state).closed = true;
        self.available.notify_all();
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.state).jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::BoundedQueue;

    use std::sync::Arc;
    use std::thread;

    #[test]
    fn full_queue_hands_the_job_back() {
        let queue = BoundedQueue::new(2);

        assert!(queue.try_push(1).is_ok());
        assert!(queue.try_push(2).is_ok());
        assert_eq!(queue.try_push(3), Err(3));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop(), Some(1));
        assert!(queue.try_push(3).is_ok());
    }

    #[test]
    fn close_drains_before_ending() {
        let queue = BoundedQueue::new(4);
        queue.try_push("a").unwrap();
        queue.close();

        assert_eq!(queue.try_push("b"), Err("b"));
        assert_eq!(queue.pop(), Some("a"));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn close_wakes_parked_consumers() {
        let queue = Arc::new(BoundedQueue::<u32>::new(1));

        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || queue.pop())
            })
            .collect();

        thread::sleep(std::time::Duration::from_millis(20));
        queue.close();

        for consumer in consumers {
            assert_eq!(consumer.join().unwrap(), None);
        }
    }
}
