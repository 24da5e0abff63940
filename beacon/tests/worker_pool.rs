#[cfg(test)]
mod tests {
    use beacon::runtime::{Job, PoolConfig, Submitted, WorkerPool};

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::{self, Receiver};
    use std::thread::{self, ThreadId};
    use std::time::Duration;

    enum Work {
        /// Occupies a worker until the sender is dropped.
        Block(Receiver<()>),

        /// Counts its own executions and records the executing thread.
        Mark {
            id: usize,
            hits: Arc<Vec<AtomicUsize>>,
            ran_on: Arc<std::sync::Mutex<Vec<(usize, ThreadId)>>>,
        },
    }

    impl Job for Work {
        fn run(self) {
            match self {
                Work::Block(release) => {
                    let _ = release.recv();
                }
                Work::Mark { id, hits, ran_on } => {
                    hits[id].fetch_add(1, Ordering::SeqCst);
                    ran_on
                        .lock()
                        .unwrap()
                        .push((id, thread::current().id()));
                }
            }
        }
    }

    #[test]
    fn test_saturated_pool_runs_jobs_on_submitter_exactly_once() {
        let pool = WorkerPool::new(PoolConfig::new().workers(1).queue_capacity(1))
            .expect("Failed to start pool");

        let (release, blocked) = mpsc::channel();
        pool.submit(Work::Block(blocked));
        thread::sleep(Duration::from_millis(50));

        const JOBS: usize = 20;
        let hits = Arc::new((0..JOBS).map(|_| AtomicUsize::new(0)).collect::<Vec<_>>());
        let ran_on = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut inline = Vec::new();
        for id in 0..JOBS {
            let submitted = pool.submit(Work::Mark {
                id,
                hits: hits.clone(),
                ran_on: ran_on.clone(),
            });

            if submitted == Submitted::RanInline {
                inline.push(id);
            }
        }

        // One slot in the queue, the only worker blocked.
        assert!(inline.len() >= JOBS - 1, "only {} ran inline", inline.len());
        assert!(pool.pending() <= 1);

        let me = thread::current().id();
        for (id, thread) in ran_on.lock().unwrap().iter() {
            if inline.contains(id) {
                assert_eq!(*thread, me);
            }
        }

        drop(release);
        pool.shutdown();

        for (id, count) in hits.iter().enumerate() {
            assert_eq!(count.load(Ordering::SeqCst), 1, "job {id}");
        }
    }

    #[test]
    fn test_submit_after_shutdown_runs_inline() {
        let pool = WorkerPool::new(PoolConfig::new().workers(2)).expect("Failed to start pool");
        pool.shutdown();

        let hits = Arc::new(vec![AtomicUsize::new(0)]);
        let submitted = pool.submit(Work::Mark {
            id: 0,
            hits: hits.clone(),
            ran_on: Arc::new(std::sync::Mutex::new(Vec::new())),
        });

        assert_eq!(submitted, Submitted::RanInline);
        assert_eq!(hits[0].load(Ordering::SeqCst), 1);
    }
}
