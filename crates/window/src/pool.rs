//! Decode worker pool.
//!
//! Workers poll a shared FIFO queue of page jobs, run the executor for each
//! job, and sleep briefly when the queue is empty. Shutdown is signalled
//! with an atomic flag and joins every worker thread.

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// One unit of work: produce the image for a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeJob {
    pub page_index: u32,
    /// Whether the decoded image should stay resident in memory, or only
    /// be persisted to the disk cache.
    pub keep_in_memory: bool,
}

/// Shared FIFO of pending decode jobs.
#[derive(Clone, Default)]
pub struct JobQueue {
    jobs: Arc<Mutex<VecDeque<DecodeJob>>>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, job: DecodeJob) {
        self.jobs.lock().unwrap().push_back(job);
    }

    pub fn pop(&self) -> Option<DecodeJob> {
        self.jobs.lock().unwrap().pop_front()
    }

    /// Removes and returns every pending job.
    pub fn drain(&self) -> Vec<DecodeJob> {
        self.jobs.lock().unwrap().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().unwrap().is_empty()
    }
}

/// Callback a worker invokes for each job it pulls.
pub type JobExecutor = Arc<dyn Fn(DecodeJob) + Send + Sync>;

/// Worker pool sizing and polling cadence.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads, clamped to 1..=10.
    pub num_workers: usize,
    /// How long an idle worker sleeps before re-checking the queue.
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl WorkerPoolConfig {
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Self::default()
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Pool of decode worker threads feeding off a [`JobQueue`].
pub struct WorkerPool {
    workers: Vec<Worker>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawns the worker threads and starts polling `queue`.
    pub fn new(queue: JobQueue, executor: JobExecutor, config: WorkerPoolConfig) -> Self {
        let num_workers = config.num_workers.clamp(1, 10);
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(num_workers);

        for id in 0..num_workers {
            workers.push(Worker::new(
                id,
                queue.clone(),
                executor.clone(),
                shutdown.clone(),
                config.poll_interval,
            ));
        }

        Self { workers, shutdown }
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Signals all workers to stop and waits for them to exit.
    ///
    /// Workers finish the job they are currently running; pending jobs left
    /// in the queue are not picked up.
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::Release);
        for worker in self.workers {
            worker.join();
        }
    }
}

struct Worker {
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn new(
        id: usize,
        queue: JobQueue,
        executor: JobExecutor,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> Self {
        let thread = thread::Builder::new()
            .name(format!("paperflow-decode-{}", id))
            .spawn(move || {
                Self::run(queue, executor, shutdown, poll_interval);
            })
            .expect("failed to spawn decode worker");

        Self {
            thread: Some(thread),
        }
    }

    fn run(
        queue: JobQueue,
        executor: JobExecutor,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) {
        loop {
            if shutdown.load(Ordering::Acquire) {
                break;
            }

            if let Some(job) = queue.pop() {
                executor(job);
            } else {
                thread::sleep(poll_interval);
            }
        }
    }

    fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            thread.join().expect("decode worker panicked");
        }
    }
}
