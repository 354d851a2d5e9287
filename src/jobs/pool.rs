use crate::error::JobError;
use crate::jobs::{Job, JobStatus};

use log::{debug, info, trace, warn};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

type JobQueue = Arc<Mutex<mpsc::Receiver<Box<dyn Job>>>>;

/// Result of a non-blocking [`WorkerPool::queue`].
pub enum QueueStatus {
    Accepted,
    /// The queue is at capacity; the job is handed back untouched.
    Full(Box<dyn Job>),
}

/// Fixed set of tokio workers draining one bounded job queue.
pub struct WorkerPool {
    sender: mpsc::Sender<Box<dyn Job>>,
    receiver: JobQueue,
    workers: usize,
    capacity: usize,
    running: Arc<AtomicUsize>,
    started: AtomicBool,
    stopped: AtomicBool,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    #[must_use]
    pub fn new(workers: usize, queue_depth: usize) -> Self {
        let (sender, receiver) = mpsc::channel(queue_depth.max(1));
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            workers: workers.max(1),
            capacity: queue_depth.max(1),
            running: Arc::new(AtomicUsize::new(0)),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            handles: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Spawns the workers. Must be called from within a tokio runtime.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Starting worker pool: {} workers, queue depth {}", self.workers, self.capacity);

        let mut handles = match self.handles.lock() {
            Ok(handles) => handles,
            Err(poisoned) => poisoned.into_inner(),
        };
        for id in 0..self.workers {
            let queue = Arc::clone(&self.receiver);
            let running = Arc::clone(&self.running);
            handles.push(tokio::spawn(worker(id, queue, running)));
        }
    }

    /// Offers a job without waiting.
    pub fn queue(&self, mut job: Box<dyn Job>) -> Result<QueueStatus, JobError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(JobError::PoolStopped);
        }
        let previous = mark_queued(job.as_mut());
        match self.sender.try_send(job) {
            Ok(()) => Ok(QueueStatus::Accepted),
            Err(mpsc::error::TrySendError::Full(mut job)) => {
                job.set_status(previous, None);
                Ok(QueueStatus::Full(job))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(JobError::PoolStopped),
        }
    }

    /// Queues a job, waiting for room when the queue is full.
    pub async fn submit(&self, mut job: Box<dyn Job>) -> Result<(), JobError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(JobError::PoolStopped);
        }
        mark_queued(job.as_mut());
        self.sender.send(job).await.map_err(|_| JobError::PoolStopped)
    }

    /// Aborts the workers, closes the queue and drops every job still in it.
    /// A dropped job is expected to report its own failure.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Stopping worker pool");
        {
            let mut handles = match self.handles.lock() {
                Ok(handles) => handles,
                Err(poisoned) => poisoned.into_inner(),
            };
            for handle in handles.drain(..) {
                handle.abort();
            }
        }

        // an aborted worker may still hold the queue lock until the runtime drops it
        if let Ok(mut receiver) = self.receiver.try_lock() {
            drain(&mut receiver);
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let queue = Arc::clone(&self.receiver);
                runtime.spawn(async move {
                    drain(&mut *queue.lock().await);
                });
            }
            Err(_) => warn!("No runtime to drain the job queue, queued jobs stay pending"),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.stopped.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs waiting for a worker
    #[must_use]
    pub fn queued(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    /// Jobs currently being run
    #[must_use]
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn drain(receiver: &mut mpsc::Receiver<Box<dyn Job>>) {
    receiver.close();
    let mut dropped = 0;
    while receiver.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        info!("Dropped {dropped} queued job(s)");
    }
}

/// Cancelled jobs keep their status so the worker can skip them.
fn mark_queued(job: &mut dyn Job) -> JobStatus {
    let (status, _) = job.status();
    if status == JobStatus::Default {
        job.set_status(JobStatus::Queued, None);
    }
    status
}

async fn worker(id: usize, queue: JobQueue, running: Arc<AtomicUsize>) {
    trace!("worker {id}: started");
    loop {
        let next = { queue.lock().await.recv().await };
        let Some(mut job) = next else {
            break;
        };

        let (status, _) = job.status();
        if status == JobStatus::Cancelled {
            debug!("worker {id}: skipping cancelled {:?} job", job.job_type());
            continue;
        }

        job.set_status(JobStatus::InProgress, None);
        running.fetch_add(1, Ordering::SeqCst);
        job.run().await;
        running.fetch_sub(1, Ordering::SeqCst);

        if job.status().0 == JobStatus::InProgress {
            job.set_status(JobStatus::Complete, None);
        }
    }
    trace!("worker {id}: exiting");
}
