use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, error, info, warn};

use crate::config::RetryConfig;
use crate::error::WorkerError;
use crate::worker::task::{QueuedTask, Task, TaskDispatcher, TaskOutcome, TaskRunner};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const OUTCOME_CAPACITY: usize = 1024;

/// Tasks waiting for their backoff delay to pass, earliest first. The
/// sequence number keeps insertion order among equal due times.
#[derive(Default)]
struct DelayedQueue {
    heap: Mutex<BinaryHeap<Reverse<(Instant, u64, QueuedTask)>>>,
    seq: AtomicU64,
}

impl DelayedQueue {
    fn push(&self, due: Instant, task: QueuedTask) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let mut heap = self.heap.lock().unwrap_or_else(|e| e.into_inner());
        heap.push(Reverse((due, seq, task)));
    }

    fn pop_due(&self, now: Instant) -> Option<QueuedTask> {
        let mut heap = self.heap.lock().unwrap_or_else(|e| e.into_inner());
        match heap.peek() {
            Some(Reverse((due, _, _))) if *due <= now => {
                heap.pop().map(|Reverse((_, _, task))| task)
            }
            _ => None,
        }
    }

    fn len(&self) -> usize {
        self.heap.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Cheap, cloneable handle for submitting tasks to a [`WorkerPool`].
#[derive(Clone)]
pub struct PoolHandle {
    task_sender: Sender<QueuedTask>,
    shutdown: Arc<AtomicBool>,
}

impl TaskDispatcher for PoolHandle {
    fn dispatch(&self, task: Task) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }
        self.task_sender
            .send(QueuedTask::first(task))
            .map_err(|_| WorkerError::ChannelClosed)
    }
}

/// Fixed set of worker threads running tasks with retry and backoff.
///
/// Created in two steps so the runner can hold a [`PoolHandle`] of the pool
/// that runs it: [`WorkerPool::new`], then [`WorkerPool::start`].
pub struct WorkerPool {
    worker_count: usize,
    retry: RetryConfig,
    task_sender: Sender<QueuedTask>,
    task_receiver: Receiver<QueuedTask>,
    outcome_sender: Sender<TaskOutcome>,
    outcome_receiver: Receiver<TaskOutcome>,
    delayed: Arc<DelayedQueue>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn new(worker_count: usize, retry: RetryConfig) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        // Unbounded: a sweep or a worker dispatching a cleanup must never
        // block on a full queue.
        let (task_sender, task_receiver) = unbounded::<QueuedTask>();
        let (outcome_sender, outcome_receiver) = bounded::<TaskOutcome>(OUTCOME_CAPACITY);

        Self {
            worker_count,
            retry,
            task_sender,
            task_receiver,
            outcome_sender,
            outcome_receiver,
            delayed: Arc::new(DelayedQueue::default()),
            workers: Vec::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn handle(&self) -> PoolHandle {
        PoolHandle {
            task_sender: self.task_sender.clone(),
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Spawns the worker threads. Calling it twice has no effect.
    pub fn start(&mut self, runner: Arc<dyn TaskRunner>) -> Result<(), WorkerError> {
        if !self.workers.is_empty() {
            return Ok(());
        }

        for worker_id in 0..self.worker_count {
            let ctx = WorkerLoop {
                worker_id,
                tasks: self.task_receiver.clone(),
                outcomes: self.outcome_sender.clone(),
                delayed: Arc::clone(&self.delayed),
                shutdown: Arc::clone(&self.shutdown),
                retry: self.retry.clone(),
                runner: Arc::clone(&runner),
            };

            let handle = thread::Builder::new()
                .name(format!("migration-worker-{}", worker_id))
                .spawn(move || ctx.run())
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;
            self.workers.push(handle);
        }

        info!("Started {} migration workers", self.worker_count);
        Ok(())
    }

    pub fn submit(&self, task: Task) -> Result<(), WorkerError> {
        self.handle().dispatch(task)
    }

    pub fn try_recv_outcome(&self) -> Option<TaskOutcome> {
        self.outcome_receiver.try_recv().ok()
    }

    pub fn recv_outcome_timeout(&self, timeout: Duration) -> Option<TaskOutcome> {
        self.outcome_receiver.recv_timeout(timeout).ok()
    }

    /// Number of tasks waiting for a backoff delay.
    pub fn pending_retries(&self) -> usize {
        self.delayed.len()
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Stops the workers and waits for them. Queued tasks and delayed
    /// retries are dropped; their jobs are picked up again on the next start.
    pub fn wait(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let pending = self.delayed.len();
        if pending > 0 {
            warn!("Dropping {} delayed retries on shutdown", pending);
        }
        let queued = self.task_receiver.len();
        if queued > 0 {
            warn!("Dropping {} queued tasks on shutdown", queued);
        }

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All migration workers have stopped");
    }
}

impl TaskDispatcher for WorkerPool {
    fn dispatch(&self, task: Task) -> Result<(), WorkerError> {
        self.submit(task)
    }
}

struct WorkerLoop {
    worker_id: usize,
    tasks: Receiver<QueuedTask>,
    outcomes: Sender<TaskOutcome>,
    delayed: Arc<DelayedQueue>,
    shutdown: Arc<AtomicBool>,
    retry: RetryConfig,
    runner: Arc<dyn TaskRunner>,
}

impl WorkerLoop {
    fn run(self) {
        debug!("Worker {} started", self.worker_id);

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                debug!("Worker {} received shutdown signal", self.worker_id);
                break;
            }

            if let Some(queued) = self.delayed.pop_due(Instant::now()) {
                self.execute(queued);
                continue;
            }

            match self.tasks.recv_timeout(POLL_INTERVAL) {
                Ok(queued) => self.execute(queued),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    debug!("Worker {} task channel disconnected", self.worker_id);
                    break;
                }
            }
        }

        debug!("Worker {} stopped", self.worker_id);
    }

    fn execute(&self, queued: QueuedTask) {
        debug!(
            "Worker {} running {} (attempt {})",
            self.worker_id, queued.task, queued.attempt
        );

        let result = catch_unwind(AssertUnwindSafe(|| {
            self.runner.run(&queued.task, queued.attempt)
        }))
        .unwrap_or_else(|payload| {
            Err(WorkerError::Panicked {
                task: queued.task.to_string(),
                message: panic_message(&*payload),
            })
        });

        let mut rescheduled = false;
        if let Err(ref e) = result {
            if e.is_retryable() {
                if self.retry.should_retry(queued.attempt) {
                    let delay = self.retry.delay_for_attempt(queued.attempt);
                    info!(
                        "{} failed retryably, retry {} in {:?}: {}",
                        queued.task,
                        queued.attempt + 1,
                        delay,
                        e
                    );
                    self.delayed
                        .push(Instant::now() + delay, queued.next_attempt());
                    rescheduled = true;
                } else {
                    warn!(
                        "{} failed after {} attempts, giving up: {}",
                        queued.task,
                        queued.attempt + 1,
                        e
                    );
                    self.runner.give_up(&queued.task, queued.attempt + 1, e);
                }
            } else {
                error!("{} failed: {}", queued.task, e);
                self.runner.abandon(&queued.task, e);
            }
        }

        // Nobody has to listen; a full outcome channel just drops the report.
        let _ = self.outcomes.try_send(TaskOutcome {
            task: queued.task,
            attempt: queued.attempt,
            result: result.map_err(|e| e.to_string()),
            rescheduled,
        });
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
