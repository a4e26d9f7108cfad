//! Shard worker
//!
//! A shard is a single-threaded execution unit owning a disjoint slice of
//! partition state. Work is submitted as closures into a bounded local
//! queue and executed by the shard's dedicated thread, so shard-owned data
//! needs no cross-thread locking inside tasks.

use super::{RuntimeError, RuntimeResult};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error};

/// A unit of shard-local work
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Batch size drained from the queue per scheduling round
const TASK_BATCH: usize = 64;

/// Per-shard configuration
#[derive(Debug, Clone)]
pub struct ShardConfig {
    /// Shard index, dense from zero
    pub shard_id: usize,
    /// Maximum queued tasks before submissions are rejected
    pub task_queue_capacity: usize,
    /// Sleep between polls when the queue is empty
    pub idle_poll_interval_us: u64,
}

/// Per-shard counters
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ShardStats {
    pub shard_id: usize,
    pub tasks_submitted: u64,
    pub tasks_completed: u64,
    pub tasks_rejected: u64,
    pub task_panics: u64,
}

/// A single-threaded execution unit with a bounded task queue
pub struct Shard {
    config: ShardConfig,
    queue: Mutex<VecDeque<Task>>,
    running: Arc<AtomicBool>,
    thread_handle: RwLock<Option<JoinHandle<()>>>,
    tasks_submitted: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_rejected: AtomicU64,
    task_panics: AtomicU64,
}

impl Shard {
    /// Create a shard; `start` spawns its worker thread
    pub fn new(config: ShardConfig) -> Self {
        let capacity = config.task_queue_capacity;
        Self {
            config,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: RwLock::new(None),
            tasks_submitted: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
            tasks_rejected: AtomicU64::new(0),
            task_panics: AtomicU64::new(0),
        }
    }

    /// Shard index
    pub fn id(&self) -> usize {
        self.config.shard_id
    }

    /// Spawn the worker thread
    pub fn start(self: &Arc<Self>) -> RuntimeResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let shard = self.clone();
        let handle = std::thread::Builder::new()
            .name(format!("shard-{}", self.config.shard_id))
            .spawn(move || shard.run())
            .map_err(|e| RuntimeError::SpawnFailed(e.to_string()))?;

        *self.thread_handle.write() = Some(handle);
        debug!(shard_id = self.config.shard_id, "shard started");
        Ok(())
    }

    /// Submit a task to this shard's queue
    pub fn submit<F>(&self, task: F) -> RuntimeResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.running.load(Ordering::SeqCst) {
            return Err(RuntimeError::TaskError("shard is not running".to_string()));
        }

        let mut queue = self.queue.lock();
        if queue.len() >= self.config.task_queue_capacity {
            self.tasks_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(RuntimeError::TaskError("task queue full".to_string()));
        }
        queue.push_back(Box::new(task));
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Stop the worker and join its thread
    ///
    /// Queued tasks that have not started are dropped.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.thread_handle.write().take() {
            if handle.join().is_err() {
                error!(shard_id = self.config.shard_id, "shard thread panicked");
            }
        }
        self.queue.lock().clear();
        debug!(shard_id = self.config.shard_id, "shard stopped");
    }

    /// Snapshot this shard's counters
    pub fn stats(&self) -> ShardStats {
        ShardStats {
            shard_id: self.config.shard_id,
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_rejected: self.tasks_rejected.load(Ordering::Relaxed),
            task_panics: self.task_panics.load(Ordering::Relaxed),
        }
    }

    fn run(&self) {
        let idle_sleep = Duration::from_micros(self.config.idle_poll_interval_us);
        while self.running.load(Ordering::SeqCst) {
            let processed = self.process_batch();
            if processed == 0 {
                std::thread::sleep(idle_sleep);
            }
        }
    }

    fn process_batch(&self) -> usize {
        let mut tasks: Vec<Task> = {
            let mut queue = self.queue.lock();
            let count = queue.len().min(TASK_BATCH);
            queue.drain(..count).collect()
        };

        let count = tasks.len();
        for task in tasks.drain(..) {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task));
            if outcome.is_err() {
                error!(shard_id = self.config.shard_id, "shard task panicked");
                self.task_panics.fetch_add(1, Ordering::Relaxed);
            }
        }

        if count > 0 {
            self.tasks_completed
                .fetch_add(count as u64, Ordering::Relaxed);
        }
        count
    }
}
