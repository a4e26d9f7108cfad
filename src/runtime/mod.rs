//! Sharded execution runtime
//!
//! A trimmed thread-per-core model: each shard owns a dedicated worker
//! thread and a disjoint slice of partition state. Cross-shard work is an
//! explicit submission to the owning shard's queue; results come back over
//! oneshot channels so async callers can await them. Partition ownership is
//! `partition_id % shard_count`.

pub mod shard;

pub use shard::{Shard, ShardConfig, ShardStats};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::info;

/// Errors from the sharded runtime
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to spawn shard thread: {0}")]
    SpawnFailed(String),

    #[error("shard {shard_id} not found")]
    ShardNotFound { shard_id: usize },

    #[error("runtime already started")]
    AlreadyStarted,

    #[error("runtime already stopped")]
    AlreadyStopped,

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("task error: {0}")]
    TaskError(String),
}

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Sharded runtime configuration
#[derive(Debug, Clone)]
pub struct ShardedRuntimeConfig {
    /// Number of shards; 0 selects available parallelism
    pub shard_count: usize,
    /// Bounded task queue capacity per shard
    pub task_queue_capacity: usize,
    /// Worker sleep between polls when idle, in microseconds
    pub idle_poll_interval_us: u64,
}

impl Default for ShardedRuntimeConfig {
    fn default() -> Self {
        Self {
            shard_count: 0,
            task_queue_capacity: 1024,
            idle_poll_interval_us: 50,
        }
    }
}

impl ShardedRuntimeConfig {
    fn resolved_shard_count(&self) -> usize {
        if self.shard_count > 0 {
            self.shard_count
        } else {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(1)
        }
    }

    fn validate(&self) -> RuntimeResult<()> {
        if self.task_queue_capacity == 0 {
            return Err(RuntimeError::ConfigError(
                "task_queue_capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Runtime owning one worker shard per core slot
pub struct ShardedRuntime {
    shards: Vec<Arc<Shard>>,
    running: AtomicBool,
    total_tasks: AtomicU64,
}

impl ShardedRuntime {
    /// Create a runtime; `start` spawns the shard threads
    pub fn new(config: ShardedRuntimeConfig) -> RuntimeResult<Self> {
        config.validate()?;
        let shard_count = config.resolved_shard_count();

        let shards = (0..shard_count)
            .map(|shard_id| {
                Arc::new(Shard::new(ShardConfig {
                    shard_id,
                    task_queue_capacity: config.task_queue_capacity,
                    idle_poll_interval_us: config.idle_poll_interval_us,
                }))
            })
            .collect();

        Ok(Self {
            shards,
            running: AtomicBool::new(false),
            total_tasks: AtomicU64::new(0),
        })
    }

    /// Spawn all shard threads
    pub fn start(&self) -> RuntimeResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RuntimeError::AlreadyStarted);
        }
        for shard in &self.shards {
            shard.start()?;
        }
        info!(shard_count = self.shards.len(), "sharded runtime started");
        Ok(())
    }

    /// Stop all shard threads
    pub fn stop(&self) -> RuntimeResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(RuntimeError::AlreadyStopped);
        }
        for shard in &self.shards {
            shard.stop();
        }
        info!("sharded runtime stopped");
        Ok(())
    }

    /// Whether the runtime is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of shards
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shard owning the given partition
    pub fn shard_for_partition(&self, partition_id: u32) -> usize {
        partition_id as usize % self.shards.len()
    }

    /// Submit a task to a specific shard
    pub fn submit_to_shard<F>(&self, shard_id: usize, task: F) -> RuntimeResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let shard = self
            .shards
            .get(shard_id)
            .ok_or(RuntimeError::ShardNotFound { shard_id })?;
        shard.submit(task)?;
        self.total_tasks.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Submit a task to a shard and receive its result via a channel
    ///
    /// Bridges the sync shard executor with async code: await the returned
    /// receiver for the task's result. A dropped receiver error means the
    /// shard was stopped before the task ran.
    pub fn submit_to_shard_with_result<F, R>(
        &self,
        shard_id: usize,
        task: F,
    ) -> RuntimeResult<oneshot::Receiver<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit_to_shard(shard_id, move || {
            let _ = tx.send(task());
        })?;
        Ok(rx)
    }

    /// Submit a task routed to the shard owning `partition_id`
    pub fn submit_for_partition<F>(&self, partition_id: u32, task: F) -> RuntimeResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_to_shard(self.shard_for_partition(partition_id), task)
    }

    /// Partition-routed variant of `submit_to_shard_with_result`
    pub fn submit_for_partition_with_result<F, R>(
        &self,
        partition_id: u32,
        task: F,
    ) -> RuntimeResult<oneshot::Receiver<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submit_to_shard_with_result(self.shard_for_partition(partition_id), task)
    }

    /// Per-shard counter snapshots
    pub fn stats(&self) -> Vec<ShardStats> {
        self.shards.iter().map(|s| s.stats()).collect()
    }
}

impl Drop for ShardedRuntime {
    fn drop(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            let _ = self.stop();
        }
    }
}
