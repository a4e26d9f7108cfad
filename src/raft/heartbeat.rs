//! Heartbeat manager
//!
//! Periodically sweeps every replication group hosted on this node, groups
//! pending heartbeats by target peer, and sends one batched RPC per peer
//! per tick. Replies are fanned back out to the owning groups; a transport
//! failure is delivered as an error to every group in the failed batch so
//! leaders can observe peer liveness loss.
//!
//! Per-peer single-outstanding permits keep a stuck peer from stacking
//! heartbeats: a peer whose previous RPC is still in flight is skipped for
//! the tick and retried on the next one.

use super::transport::{PeerTransport, TransportError};
use super::{GroupId, HeartbeatEntry, HeartbeatReply, HeartbeatRequest, NodeId, RaftGroup};
use crate::config::HeartbeatConfig;
use crate::metrics;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Tracks background send tasks so `stop` can await quiescence
struct TaskGate {
    outstanding: AtomicU64,
    drained: Notify,
}

impl TaskGate {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            outstanding: AtomicU64::new(0),
            drained: Notify::new(),
        })
    }

    fn enter(self: &Arc<Self>) -> GateGuard {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        GateGuard { gate: self.clone() }
    }

    async fn drain(&self) {
        loop {
            let notified = self.drained.notified();
            if self.outstanding.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct GateGuard {
    gate: Arc<TaskGate>,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        if self.gate.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.gate.drained.notify_waiters();
        }
    }
}

/// Heartbeats accumulated toward one peer during a tick
#[derive(Default)]
struct NodeBatch {
    groups: Vec<GroupId>,
    entries: Vec<HeartbeatEntry>,
}

struct Inner {
    source: NodeId,
    config: HeartbeatConfig,
    transport: Arc<dyn PeerTransport>,
    /// Insertion and deletion are rare; ordered by group id for stable
    /// iteration and O(log n) lookup on the reply path.
    groups: RwLock<BTreeMap<GroupId, Arc<dyn RaftGroup>>>,
    /// One permit per peer: at most one heartbeat RPC in flight per peer
    peer_permits: DashMap<NodeId, Arc<Semaphore>>,
    /// Serializes sweeps between the timer and manual dispatches
    dispatch_sem: Semaphore,
    gate: Arc<TaskGate>,
    shutdown: AtomicBool,
    shutdown_notify: Notify,
}

/// Batches per-group heartbeats into one RPC per peer per tick
pub struct HeartbeatManager {
    inner: Arc<Inner>,
    timer_task: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatManager {
    /// Create a manager for heartbeats originating from `source`
    pub fn new(
        source: NodeId,
        config: HeartbeatConfig,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        metrics::register_metrics();
        Self {
            inner: Arc::new(Inner {
                source,
                config,
                transport,
                groups: RwLock::new(BTreeMap::new()),
                peer_permits: DashMap::new(),
                dispatch_sem: Semaphore::new(1),
                gate: TaskGate::new(),
                shutdown: AtomicBool::new(false),
                shutdown_notify: Notify::new(),
            }),
            timer_task: Mutex::new(None),
        }
    }

    /// Register a group; idempotent by group id
    ///
    /// Takes effect on the next tick; an in-flight sweep is not
    /// interrupted.
    pub fn register_group(&self, group: Arc<dyn RaftGroup>) {
        let id = group.id();
        let mut groups = self.inner.groups.write();
        if groups.insert(id, group).is_none() {
            debug!(group = id, "registered group for heartbeats");
        }
    }

    /// Remove a group; pending replies for it are discarded silently
    pub fn deregister_group(&self, id: GroupId) {
        if self.inner.groups.write().remove(&id).is_some() {
            debug!(group = id, "deregistered group");
        }
    }

    /// Number of registered groups
    pub fn group_count(&self) -> usize {
        self.inner.groups.read().len()
    }

    /// Arm the tick timer
    pub fn start(&self) {
        let mut slot = self.timer_task.lock();
        if slot.is_some() {
            return;
        }

        let inner = self.inner.clone();
        info!(
            source = inner.source,
            interval_ms = inner.config.interval_ms,
            "heartbeat manager started"
        );
        *slot = Some(tokio::spawn(async move {
            let interval = inner.config.interval();
            let mut next = Instant::now() + interval;
            loop {
                tokio::select! {
                    biased;
                    _ = inner.shutdown_notify.notified() => break,
                    _ = tokio::time::sleep_until(next) => {}
                }
                if inner.shutdown.load(Ordering::SeqCst) {
                    break;
                }

                let tick_started = Instant::now();
                Inner::dispatch_heartbeats(&inner).await;
                // Re-arm relative to the tick start so a slow sweep delays
                // the next tick instead of stacking behind it.
                next = std::cmp::max(tick_started + interval, Instant::now());
            }
        }));
    }

    /// Run one sweep immediately, outside the timer cadence
    pub async fn dispatch_now(&self) {
        Inner::dispatch_heartbeats(&self.inner).await;
    }

    /// Await completion of every outstanding heartbeat RPC
    pub async fn quiesce(&self) {
        self.inner.gate.drain().await;
    }

    /// Cancel the timer, then await outstanding sends
    pub async fn stop(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.shutdown_notify.notify_waiters();

        let task = self.timer_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        self.inner.gate.drain().await;
        info!(source = self.inner.source, "heartbeat manager stopped");
    }
}

impl Inner {
    async fn dispatch_heartbeats(inner: &Arc<Inner>) {
        let Ok(_sweep) = inner.dispatch_sem.acquire().await else {
            return;
        };
        if inner.shutdown.load(Ordering::SeqCst) {
            return;
        }

        let groups: Vec<Arc<dyn RaftGroup>> =
            inner.groups.read().values().cloned().collect();

        let mut batches: BTreeMap<NodeId, NodeBatch> = BTreeMap::new();
        for group in groups {
            let snapshot = group.snapshot();
            for peer in snapshot.peers {
                if peer == inner.source {
                    continue;
                }
                let position = snapshot
                    .last_visible
                    .get(&peer)
                    .copied()
                    .unwrap_or_default();
                let batch = batches.entry(peer).or_default();
                batch.groups.push(group.id());
                batch.entries.push(HeartbeatEntry {
                    group: group.id(),
                    term: snapshot.term,
                    commit_index: snapshot.commit_index,
                    prev_log_index: position.index,
                    prev_log_term: position.term,
                });
            }
        }

        for (peer, batch) in batches {
            let permits = inner
                .peer_permits
                .entry(peer)
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone();
            let permit = match permits.try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    // Previous heartbeat to this peer is still in flight.
                    debug!(peer, "skipping peer with outstanding heartbeat");
                    metrics::record_heartbeat_peer_skipped();
                    continue;
                }
            };

            let guard = inner.gate.enter();
            let inner = inner.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let _guard = guard;
                inner.send_heartbeat(peer, batch).await;
            });
        }
    }

    async fn send_heartbeat(&self, peer: NodeId, batch: NodeBatch) {
        metrics::record_heartbeat_sent();
        let request = HeartbeatRequest {
            source: self.source,
            entries: batch.entries,
        };

        // The deadline equals the tick interval: a reply that cannot make
        // it before the next sweep counts as a failure.
        let deadline = self.config.interval();
        match tokio::time::timeout(deadline, self.transport.heartbeat(peer, request)).await {
            Ok(Ok(reply)) => self.deliver_replies(peer, reply),
            Ok(Err(error)) => {
                metrics::record_heartbeat_failure();
                debug!(peer, %error, "heartbeat failed");
                self.fail_batch(peer, &batch.groups, error);
            }
            Err(_) => {
                metrics::record_heartbeat_failure();
                debug!(peer, "heartbeat deadline exceeded");
                self.fail_batch(peer, &batch.groups, TransportError::Timeout(peer));
            }
        }
    }

    fn deliver_replies(&self, peer: NodeId, reply: HeartbeatReply) {
        // Resolve targets under the lock, invoke callbacks outside it so
        // groups may re-enter the manager from process_reply.
        let targets: Vec<_> = {
            let groups = self.groups.read();
            reply
                .entries
                .into_iter()
                .filter_map(|entry| {
                    match groups.get(&entry.group) {
                        Some(group) => Some((group.clone(), entry)),
                        None => {
                            // Raced with deregistration.
                            debug!(group = entry.group, "dropping reply for unknown group");
                            None
                        }
                    }
                })
                .collect()
        };

        for (group, entry) in targets {
            group.process_reply(peer, Ok(entry));
        }
    }

    fn fail_batch(&self, peer: NodeId, group_ids: &[GroupId], error: TransportError) {
        let targets: Vec<_> = {
            let groups = self.groups.read();
            group_ids
                .iter()
                .filter_map(|id| groups.get(id).cloned())
                .collect()
        };

        for group in targets {
            group.process_reply(peer, Err(error.clone()));
        }
    }
}
