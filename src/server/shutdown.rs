//! Graceful shutdown coordination
//!
//! The coordinator is the server's gate: accept loops and per-connection
//! loops subscribe to the shutdown signal, in-flight requests and open
//! connections are tracked with counters, and `stop()` resolves only after
//! both have drained (or the configured timeouts expire).

use crate::config::ShutdownConfig;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch, Notify};
use tracing::{debug, info, warn};

/// Shutdown phase for ordered cleanup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Normal operation
    Running,
    /// Waiting for in-flight requests to complete
    DrainRequests,
    /// Waiting for connections to close
    DrainConnections,
    /// Shutdown finished
    Complete,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Running => write!(f, "running"),
            ShutdownPhase::DrainRequests => write!(f, "draining requests"),
            ShutdownPhase::DrainConnections => write!(f, "draining connections"),
            ShutdownPhase::Complete => write!(f, "complete"),
        }
    }
}

/// Error from a shutdown that could not complete in time
#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error(
        "shutdown timed out in phase '{phase}' ({pending_requests} requests, \
         {active_connections} connections outstanding)"
    )]
    Timeout {
        phase: ShutdownPhase,
        pending_requests: u64,
        active_connections: u64,
    },
}

/// Coordinator for graceful shutdown
pub struct ShutdownCoordinator {
    config: ShutdownConfig,
    shutdown_initiated: AtomicBool,
    phase_tx: watch::Sender<ShutdownPhase>,
    notify_tx: broadcast::Sender<()>,
    active_connections: AtomicU64,
    in_flight_requests: AtomicU64,
    requests_drained: Notify,
    connections_drained: Notify,
}

impl ShutdownCoordinator {
    /// Create a coordinator with the given configuration
    pub fn new(config: ShutdownConfig) -> Self {
        let (phase_tx, _) = watch::channel(ShutdownPhase::Running);
        let (notify_tx, _) = broadcast::channel(16);
        Self {
            config,
            shutdown_initiated: AtomicBool::new(false),
            phase_tx,
            notify_tx,
            active_connections: AtomicU64::new(0),
            in_flight_requests: AtomicU64::new(0),
            requests_drained: Notify::new(),
            connections_drained: Notify::new(),
        }
    }

    /// Whether shutdown has been initiated
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }

    /// Current shutdown phase
    pub fn current_phase(&self) -> ShutdownPhase {
        *self.phase_tx.borrow()
    }

    /// Subscribe to the shutdown notification
    ///
    /// Accept loops and connection loops select on this between requests.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.notify_tx.subscribe()
    }

    /// Track a new connection
    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Track a closed connection
    pub fn connection_closed(&self) {
        let prev = self.active_connections.fetch_sub(1, Ordering::Relaxed);
        if prev == 1 && self.is_shutting_down() {
            debug!("last connection closed during shutdown");
            self.connections_drained.notify_waiters();
        }
    }

    /// Number of active connections
    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Number of in-flight requests
    pub fn in_flight_requests(&self) -> u64 {
        self.in_flight_requests.load(Ordering::Relaxed)
    }

    /// Track a request from acceptance to response completion
    ///
    /// Returns `None` once shutdown has begun; new requests are refused.
    pub fn request_guard(self: &Arc<Self>) -> Option<RequestGuard> {
        if self.is_shutting_down() {
            return None;
        }
        self.in_flight_requests.fetch_add(1, Ordering::Relaxed);
        Some(RequestGuard {
            coordinator: self.clone(),
        })
    }

    fn request_completed(&self) {
        let prev = self.in_flight_requests.fetch_sub(1, Ordering::Relaxed);
        if prev == 1 && self.is_shutting_down() {
            debug!("last in-flight request completed during shutdown");
            self.requests_drained.notify_waiters();
        }
    }

    fn transition_to(&self, phase: ShutdownPhase) {
        debug!(%phase, "shutdown phase transition");
        let _ = self.phase_tx.send(phase);
    }

    /// Initiate graceful shutdown and wait for quiescence
    ///
    /// Idempotent: a second call returns immediately. Phases: signal all
    /// subscribers, drain in-flight requests (bounded by `timeout_secs`),
    /// then drain connections (bounded by `drain_timeout_secs`).
    pub async fn initiate_shutdown(&self) -> Result<(), ShutdownError> {
        if self.shutdown_initiated.swap(true, Ordering::SeqCst) {
            debug!("shutdown already in progress");
            return Ok(());
        }

        info!(
            active_connections = self.active_connections(),
            in_flight_requests = self.in_flight_requests(),
            "initiating graceful shutdown"
        );

        let _ = self.notify_tx.send(());

        if self.config.wait_for_requests && self.in_flight_requests() > 0 {
            self.transition_to(ShutdownPhase::DrainRequests);
            let timeout = Duration::from_secs(self.config.timeout_secs);
            let drained = tokio::time::timeout(timeout, async {
                while self.in_flight_requests() > 0 {
                    self.requests_drained.notified().await;
                }
            })
            .await;

            if drained.is_err() {
                warn!(
                    pending = self.in_flight_requests(),
                    "request drain timed out"
                );
                return Err(ShutdownError::Timeout {
                    phase: ShutdownPhase::DrainRequests,
                    pending_requests: self.in_flight_requests(),
                    active_connections: self.active_connections(),
                });
            }
        }

        self.transition_to(ShutdownPhase::DrainConnections);
        let forced = self.drain_connections(None).await;
        if forced > 0 {
            warn!(forced, "connections forcibly closed at shutdown");
        }

        self.transition_to(ShutdownPhase::Complete);
        info!("graceful shutdown complete");
        Ok(())
    }

    /// Wait for active connections to close, bounded by the drain timeout
    ///
    /// Returns the number of connections still open when the timeout fired
    /// (0 when all drained gracefully).
    pub async fn drain_connections(&self, timeout: Option<Duration>) -> u64 {
        let drain_timeout =
            timeout.unwrap_or(Duration::from_secs(self.config.drain_timeout_secs));
        let initial = self.active_connections();
        if initial == 0 {
            return 0;
        }

        info!(
            active_connections = initial,
            timeout_secs = drain_timeout.as_secs(),
            "draining active connections"
        );

        let result = tokio::time::timeout(drain_timeout, async {
            while self.active_connections() > 0 {
                self.connections_drained.notified().await;
            }
        })
        .await;

        match result {
            Ok(()) => 0,
            Err(_) => self.active_connections(),
        }
    }
}

/// RAII guard tracking one in-flight request
pub struct RequestGuard {
    coordinator: Arc<ShutdownCoordinator>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.coordinator.request_completed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator() -> Arc<ShutdownCoordinator> {
        Arc::new(ShutdownCoordinator::new(ShutdownConfig {
            timeout_secs: 1,
            wait_for_requests: true,
            drain_timeout_secs: 1,
        }))
    }

    #[tokio::test]
    async fn test_idle_shutdown_completes_immediately() {
        let coord = coordinator();
        coord.initiate_shutdown().await.unwrap();
        assert!(coord.is_shutting_down());
        assert_eq!(coord.current_phase(), ShutdownPhase::Complete);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let coord = coordinator();
        coord.initiate_shutdown().await.unwrap();
        coord.initiate_shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_request_guard_refused_after_shutdown() {
        let coord = coordinator();
        assert!(coord.request_guard().is_some());
        coord.initiate_shutdown().await.unwrap();
        assert!(coord.request_guard().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_request() {
        let coord = coordinator();
        let guard = coord.request_guard().unwrap();
        assert_eq!(coord.in_flight_requests(), 1);

        let coord2 = coord.clone();
        let shutdown = tokio::spawn(async move { coord2.initiate_shutdown().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!shutdown.is_finished());

        drop(guard);
        shutdown.await.unwrap().unwrap();
        assert_eq!(coord.in_flight_requests(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_times_out_on_stuck_request() {
        let coord = coordinator();
        let _guard = coord.request_guard().unwrap();
        let err = coord.initiate_shutdown().await.unwrap_err();
        assert!(matches!(
            err,
            ShutdownError::Timeout {
                phase: ShutdownPhase::DrainRequests,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_connection_drain() {
        let coord = coordinator();
        coord.connection_opened();
        coord.connection_opened();

        let coord2 = coord.clone();
        let drain = tokio::spawn(async move {
            coord2.shutdown_initiated.store(true, Ordering::SeqCst);
            coord2.drain_connections(Some(Duration::from_secs(2))).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        coord.connection_closed();
        coord.connection_closed();

        assert_eq!(drain.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_observe_signal() {
        let coord = coordinator();
        let mut rx = coord.subscribe();
        coord.initiate_shutdown().await.unwrap();
        rx.recv().await.unwrap();
    }
}
