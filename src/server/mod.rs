//! Kafka protocol server
//!
//! Owns the listeners, accepts connections, and ties framing, admission,
//! quotas, and dispatch into the per-connection pipeline. `stop()` resolves
//! only after accept loops are gone, in-flight requests have drained (or
//! timed out), and every connection task has finished.

pub mod admission;
mod connection;
pub mod dispatch;
pub mod quota;
mod sequencer;
pub mod shutdown;
mod tls;

pub use admission::{MemoryAdmission, MemoryReservation};
pub use connection::{ConnectionGuard, ConnectionId, ConnectionRegistry};
pub use dispatch::{RequestContext, RequestDispatcher};
pub use quota::{QuotaManager, ThrottleResult};
pub use shutdown::{RequestGuard, ShutdownCoordinator, ShutdownError, ShutdownPhase};
pub use tls::load_tls_acceptor;

use crate::config::{ListenerConfig, ServerConfig, TcpConfig};
use crate::error::Result;
use crate::metrics;
use crate::runtime::ShardedRuntime;
use connection::ConnectionShared;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// The Kafka protocol server
pub struct KafkaServer {
    config: ServerConfig,
    shared: Arc<ConnectionShared>,
    admission: Arc<MemoryAdmission>,
    coordinator: Arc<ShutdownCoordinator>,
    registry: Arc<ConnectionRegistry>,
    listener_tasks: Mutex<Vec<JoinHandle<()>>>,
    bound_addrs: Mutex<Vec<SocketAddr>>,
}

impl KafkaServer {
    /// Create a server around the given dispatcher
    pub fn new(config: ServerConfig, dispatcher: Arc<dyn RequestDispatcher>) -> Self {
        Self::with_runtime(config, dispatcher, None)
    }

    /// Create a server with a sharded runtime for partition-routed dispatch
    pub fn with_runtime(
        config: ServerConfig,
        dispatcher: Arc<dyn RequestDispatcher>,
        runtime: Option<Arc<ShardedRuntime>>,
    ) -> Self {
        metrics::register_metrics();

        let admission = Arc::new(MemoryAdmission::new(
            config.max_request_memory,
            config.admission.clone(),
        ));
        let coordinator = Arc::new(ShutdownCoordinator::new(config.shutdown.clone()));
        let quotas = Arc::new(QuotaManager::new(config.quotas.clone()));

        let shared = Arc::new(ConnectionShared {
            dispatcher,
            admission: admission.clone(),
            quotas,
            coordinator: coordinator.clone(),
            runtime,
        });

        Self {
            config,
            shared,
            admission,
            coordinator,
            registry: Arc::new(ConnectionRegistry::new()),
            listener_tasks: Mutex::new(Vec::new()),
            bound_addrs: Mutex::new(Vec::new()),
        }
    }

    /// Bind every configured listener and start accepting
    ///
    /// Returns the bound addresses, useful when listeners were configured
    /// with port 0.
    pub async fn start(&self) -> Result<Vec<SocketAddr>> {
        let mut addrs = Vec::with_capacity(self.config.listeners.len());

        for listener_config in &self.config.listeners {
            let addr = self.listen(listener_config).await?;
            addrs.push(addr);
        }

        *self.bound_addrs.lock() = addrs.clone();
        Ok(addrs)
    }

    /// Addresses the server is currently bound to
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.bound_addrs.lock().clone()
    }

    /// Number of live connections
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// The shutdown coordinator, for embedding in signal handlers
    pub fn coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.coordinator
    }

    async fn listen(&self, listener_config: &ListenerConfig) -> Result<SocketAddr> {
        let listener = TcpListener::bind(listener_config.addr).await?;
        let addr = listener.local_addr()?;

        let tls_acceptor = match &listener_config.tls {
            Some(tls) if tls.enabled => Some(load_tls_acceptor(tls)?),
            _ => None,
        };

        if tls_acceptor.is_some() {
            info!(%addr, "started secured Kafka API listener");
        } else {
            info!(%addr, "started plaintext Kafka API listener");
        }

        let shared = self.shared.clone();
        let registry = self.registry.clone();
        let coordinator = self.coordinator.clone();
        let tcp_config = listener_config.tcp.clone();

        let task = tokio::spawn(accept_loop(
            listener,
            tls_acceptor,
            shared,
            registry,
            coordinator,
            tcp_config,
        ));
        self.listener_tasks.lock().push(task);

        Ok(addr)
    }

    /// Stop the server and wait for quiescence
    ///
    /// Order: abort accept loops, close the admission gate (waking any
    /// request stuck on memory with a cancellation outcome), then signal
    /// connections and drain them through the coordinator.
    pub async fn stop(&self) -> Result<()> {
        let tasks: Vec<_> = self.listener_tasks.lock().drain(..).collect();
        debug!(listeners = tasks.len(), "aborting listeners");
        for task in &tasks {
            task.abort();
        }

        self.admission.close();

        debug!(
            connections = self.registry.len(),
            "shutting down connections"
        );
        if let Err(e) = self.coordinator.initiate_shutdown().await {
            warn!(error = %e, "graceful shutdown incomplete, proceeding");
        }

        for task in tasks {
            let _ = task.await;
        }
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    tls_acceptor: Option<TlsAcceptor>,
    shared: Arc<ConnectionShared>,
    registry: Arc<ConnectionRegistry>,
    coordinator: Arc<ShutdownCoordinator>,
    tcp_config: TcpConfig,
) {
    let mut shutdown_rx = coordinator.subscribe();

    loop {
        let (stream, addr) = tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            result = listener.accept() => match result {
                Ok(accepted) => accepted,
                Err(e) => {
                    // Transient accept failures (EMFILE, resets) must not
                    // kill the listener.
                    debug!(error = %e, "accept failed");
                    continue;
                }
            }
        };

        if coordinator.is_shutting_down() {
            debug!(peer = %addr, "rejecting connection, server shutting down");
            continue;
        }

        if let Err(e) = configure_tcp_socket(&stream, &tcp_config) {
            warn!(peer = %addr, error = %e, "failed to configure TCP socket options");
        }

        debug!(peer = %addr, tls = tls_acceptor.is_some(), "client connected");
        let guard = registry.register(addr, coordinator.clone());
        let shared = shared.clone();

        match &tls_acceptor {
            Some(acceptor) => {
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    match acceptor.accept(stream).await {
                        Ok(tls_stream) => {
                            connection::process(tls_stream, Some(addr), shared).await;
                        }
                        Err(e) => {
                            warn!(peer = %addr, error = %e, "TLS handshake failed");
                        }
                    }
                    debug!(peer = %addr, "client disconnected");
                });
            }
            None => {
                tokio::spawn(async move {
                    let _guard = guard;
                    connection::process(stream, Some(addr), shared).await;
                    debug!(peer = %addr, "client disconnected");
                });
            }
        }
    }
}

/// Apply a listener's socket options to an accepted connection
///
/// TCP_NODELAY is always set for the request/response workload; the rest
/// comes from the listener's [`TcpConfig`]. Failures are logged by the
/// caller and are not fatal to the connection.
fn configure_tcp_socket(stream: &TcpStream, tcp: &TcpConfig) -> Result<()> {
    stream.set_nodelay(true)?;

    let sock = socket2::SockRef::from(stream);
    if let Some(keepalive) = tcp.keepalive() {
        sock.set_tcp_keepalive(&keepalive)?;
    }
    if let Some(bytes) = tcp.recv_buffer() {
        sock.set_recv_buffer_size(bytes)?;
    }
    if let Some(bytes) = tcp.send_buffer() {
        sock.set_send_buffer_size(bytes)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Response;
    use async_trait::async_trait;

    struct NullDispatcher;

    #[async_trait]
    impl RequestDispatcher for NullDispatcher {
        async fn dispatch(&self, ctx: RequestContext) -> Result<Response> {
            Ok(Response::empty(ctx.correlation_id()))
        }
    }

    fn test_config() -> ServerConfig {
        ServerConfig {
            listeners: vec![ListenerConfig::plaintext("127.0.0.1:0".parse().unwrap())],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_start_binds_ephemeral_port() {
        let server = KafkaServer::new(test_config(), Arc::new(NullDispatcher));
        let addrs = server.start().await.unwrap();
        assert_eq!(addrs.len(), 1);
        assert_ne!(addrs[0].port(), 0);
        assert_eq!(server.local_addrs(), addrs);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let server = KafkaServer::new(test_config(), Arc::new(NullDispatcher));
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_multiple_listeners() {
        let config = ServerConfig {
            listeners: vec![
                ListenerConfig::plaintext("127.0.0.1:0".parse().unwrap()),
                ListenerConfig::plaintext("127.0.0.1:0".parse().unwrap()),
            ],
            ..Default::default()
        };
        let server = KafkaServer::new(config, Arc::new(NullDispatcher));
        let addrs = server.start().await.unwrap();
        assert_eq!(addrs.len(), 2);
        assert_ne!(addrs[0], addrs[1]);
        server.stop().await.unwrap();
    }
}
