//! Per-connection request pipeline
//!
//! Each connection runs a reader loop and a writer task. The reader frames
//! requests (size, admission, header, quota, payload) and spawns one
//! dispatch task per request; the writer drains the ordering sequencer so
//! responses hit the wire in request-acceptance order no matter when
//! dispatch completes.
//!
//! Memory reservations and in-flight guards travel with each response and
//! release when it has been flushed (or when the connection tears down with
//! the response undelivered).

use super::admission::{MemoryAdmission, MemoryReservation};
use super::dispatch::{RequestContext, RequestDispatcher};
use super::quota::{QuotaManager, ThrottleResult};
use super::sequencer::{PendingWrite, ResponseSequencer};
use super::shutdown::ShutdownCoordinator;
use crate::error::Result;
use crate::metrics;
use crate::protocol::{
    read_frame_size, read_header, read_payload, RequestHeader, Response, SIZE_PREFIX_BYTES,
};
use crate::runtime::ShardedRuntime;
use bytes::Bytes;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Completed responses buffered per connection before the writer applies
/// backpressure
const RESPONSE_CHANNEL_CAPACITY: usize = 128;

/// Stable identity of a live connection
pub type ConnectionId = u64;

/// Registry of live connections
///
/// A slot map keyed by connection id: registration on accept, O(1) removal
/// from the guard's destructor, no scans at teardown.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, SocketAddr>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection; the returned guard removes it exactly once
    pub fn register(
        self: &Arc<Self>,
        addr: SocketAddr,
        coordinator: Arc<ShutdownCoordinator>,
    ) -> ConnectionGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections.insert(id, addr);
        coordinator.connection_opened();
        metrics::record_connection_active(1);
        ConnectionGuard {
            id,
            registry: self.clone(),
            coordinator,
        }
    }

    /// Number of live connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connections are live
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

/// Removes the connection from the registry on drop
pub struct ConnectionGuard {
    id: ConnectionId,
    registry: Arc<ConnectionRegistry>,
    coordinator: Arc<ShutdownCoordinator>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.connections.remove(&self.id);
        self.coordinator.connection_closed();
        metrics::record_connection_active(-1);
    }
}

/// Shared collaborators handed to every connection
pub(crate) struct ConnectionShared {
    pub dispatcher: Arc<dyn RequestDispatcher>,
    pub admission: Arc<MemoryAdmission>,
    pub quotas: Arc<QuotaManager>,
    pub coordinator: Arc<ShutdownCoordinator>,
    pub runtime: Option<Arc<ShardedRuntime>>,
}

/// Serve one connection until EOF, a fatal error, or shutdown
///
/// Resolves only after the writer has drained every accepted request's
/// slot and the write half has been shut down.
pub(crate) async fn process<S>(
    stream: S,
    peer_addr: Option<SocketAddr>,
    shared: Arc<ConnectionShared>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let (sequencer, response_rx) = ResponseSequencer::new(RESPONSE_CHANNEL_CAPACITY);
    let sequencer = Arc::new(sequencer);

    let writer_handle = tokio::spawn(writer_task(writer, response_rx, peer_addr));

    read_loop(reader, peer_addr, &shared, &sequencer).await;

    // Release the reader's sequencer handle so the writer channel closes
    // once every in-flight dispatch has submitted its slot.
    drop(sequencer);
    if writer_handle.await.is_err() {
        warn!(peer = ?peer_addr, "connection writer task panicked");
    }
}

/// A fully framed request holding its admission reservation
struct FramedRequest {
    header: RequestHeader,
    payload: Bytes,
    throttle: ThrottleResult,
    reservation: MemoryReservation,
}

/// Frame the next request: size, admission, header, quota, payload
///
/// `Ok(None)` is a clean EOF at the frame boundary. Whether an error ends
/// the connection or only this request is the caller's decision, via
/// `TidelogError::is_connection_fatal`.
async fn next_request<R>(
    reader: &mut R,
    shared: &ConnectionShared,
) -> Result<Option<FramedRequest>>
where
    R: AsyncRead + Unpin,
{
    let Some(size) = read_frame_size(reader).await? else {
        return Ok(None);
    };
    metrics::record_bytes_received((size + SIZE_PREFIX_BYTES) as u64);

    // Admission before any further read; the reservation travels with the
    // request until its response is written.
    let reservation = shared.admission.acquire(size).await?;
    let header = read_header(reader).await?;

    // Record throughput against the client's quota. The first violating
    // request passes untouched and carries the delay back in its
    // response; later violations suspend the pipeline here so
    // backpressure reaches the socket.
    let throttle = shared.quotas.record_and_throttle(header.client_id_str(), size);
    if throttle.throttled() && !throttle.first_violation {
        debug!(
            client_id = header.client_id_str(),
            delay_ms = throttle.delay.as_millis() as u64,
            "throttling client"
        );
        tokio::time::sleep(throttle.delay).await;
    }

    let payload = read_payload(reader, size, &header).await?;
    Ok(Some(FramedRequest {
        header,
        payload,
        throttle,
        reservation,
    }))
}

async fn read_loop<R>(
    mut reader: R,
    peer_addr: Option<SocketAddr>,
    shared: &Arc<ConnectionShared>,
    sequencer: &Arc<ResponseSequencer>,
) where
    R: AsyncRead + Unpin,
{
    let mut shutdown_rx = shared.coordinator.subscribe();

    loop {
        let outcome = tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                debug!(peer = ?peer_addr, "connection observed shutdown");
                break;
            }
            outcome = next_request(&mut reader, shared) => outcome,
        };

        let FramedRequest {
            header,
            payload,
            throttle,
            reservation,
        } = match outcome {
            Ok(Some(request)) => request,
            Ok(None) => {
                debug!(peer = ?peer_addr, "client disconnected");
                break;
            }
            Err(e) if e.is_connection_fatal() => {
                debug!(peer = ?peer_addr, error = %e, "closing connection");
                break;
            }
            Err(e) => {
                // Isolated to this request; the connection keeps serving.
                debug!(peer = ?peer_addr, error = %e, "request dropped before dispatch");
                continue;
            }
        };

        let Some(guard) = shared.coordinator.request_guard() else {
            debug!(peer = ?peer_addr, "request refused, server shutting down");
            break;
        };

        let seq = sequencer.assign();
        let sequencer = sequencer.clone();
        let dispatcher = shared.dispatcher.clone();
        let runtime = shared.runtime.clone();

        tokio::spawn(async move {
            let correlation_id = header.correlation_id;
            let ctx = RequestContext {
                header: header.clone(),
                payload,
                throttle,
                runtime,
            };

            let write = match dispatcher.dispatch(ctx).await {
                Ok(mut response) => {
                    // The response answers this request regardless of what
                    // the handler put in the buffer.
                    response.correlation_id = correlation_id;
                    PendingWrite {
                        response,
                        reservation: Some(reservation),
                        guard: Some(guard),
                        dispatch_failed: false,
                    }
                }
                Err(e) => {
                    warn!(correlation_id, error = %e, "request dispatch failed");
                    let body = dispatcher.encode_error(&header, &e);
                    PendingWrite {
                        response: Response::new(correlation_id, body),
                        reservation: Some(reservation),
                        guard: Some(guard),
                        dispatch_failed: true,
                    }
                }
            };
            sequencer.submit(seq, write).await;
        });
    }
}

/// Drain ordered responses onto the wire
///
/// A write or flush failure abandons the connection; undelivered slots drop
/// with the channel, releasing their reservations and guards.
async fn writer_task<W>(
    mut writer: W,
    mut response_rx: mpsc::Receiver<PendingWrite>,
    peer_addr: Option<SocketAddr>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(write) = response_rx.recv().await {
        if let Err(e) = write.response.write_to(&mut writer).await {
            debug!(peer = ?peer_addr, error = %e, "failed to write response");
            break;
        }
        if let Err(e) = writer.flush().await {
            debug!(peer = ?peer_addr, error = %e, "failed to flush response");
            break;
        }

        metrics::record_bytes_sent(write.response.wire_len() as u64);
        if write.dispatch_failed {
            metrics::record_request_error();
        } else {
            metrics::record_request_served();
        }
        // reservation + guard drop here: budget and gate release on the
        // written response.
    }

    let _ = writer.shutdown().await;
}
