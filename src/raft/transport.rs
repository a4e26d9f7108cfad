//! Peer transport for heartbeat RPCs
//!
//! The manager talks to remote nodes through the `PeerTransport` facade;
//! connection management, reconnect, and backoff live behind it. The TCP
//! implementation opens a connection per request and exchanges 4-byte
//! length-prefixed JSON frames.

use super::{HeartbeatReply, HeartbeatRequest, NodeId};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

/// Upper bound on an inter-broker frame; anything larger is corrupt
const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

/// Failure to exchange a heartbeat with a peer
///
/// Cloneable so one transport failure can fan out to every group in the
/// batch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("peer {0} unreachable: {1}")]
    Unreachable(NodeId, String),

    #[error("heartbeat to peer {0} timed out")]
    Timeout(NodeId),

    #[error("peer {0} sent an invalid frame: {1}")]
    Protocol(NodeId, String),

    #[error("no address known for peer {0}")]
    UnknownPeer(NodeId),
}

/// Abstract send/receive interface to remote nodes
///
/// Contract: each call terminates with a reply or an error (the manager
/// additionally applies its own deadline); calls for distinct peers are
/// safe concurrently; dropping the future cancels the exchange.
#[async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    /// Exchange one batched heartbeat with a peer
    async fn heartbeat(
        &self,
        peer: NodeId,
        request: HeartbeatRequest,
    ) -> Result<HeartbeatReply, TransportError>;
}

/// TCP implementation of the peer transport
///
/// One connection per exchange keeps failure domains per-call; a stuck
/// peer costs at most the manager's deadline.
pub struct TcpPeerTransport {
    peers: RwLock<HashMap<NodeId, SocketAddr>>,
    connect_timeout: Duration,
}

impl TcpPeerTransport {
    /// Create a transport with the given connect timeout
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            connect_timeout,
        }
    }

    /// Register or update a peer's address
    pub fn set_peer(&self, peer: NodeId, addr: SocketAddr) {
        self.peers.write().insert(peer, addr);
    }

    /// Forget a peer's address
    pub fn remove_peer(&self, peer: NodeId) {
        self.peers.write().remove(&peer);
    }

    fn addr_of(&self, peer: NodeId) -> Result<SocketAddr, TransportError> {
        self.peers
            .read()
            .get(&peer)
            .copied()
            .ok_or(TransportError::UnknownPeer(peer))
    }
}

#[async_trait]
impl PeerTransport for TcpPeerTransport {
    async fn heartbeat(
        &self,
        peer: NodeId,
        request: HeartbeatRequest,
    ) -> Result<HeartbeatReply, TransportError> {
        let addr = self.addr_of(peer)?;

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Unreachable(peer, "connect timeout".to_string()))?
            .map_err(|e| TransportError::Unreachable(peer, e.to_string()))?;

        let (mut reader, mut writer) = stream.into_split();

        write_frame(&mut writer, &request)
            .await
            .map_err(|e| TransportError::Unreachable(peer, e.to_string()))?;

        read_frame(&mut reader, peer).await
    }
}

async fn write_frame<W, T>(writer: &mut W, message: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let data = serde_json::to_vec(message)?;
    writer.write_all(&(data.len() as u32).to_be_bytes()).await?;
    writer.write_all(&data).await?;
    writer.flush().await
}

async fn read_frame<R, T>(reader: &mut R, peer: NodeId) -> Result<T, TransportError>
where
    R: AsyncRead + Unpin,
    T: serde::de::DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| TransportError::Unreachable(peer, e.to_string()))?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(TransportError::Protocol(
            peer,
            format!("frame of {} bytes exceeds limit", len),
        ));
    }

    let mut data = vec![0u8; len as usize];
    reader
        .read_exact(&mut data)
        .await
        .map_err(|e| TransportError::Unreachable(peer, e.to_string()))?;

    serde_json::from_slice(&data).map_err(|e| TransportError::Protocol(peer, e.to_string()))
}

/// Serve inbound heartbeat frames on a listener
///
/// Each accepted connection is drained request-by-request through
/// `handler`; the loop runs until the listener task is aborted. Used by
/// the inter-broker wiring and integration tests.
pub async fn serve_heartbeats<F>(listener: TcpListener, handler: F)
where
    F: Fn(HeartbeatRequest) -> HeartbeatReply + Send + Sync + 'static,
{
    let handler = Arc::new(handler);
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                debug!(error = %e, "heartbeat accept failed");
                continue;
            }
        };

        let handler = handler.clone();
        tokio::spawn(async move {
            let (mut reader, mut writer) = stream.into_split();
            loop {
                let request: HeartbeatRequest = match read_frame(&mut reader, 0).await {
                    Ok(request) => request,
                    Err(TransportError::Unreachable(..)) => break, // peer went away
                    Err(e) => {
                        warn!(peer = %addr, error = %e, "invalid heartbeat frame");
                        break;
                    }
                };
                let reply = handler(request);
                if let Err(e) = write_frame(&mut writer, &reply).await {
                    debug!(peer = %addr, error = %e, "failed to write heartbeat reply");
                    break;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raft::HeartbeatReplyEntry;

    fn request(source: NodeId) -> HeartbeatRequest {
        HeartbeatRequest {
            source,
            entries: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_unknown_peer_rejected() {
        let transport = TcpPeerTransport::new(Duration::from_millis(100));
        let err = transport.heartbeat(9, request(1)).await.unwrap_err();
        assert_eq!(err, TransportError::UnknownPeer(9));
    }

    #[tokio::test]
    async fn test_unreachable_peer_reported() {
        let transport = TcpPeerTransport::new(Duration::from_millis(100));
        // A port nothing listens on.
        transport.set_peer(2, "127.0.0.1:1".parse().unwrap());
        let err = transport.heartbeat(2, request(1)).await.unwrap_err();
        assert!(matches!(err, TransportError::Unreachable(2, _)));
    }

    #[tokio::test]
    async fn test_roundtrip_against_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(serve_heartbeats(listener, |request| HeartbeatReply {
            entries: request
                .entries
                .iter()
                .map(|e| HeartbeatReplyEntry {
                    group: e.group,
                    success: true,
                    term: e.term,
                    last_log_index: e.prev_log_index,
                })
                .collect(),
        }));

        let transport = TcpPeerTransport::new(Duration::from_millis(500));
        transport.set_peer(2, addr);

        let reply = transport
            .heartbeat(
                2,
                HeartbeatRequest {
                    source: 1,
                    entries: vec![crate::raft::HeartbeatEntry {
                        group: 5,
                        term: 1,
                        commit_index: 10,
                        prev_log_index: 9,
                        prev_log_term: 1,
                    }],
                },
            )
            .await
            .unwrap();

        assert_eq!(reply.entries.len(), 1);
        assert_eq!(reply.entries[0].group, 5);
        assert!(reply.entries[0].success);

        server.abort();
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let oversized = (MAX_FRAME_BYTES + 1).to_be_bytes();
        let mut reader: &[u8] = &oversized;
        let err = read_frame::<_, HeartbeatReply>(&mut reader, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Protocol(3, _)));
    }
}
