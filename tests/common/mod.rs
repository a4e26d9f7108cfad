//! Shared helpers for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tidelog::config::ListenerConfig;
use tidelog::protocol::{encode_request, RequestHeader, Response};
use tidelog::server::{RequestContext, RequestDispatcher};
use tidelog::{KafkaServer, Result, ServerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Dispatcher that echoes the request payload back
pub struct EchoDispatcher;

#[async_trait]
impl RequestDispatcher for EchoDispatcher {
    async fn dispatch(&self, ctx: RequestContext) -> Result<Response> {
        Ok(Response::new(ctx.correlation_id(), ctx.payload))
    }
}

/// Dispatcher that delays each request by `correlation_id * step` so
/// completion order inverts acceptance order
pub struct StaggeredDispatcher {
    pub step: Duration,
}

#[async_trait]
impl RequestDispatcher for StaggeredDispatcher {
    async fn dispatch(&self, ctx: RequestContext) -> Result<Response> {
        let factor = ctx.correlation_id().unsigned_abs();
        tokio::time::sleep(self.step * factor).await;
        Ok(Response::new(
            ctx.correlation_id(),
            Bytes::from(format!("resp-{}", ctx.correlation_id())),
        ))
    }
}

/// Start a server on an ephemeral port and return it with its address
pub async fn start_server(
    mut config: ServerConfig,
    dispatcher: Arc<dyn RequestDispatcher>,
) -> (KafkaServer, SocketAddr) {
    config.listeners = vec![ListenerConfig::plaintext("127.0.0.1:0".parse().unwrap())];
    let server = KafkaServer::new(config, dispatcher);
    let addrs = server.start().await.unwrap();
    (server, addrs[0])
}

/// Build a request frame with the given correlation id and payload
pub fn request_frame(correlation_id: i32, client_id: Option<&str>, payload: &[u8]) -> Vec<u8> {
    encode_request(
        &RequestHeader {
            api_key: 0,
            api_version: 9,
            correlation_id,
            client_id: client_id.map(str::to_string),
        },
        payload,
    )
}

/// Read one framed response: (correlation_id, payload)
pub async fn read_response(stream: &mut TcpStream) -> std::io::Result<(i32, Vec<u8>)> {
    let mut size_buf = [0u8; 4];
    stream.read_exact(&mut size_buf).await?;
    let size = i32::from_be_bytes(size_buf) as usize;

    let mut corr_buf = [0u8; 4];
    stream.read_exact(&mut corr_buf).await?;

    let mut payload = vec![0u8; size - 4];
    stream.read_exact(&mut payload).await?;
    Ok((i32::from_be_bytes(corr_buf), payload))
}

/// Send a frame and read the matching response
pub async fn roundtrip(
    stream: &mut TcpStream,
    correlation_id: i32,
    payload: &[u8],
) -> std::io::Result<(i32, Vec<u8>)> {
    let frame = request_frame(correlation_id, Some("test-client"), payload);
    stream.write_all(&frame).await?;
    read_response(stream).await
}
