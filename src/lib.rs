#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # Tidelog
//!
//! Tidelog is the broker core of a Kafka-wire-compatible streaming
//! platform: the per-connection protocol server and the Raft heartbeat
//! subsystem, built for bounded memory and predictable fan-out.
//!
//! ## Features
//!
//! - **Kafka framing**: size-prefixed requests with the fixed header and
//!   client id semantics Kafka clients expect
//! - **Bounded-memory admission**: a per-shard byte budget that no request
//!   may bypass
//! - **Quota throttling**: per-client token buckets with Kafka's
//!   first-violation-is-informational semantics
//! - **Ordered responses**: pipelined requests complete in any order,
//!   responses hit the wire in acceptance order
//! - **Batched heartbeats**: one RPC per peer per tick across all
//!   replication groups, instead of one per (group, peer) pair
//! - **TLS listeners**: credentials on a listener switch it to TLS
//!
//! ## Library Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use bytes::Bytes;
//! use tidelog::protocol::Response;
//! use tidelog::server::{RequestContext, RequestDispatcher};
//! use tidelog::{KafkaServer, Result, ServerConfig};
//!
//! struct MyDispatcher;
//!
//! #[async_trait]
//! impl RequestDispatcher for MyDispatcher {
//!     async fn dispatch(&self, ctx: RequestContext) -> Result<Response> {
//!         // Decode ctx.payload for ctx.header.api_key, serve it, and
//!         // return the encoded response body.
//!         Ok(Response::new(ctx.correlation_id(), Bytes::new()))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let server = KafkaServer::new(ServerConfig::default(), Arc::new(MyDispatcher));
//!     server.start().await?;
//!     // ... run until shutdown ...
//!     server.stop().await
//! }
//! ```
//!
//! Storage engines, the full Kafka API surface, and cluster metadata are
//! external collaborators reached through the [`server::RequestDispatcher`]
//! and [`raft::RaftGroup`] seams.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod raft;
pub mod runtime;
pub mod server;

pub use config::{HeartbeatConfig, ListenerConfig, ServerConfig};
pub use error::{Result, TidelogError};
pub use server::{KafkaServer, RequestContext, RequestDispatcher};
