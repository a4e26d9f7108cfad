//! Request dispatch seam
//!
//! The connection layer frames requests and hands them to a
//! `RequestDispatcher`, which produces one response buffer per request.
//! Dispatch may complete in any order relative to other requests on the
//! same connection; the sequencer restores acceptance order on the wire.
//!
//! API handlers, metadata, and partition routing live behind this trait.
//! Partition-owned work reaches its shard through the sharded runtime
//! handle carried in the context.

use crate::error::{Result, TidelogError};
use crate::protocol::{RequestHeader, Response};
use crate::runtime::ShardedRuntime;
use crate::server::quota::ThrottleResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Kafka UNKNOWN_SERVER_ERROR code
const UNKNOWN_SERVER_ERROR: i16 = -1;

/// Everything a handler needs to serve one request
pub struct RequestContext {
    /// Parsed fixed header
    pub header: RequestHeader,
    /// Opaque request payload past the header
    pub payload: Bytes,
    /// Throttle computed for this request; handlers surface the delay in
    /// responses that carry a throttle-time field
    pub throttle: ThrottleResult,
    /// Sharded runtime for routing partition work to its owning shard
    pub runtime: Option<Arc<ShardedRuntime>>,
}

impl RequestContext {
    /// Correlation id of the request being served
    pub fn correlation_id(&self) -> i32 {
        self.header.correlation_id
    }
}

/// Produces a response buffer for each framed request
#[async_trait]
pub trait RequestDispatcher: Send + Sync + 'static {
    /// Serve one request
    ///
    /// Errors are isolated to this request: the connection answers with
    /// `encode_error` in the request's ordering slot and stays open.
    async fn dispatch(&self, ctx: RequestContext) -> Result<Response>;

    /// Encode the error body written when `dispatch` fails
    ///
    /// The default is a bare big-endian error code; dispatchers that know
    /// the API-specific response shape should override this.
    fn encode_error(&self, _header: &RequestHeader, _error: &TidelogError) -> Bytes {
        Bytes::copy_from_slice(&UNKNOWN_SERVER_ERROR.to_be_bytes())
    }
}
