//! Raft heartbeat subsystem
//!
//! Every replicated group led from this node must heartbeat its followers.
//! Sending one RPC per (group, peer) pair is quadratic in groups; the
//! heartbeat manager batches all groups targeting the same peer into a
//! single RPC per tick. Log replication and elections live with the group
//! implementations behind the `RaftGroup` trait.

pub mod heartbeat;
pub mod transport;

pub use heartbeat::HeartbeatManager;
pub use transport::{serve_heartbeats, PeerTransport, TcpPeerTransport, TransportError};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Raft replication group identifier
pub type GroupId = u64;

/// Cluster node identifier
pub type NodeId = u64;

/// A position in a group's replicated log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPosition {
    pub index: u64,
    pub term: u64,
}

/// One group's heartbeat toward one peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatEntry {
    pub group: GroupId,
    pub term: u64,
    pub commit_index: u64,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
}

/// A batched heartbeat RPC: every entry shares the target peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub source: NodeId,
    pub entries: Vec<HeartbeatEntry>,
}

/// Per-group outcome inside a heartbeat reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatReplyEntry {
    pub group: GroupId,
    pub success: bool,
    pub term: u64,
    pub last_log_index: u64,
}

/// Reply to a batched heartbeat RPC
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatReply {
    pub entries: Vec<HeartbeatReplyEntry>,
}

/// Immutable per-tick view of a replication group
///
/// The heartbeat manager reads this snapshot and never mutates group state
/// directly; effects flow back through `RaftGroup::process_reply`.
#[derive(Debug, Clone, Default)]
pub struct GroupSnapshot {
    /// Current term of the group's consensus instance
    pub term: u64,
    /// Highest committed log index
    pub commit_index: u64,
    /// Peer nodes in the group, possibly including the local node
    pub peers: Vec<NodeId>,
    /// Last log position known visible to each peer
    pub last_visible: HashMap<NodeId, LogPosition>,
}

/// A replication group registered with the heartbeat manager
///
/// Implementations own the consensus state machine; the manager only
/// snapshots them per tick and delivers per-peer reply outcomes. For a
/// single group, replies from one peer arrive in tick order; replies for
/// distinct groups may be delivered concurrently.
pub trait RaftGroup: Send + Sync + 'static {
    /// The group's id, stable for its lifetime
    fn id(&self) -> GroupId;

    /// Immutable view used to build this tick's heartbeat entries
    fn snapshot(&self) -> GroupSnapshot;

    /// Deliver one peer's reply entry, or the transport failure that took
    /// the whole batch down
    fn process_reply(&self, peer: NodeId, reply: Result<HeartbeatReplyEntry, TransportError>);
}
