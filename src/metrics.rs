//! Server probe metrics
//!
//! Thin wrappers around the `metrics` facade so call sites stay terse.
//! Exporter wiring is left to the embedding application; this module only
//! registers descriptions and records values.

use metrics::{counter, describe_counter, describe_gauge, gauge};
use std::sync::OnceLock;

static METRICS_REGISTERED: OnceLock<()> = OnceLock::new();

/// Register all metrics with their descriptions
///
/// Safe to call more than once; registration happens on the first call.
pub fn register_metrics() {
    METRICS_REGISTERED.get_or_init(|| {
        describe_gauge!(
            "tidelog_connections_active",
            "Number of currently active connections"
        );
        describe_counter!(
            "tidelog_connections_total",
            "Total number of connections accepted"
        );
        describe_counter!("tidelog_bytes_sent_total", "Total response bytes written");
        describe_counter!(
            "tidelog_bytes_received_total",
            "Total request bytes read from clients"
        );
        describe_counter!("tidelog_requests_served_total", "Requests fully answered");
        describe_counter!(
            "tidelog_request_errors_total",
            "Requests that failed in dispatch"
        );
        describe_counter!(
            "tidelog_requests_awaiting_memory_total",
            "Requests that had to wait for admission memory"
        );
        describe_counter!(
            "tidelog_heartbeats_sent_total",
            "Heartbeat RPCs dispatched to peers"
        );
        describe_counter!(
            "tidelog_heartbeat_failures_total",
            "Heartbeat RPCs that failed or timed out"
        );
        describe_counter!(
            "tidelog_heartbeat_peers_skipped_total",
            "Peers skipped because a heartbeat was still outstanding"
        );
    });
}

/// Record a change in the active connection gauge
pub fn record_connection_active(delta: i64) {
    gauge!("tidelog_connections_active").increment(delta as f64);
    if delta > 0 {
        counter!("tidelog_connections_total").increment(delta as u64);
    }
}

/// Record response bytes written to a client
pub fn record_bytes_sent(bytes: u64) {
    counter!("tidelog_bytes_sent_total").increment(bytes);
}

/// Record request bytes read from a client
pub fn record_bytes_received(bytes: u64) {
    counter!("tidelog_bytes_received_total").increment(bytes);
}

/// Record a fully served request
pub fn record_request_served() {
    counter!("tidelog_requests_served_total").increment(1);
}

/// Record a request that failed in dispatch
pub fn record_request_error() {
    counter!("tidelog_request_errors_total").increment(1);
}

/// Record a request that had to wait for admission memory
pub fn record_awaiting_memory() {
    counter!("tidelog_requests_awaiting_memory_total").increment(1);
}

/// Record a heartbeat RPC dispatched to a peer
pub fn record_heartbeat_sent() {
    counter!("tidelog_heartbeats_sent_total").increment(1);
}

/// Record a failed or timed-out heartbeat RPC
pub fn record_heartbeat_failure() {
    counter!("tidelog_heartbeat_failures_total").increment(1);
}

/// Record a peer skipped because its previous heartbeat is still outstanding
pub fn record_heartbeat_peer_skipped() {
    counter!("tidelog_heartbeat_peers_skipped_total").increment(1);
}
