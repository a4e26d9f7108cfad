//! Per-connection response ordering barrier
//!
//! Kafka requires responses on a connection to be written in the order the
//! requests were accepted, while dispatch may complete in any order. Each
//! accepted request takes a sequence number; completed responses are
//! buffered until every earlier slot has been released to the writer task.
//!
//! Sequence numbers, not correlation ids, drive the ordering: clients may
//! use arbitrary correlation id values.

use super::admission::MemoryReservation;
use super::shutdown::RequestGuard;
use crate::protocol::Response;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, Mutex};

/// A completed response waiting for its turn on the wire
///
/// The memory reservation and the in-flight request guard ride along and
/// drop after the writer has flushed the response, which is the release
/// point of both the admission budget and the shutdown gate.
pub(crate) struct PendingWrite {
    pub response: Response,
    pub reservation: Option<MemoryReservation>,
    pub guard: Option<RequestGuard>,
    /// True when this slot carries an error response from a failed dispatch
    pub dispatch_failed: bool,
}

struct OrderingState {
    next_send: u64,
    buffer: BTreeMap<u64, PendingWrite>,
}

/// Orders completed responses into request-acceptance order
pub(crate) struct ResponseSequencer {
    next_assign: AtomicU64,
    state: Mutex<OrderingState>,
    tx: mpsc::Sender<PendingWrite>,
}

impl ResponseSequencer {
    /// Create a sequencer and the channel its writer task drains
    pub fn new(channel_capacity: usize) -> (Self, mpsc::Receiver<PendingWrite>) {
        let (tx, rx) = mpsc::channel(channel_capacity);
        (
            Self {
                next_assign: AtomicU64::new(0),
                state: Mutex::new(OrderingState {
                    next_send: 0,
                    buffer: BTreeMap::new(),
                }),
                tx,
            },
            rx,
        )
    }

    /// Take the next sequence number at request acceptance
    pub fn assign(&self) -> u64 {
        self.next_assign.fetch_add(1, Ordering::Relaxed)
    }

    /// Submit the completed response for slot `seq`
    ///
    /// Releases to the writer every response that is now in order. The
    /// buffer lock is dropped before sending so slow writers only exert
    /// channel backpressure, never lock contention.
    pub async fn submit(&self, seq: u64, write: PendingWrite) {
        let ready = {
            let mut state = self.state.lock().await;
            let mut ready = Vec::new();
            if seq == state.next_send {
                state.next_send += 1;
                ready.push(write);
                loop {
                    let next = state.next_send;
                    match state.buffer.remove(&next) {
                        Some(buffered) => {
                            state.next_send += 1;
                            ready.push(buffered);
                        }
                        None => break,
                    }
                }
            } else {
                state.buffer.insert(seq, write);
            }
            ready
        };

        for write in ready {
            // Writer gone means the connection is tearing down; the
            // reservation drops here and frees the budget.
            if self.tx.send(write).await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn write(correlation_id: i32) -> PendingWrite {
        PendingWrite {
            response: Response::new(correlation_id, Bytes::from_static(b"r")),
            reservation: None,
            guard: None,
            dispatch_failed: false,
        }
    }

    #[tokio::test]
    async fn test_in_order_submission_passes_through() {
        let (seq, mut rx) = ResponseSequencer::new(16);
        let s0 = seq.assign();
        let s1 = seq.assign();

        seq.submit(s0, write(10)).await;
        seq.submit(s1, write(20)).await;

        assert_eq!(rx.recv().await.unwrap().response.correlation_id, 10);
        assert_eq!(rx.recv().await.unwrap().response.correlation_id, 20);
    }

    #[tokio::test]
    async fn test_out_of_order_completion_reordered() {
        let (seq, mut rx) = ResponseSequencer::new(16);
        let s0 = seq.assign();
        let s1 = seq.assign();
        let s2 = seq.assign();

        // Dispatch finishes 3, 1, 2; the wire must see 1, 2, 3.
        seq.submit(s2, write(3)).await;
        seq.submit(s0, write(1)).await;
        seq.submit(s1, write(2)).await;

        assert_eq!(rx.recv().await.unwrap().response.correlation_id, 1);
        assert_eq!(rx.recv().await.unwrap().response.correlation_id, 2);
        assert_eq!(rx.recv().await.unwrap().response.correlation_id, 3);
    }

    #[tokio::test]
    async fn test_correlation_ids_are_opaque_to_ordering() {
        let (seq, mut rx) = ResponseSequencer::new(16);
        let s0 = seq.assign();
        let s1 = seq.assign();

        // A client may reuse or shuffle correlation ids freely.
        seq.submit(s1, write(-7)).await;
        seq.submit(s0, write(-7)).await;

        assert_eq!(rx.recv().await.unwrap().response.correlation_id, -7);
        assert_eq!(rx.recv().await.unwrap().response.correlation_id, -7);
    }

    #[tokio::test]
    async fn test_failed_slot_still_advances_barrier() {
        let (seq, mut rx) = ResponseSequencer::new(16);
        let s0 = seq.assign();
        let s1 = seq.assign();

        seq.submit(s1, write(2)).await;
        seq.submit(
            s0,
            PendingWrite {
                response: Response::empty(1),
                reservation: None,
                guard: None,
                dispatch_failed: true,
            },
        )
        .await;

        let first = rx.recv().await.unwrap();
        assert!(first.dispatch_failed);
        assert_eq!(first.response.correlation_id, 1);
        assert_eq!(rx.recv().await.unwrap().response.correlation_id, 2);
    }

    #[tokio::test]
    async fn test_dropped_receiver_does_not_wedge_submit() {
        let (seq, rx) = ResponseSequencer::new(1);
        drop(rx);
        let s0 = seq.assign();
        seq.submit(s0, write(1)).await;
    }
}
