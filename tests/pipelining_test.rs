//! Response ordering under pipelining
//!
//! Clients may pipeline requests without waiting; the server must write
//! responses in request-acceptance order even when dispatch completes out
//! of order.

mod common;

use common::{read_response, request_frame, start_server, StaggeredDispatcher};
use std::sync::Arc;
use std::time::Duration;
use tidelog::ServerConfig;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

#[tokio::test]
async fn test_pipelined_responses_arrive_in_request_order() {
    // correlation id 3 sleeps longest, so dispatch completes 1, 2, 3 at
    // best and 3 finishes last; the wire must show 1, 2, 3 regardless.
    let dispatcher = Arc::new(StaggeredDispatcher {
        step: Duration::from_millis(30),
    });
    let (server, addr) = start_server(ServerConfig::default(), dispatcher).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    for corr in [3, 1, 2] {
        // Send in the order 3, 1, 2: acceptance order is 3, 1, 2.
        let frame = request_frame(corr, Some("pipeliner"), b"req");
        stream.write_all(&frame).await.unwrap();
    }

    let (c1, p1) = read_response(&mut stream).await.unwrap();
    let (c2, p2) = read_response(&mut stream).await.unwrap();
    let (c3, p3) = read_response(&mut stream).await.unwrap();

    assert_eq!((c1, c2, c3), (3, 1, 2), "acceptance order, not completion order");
    assert_eq!(p1, b"resp-3");
    assert_eq!(p2, b"resp-1");
    assert_eq!(p3, b"resp-2");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_deep_pipeline_preserves_order() {
    let dispatcher = Arc::new(StaggeredDispatcher {
        step: Duration::from_millis(1),
    });
    let (server, addr) = start_server(ServerConfig::default(), dispatcher).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    // Descending ids: later requests always finish first.
    let ids: Vec<i32> = (1..=40).rev().collect();
    for &corr in &ids {
        let frame = request_frame(corr, Some("deep"), b"x");
        stream.write_all(&frame).await.unwrap();
    }

    for &expected in &ids {
        let (corr, _) = read_response(&mut stream).await.unwrap();
        assert_eq!(corr, expected);
    }

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_connections_are_ordered_independently() {
    let dispatcher = Arc::new(StaggeredDispatcher {
        step: Duration::from_millis(20),
    });
    let (server, addr) = start_server(ServerConfig::default(), dispatcher).await;

    let mut slow = TcpStream::connect(addr).await.unwrap();
    let mut fast = TcpStream::connect(addr).await.unwrap();

    // A slow request on one connection must not delay the other.
    slow.write_all(&request_frame(10, Some("slow"), b"s"))
        .await
        .unwrap();
    fast.write_all(&request_frame(1, Some("fast"), b"f"))
        .await
        .unwrap();

    let (fast_corr, _) = read_response(&mut fast).await.unwrap();
    assert_eq!(fast_corr, 1);

    let (slow_corr, _) = read_response(&mut slow).await.unwrap();
    assert_eq!(slow_corr, 10);

    server.stop().await.unwrap();
}
