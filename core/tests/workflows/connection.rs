// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! Connection manager tests over the memory transport.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use calpush_core::transport::Frame;
use calpush_core::transport::memory::{self, Behavior};
use calpush_core::{ConnectionManager, ReadyState, SyncError};
use serde_json::json;
use tokio::time::timeout;

use crate::common::{RecordingListener, StaticTickets, WAIT, memory_manager};

#[tokio::test]
async fn connection_without_endpoint_fetches_no_ticket() {
    // Arrange
    let tickets = Arc::new(StaticTickets::default());
    let (connector, _server) = memory::pair();
    let manager = ConnectionManager::new(None, tickets.clone(), Arc::new(connector));

    // Act
    let err = manager
        .open(Arc::new(RecordingListener::default()))
        .await
        .unwrap_err();

    // Assert
    assert_eq!(err, SyncError::NoEndpointConfigured);
    assert_eq!(tickets.calls(), 0);
}

#[tokio::test]
async fn connection_url_carries_a_fresh_ticket() {
    // Arrange
    let tickets = Arc::new(StaticTickets::default());
    let (manager, mut server) = memory_manager(tickets.clone());

    // Act
    let first = manager
        .open(Arc::new(RecordingListener::default()))
        .await
        .unwrap();
    let second = manager
        .open(Arc::new(RecordingListener::default()))
        .await
        .unwrap();

    // Assert
    let peer = server.accept().await.unwrap();
    assert_eq!(peer.url().as_str(), "wss://push.example.com/ws?ticket=tkt-1");
    let peer = server.accept().await.unwrap();
    assert_eq!(peer.url().as_str(), "wss://push.example.com/ws?ticket=tkt-2");
    assert_eq!(tickets.calls(), 2);
    assert_ne!(first.id(), second.id());
}

#[tokio::test]
async fn connection_ticket_failure_stops_the_attempt() {
    let (manager, mut server) = memory_manager(Arc::new(StaticTickets::failing()));

    let err = manager
        .open(Arc::new(RecordingListener::default()))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::TicketUnavailable(_)));
    assert!(
        timeout(Duration::from_millis(50), server.accept())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn connection_refused_reports_connection_failed() {
    let (manager, server) = memory_manager(Arc::new(StaticTickets::default()));
    server.set_behavior(Behavior::Refuse("connection refused".to_string()));

    let err = manager
        .open(Arc::new(RecordingListener::default()))
        .await
        .unwrap_err();

    assert_eq!(err, SyncError::ConnectionFailed("connection refused".to_string()));
}

#[tokio::test(start_paused = true)]
async fn connection_handshake_times_out() {
    let (manager, server) = memory_manager(Arc::new(StaticTickets::default()));
    server.set_behavior(Behavior::Hang);

    let err = manager
        .open(Arc::new(RecordingListener::default()))
        .await
        .unwrap_err();

    assert_eq!(err, SyncError::HandshakeTimeout);
}

#[tokio::test]
async fn connection_delivers_frames_to_listener() {
    // Arrange
    let listener = Arc::new(RecordingListener::default());
    let (manager, mut server) = memory_manager(Arc::new(StaticTickets::default()));
    let channel = manager.open(listener.clone()).await.unwrap();
    let peer = server.accept().await.unwrap();
    let inbound = channel.subscribe_inbound();

    // Act
    peer.send_json(&json!({"/calendars/alice/work": {}}));
    peer.send(Frame::Text("not json".to_string()));
    peer.send(Frame::Pong);
    peer.close();

    // Assert
    timeout(WAIT, async {
        while listener.closed.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(
        *listener.messages.lock().unwrap(),
        vec![json!({"/calendars/alice/work": {}}), json!("not json")]
    );
    assert_eq!(*inbound.borrow(), 3);
    assert_eq!(channel.ready_state(), ReadyState::Closed);
}

#[tokio::test]
async fn connection_cleanup_silences_listener() {
    let listener = Arc::new(RecordingListener::default());
    let (manager, mut server) = memory_manager(Arc::new(StaticTickets::default()));
    let channel = manager.open(listener.clone()).await.unwrap();
    let peer = server.accept().await.unwrap();

    channel.cleanup();
    channel.cleanup();
    peer.send_json(&json!({"alice/work": {}}));
    channel.close();
    timeout(WAIT, async {
        while channel.ready_state() != ReadyState::Closed {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    assert!(listener.messages.lock().unwrap().is_empty());
    assert_eq!(listener.closed.load(Ordering::SeqCst), 0);
}
