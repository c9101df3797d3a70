// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! End-to-end supervisor tests over the memory transport.
//!
//! These tests validate the full lifecycle: connect on authentication,
//! registration of the selected calendars, push routing into the replica,
//! reconnection after the server drops, and giving up after the budget.

use std::sync::Arc;
use std::time::Duration;

use calpush_core::transport::Frame;
use calpush_core::transport::memory::{Behavior, MemoryServer};
use calpush_core::{
    CalendarId, CalendarKind, ConnectionSupervisor, MemoryReplica, Replica, SyncConfig, SyncError,
    SyncEvent,
};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::common::{RecordingReconciler, StaticTickets, WAIT, calendar, memory_manager};

struct Harness {
    supervisor: ConnectionSupervisor,
    server: MemoryServer,
    events: broadcast::Receiver<SyncEvent>,
    replica: Arc<MemoryReplica>,
}

fn harness(max_reconnect_attempts: u32) -> Harness {
    let (connection, server) = memory_manager(Arc::new(StaticTickets::default()));
    let replica = Arc::new(MemoryReplica::new());
    replica.insert(CalendarKind::Primary, calendar("alice", "work", "t1"));
    replica.insert(CalendarKind::Primary, calendar("alice", "home", "h1"));

    let config = SyncConfig {
        max_reconnect_attempts,
        ..SyncConfig::default()
    };
    let supervisor = ConnectionSupervisor::new(
        &config,
        connection,
        Arc::new(RecordingReconciler::default()),
        replica.clone(),
        Arc::new(|_: u32| Duration::from_millis(20)),
    );
    let events = supervisor.subscribe();
    Harness {
        supervisor,
        server,
        events,
        replica,
    }
}

async fn next_event(events: &mut broadcast::Receiver<SyncEvent>) -> SyncEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("event in time")
        .expect("event stream open")
}

fn work() -> CalendarId {
    CalendarId::new("alice", "work")
}

fn home() -> CalendarId {
    CalendarId::new("alice", "home")
}

#[tokio::test]
async fn supervisor_stays_idle_until_authenticated() {
    let mut h = harness(3);

    let err = h.supervisor.set_selected_calendars(vec![work()]).unwrap_err();

    assert_eq!(err, SyncError::ChannelNotOpen);
    assert_eq!(h.supervisor.selected_calendars(), vec![work()]);
    assert!(
        timeout(Duration::from_millis(100), h.server.accept())
            .await
            .is_err()
    );
    assert!(!h.supervisor.is_connected());
}

#[tokio::test]
async fn supervisor_registers_selection_and_routes_pushes() {
    // Arrange
    let mut h = harness(3);
    let _ = h.supervisor.set_selected_calendars(vec![work()]);

    // Act
    h.supervisor.set_authenticated(true);
    let mut peer = timeout(WAIT, h.server.accept()).await.unwrap().unwrap();

    // Assert - the pending selection goes out on open
    assert_eq!(next_event(&mut h.events).await, SyncEvent::Connected);
    assert_eq!(
        timeout(WAIT, peer.recv_json()).await.unwrap().unwrap(),
        json!({"register": ["/calendars/alice/work"]})
    );
    assert!(h.supervisor.is_connected());

    // Act - the server announces a change
    peer.send_json(&json!({"/calendars/alice/work": {}}));

    // Assert
    assert_eq!(
        next_event(&mut h.events).await,
        SyncEvent::CalendarSynced {
            calendar: work(),
            kind: CalendarKind::Primary,
            deleted: 0,
            upserted: 0,
        }
    );
    let stored = h.replica.calendar(CalendarKind::Primary, &work()).unwrap();
    assert_eq!(stored.sync_token.as_deref(), Some("t1+1"));
}

#[tokio::test]
async fn supervisor_sends_selection_changes_on_open_channel() {
    // Arrange
    let mut h = harness(3);
    h.supervisor.set_authenticated(true);
    let mut peer = timeout(WAIT, h.server.accept()).await.unwrap().unwrap();
    assert_eq!(next_event(&mut h.events).await, SyncEvent::Connected);

    // Act
    let added = h
        .supervisor
        .set_selected_calendars(vec![work(), home()])
        .unwrap();
    let dropped = h.supervisor.deselect(&home()).unwrap();

    // Assert
    assert_eq!(added.to_register, vec![work(), home()]);
    assert_eq!(dropped.to_unregister, vec![home()]);
    assert_eq!(
        timeout(WAIT, peer.recv_json()).await.unwrap().unwrap(),
        json!({"register": ["/calendars/alice/work", "/calendars/alice/home"]})
    );
    assert_eq!(
        timeout(WAIT, peer.recv_json()).await.unwrap().unwrap(),
        json!({"unregister": ["/calendars/alice/home"]})
    );
}

#[tokio::test]
async fn supervisor_reconnects_after_server_close() {
    // Arrange
    let mut h = harness(3);
    let _ = h.supervisor.set_selected_calendars(vec![work()]);
    h.supervisor.set_authenticated(true);
    let mut first = timeout(WAIT, h.server.accept()).await.unwrap().unwrap();
    assert_eq!(next_event(&mut h.events).await, SyncEvent::Connected);
    timeout(WAIT, first.recv_json()).await.unwrap().unwrap();

    // Act
    first.close();

    // Assert - a new channel comes up and is registered again
    assert_eq!(next_event(&mut h.events).await, SyncEvent::Disconnected);
    let mut second = timeout(WAIT, h.server.accept()).await.unwrap().unwrap();
    assert_eq!(next_event(&mut h.events).await, SyncEvent::Connected);
    assert_eq!(
        timeout(WAIT, second.recv_json()).await.unwrap().unwrap(),
        json!({"register": ["/calendars/alice/work"]})
    );
    assert_eq!(second.url().query(), Some("ticket=tkt-2"));
    assert_eq!(h.supervisor.attempt_count(), 1);
}

#[tokio::test]
async fn supervisor_goes_offline_after_budget_and_recovers_on_manual_connect() {
    // Arrange
    let mut h = harness(2);
    h.server
        .set_behavior(Behavior::Refuse("connection refused".to_string()));

    // Act
    h.supervisor.set_authenticated(true);

    // Assert
    assert_eq!(
        next_event(&mut h.events).await,
        SyncEvent::Offline { attempts: 2 }
    );
    assert!(!h.supervisor.is_connected());

    // Act - the user retries once the server is back
    h.server.set_behavior(Behavior::Accept);
    h.supervisor.connect();

    // Assert
    timeout(WAIT, h.server.accept()).await.unwrap().unwrap();
    assert_eq!(next_event(&mut h.events).await, SyncEvent::Connected);
    assert_eq!(h.supervisor.attempt_count(), 0);
}

#[tokio::test]
async fn supervisor_disconnects_on_sign_out() {
    // Arrange
    let mut h = harness(3);
    h.supervisor.set_authenticated(true);
    let mut peer = timeout(WAIT, h.server.accept()).await.unwrap().unwrap();
    assert_eq!(next_event(&mut h.events).await, SyncEvent::Connected);

    // Act
    h.supervisor.set_authenticated(false);

    // Assert - the socket is closed and nothing reconnects
    assert_eq!(next_event(&mut h.events).await, SyncEvent::Disconnected);
    assert_eq!(timeout(WAIT, peer.recv_text()).await.unwrap(), None);
    assert!(
        timeout(Duration::from_millis(100), h.server.accept())
            .await
            .is_err()
    );
    assert!(h.supervisor.channel().is_none());
}

#[tokio::test]
async fn supervisor_assert_alive_pings_open_channel() {
    // Arrange
    let mut h = harness(3);
    h.supervisor.set_authenticated(true);
    let mut peer = timeout(WAIT, h.server.accept()).await.unwrap().unwrap();
    assert_eq!(next_event(&mut h.events).await, SyncEvent::Connected);

    let responder = tokio::spawn(async move {
        let ping = peer.recv_json().await.unwrap();
        peer.send(Frame::Pong);
        (ping, peer)
    });

    // Act
    let result = timeout(WAIT, h.supervisor.assert_alive()).await.unwrap();

    // Assert
    assert_eq!(result, Ok(()));
    let (ping, _peer) = responder.await.unwrap();
    assert_eq!(ping["type"], "ping");
    assert!(ping["timestamp"].is_i64());
}
