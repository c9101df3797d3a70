// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! Push payload routing tests.
//!
//! These tests drive a [`PushRouter`] with raw payloads and check which
//! calendars get reconciled and what reaches the replica.

use std::sync::Arc;
use std::time::Duration;

use calpush_core::{CalendarId, CalendarKind, MemoryReplica, PushRouter, Replica, SyncError};
use serde_json::{Value, json};

use crate::common::{ChangeLogReconciler, RecordingReconciler, calendar, march};

fn router() -> (PushRouter, Arc<RecordingReconciler>, Arc<MemoryReplica>) {
    let reconciler = Arc::new(RecordingReconciler::default());
    let replica = Arc::new(MemoryReplica::new());
    replica.insert(CalendarKind::Primary, calendar("alice", "work", "t1"));
    replica.insert(CalendarKind::Temp, calendar("bob", "home", "b1"));
    (
        PushRouter::new(reconciler.clone(), replica.clone()),
        reconciler,
        replica,
    )
}

#[tokio::test]
async fn route_reconciles_each_named_calendar_once() {
    // Arrange
    let (router, reconciler, _) = router();

    // Act - alice/work is named twice, once as a change and once as an ack
    let outcome = router
        .route(
            &json!({
                "/calendars/alice/work": {},
                "bob/home": {"changed": true},
                "registered": ["/calendars/alice/work"],
            }),
            march(),
        )
        .await;

    // Assert
    let mut calls = reconciler.calls();
    calls.sort();
    assert_eq!(
        calls,
        vec![
            (CalendarId::new("alice", "work"), CalendarKind::Primary),
            (CalendarId::new("bob", "home"), CalendarKind::Temp),
        ]
    );
    assert_eq!(outcome.calendars.len(), 2);
    assert_eq!(outcome.outcomes.len(), 2);
    assert!(outcome.ignored.is_empty());
}

#[tokio::test]
async fn route_prefers_temp_collection() {
    // Arrange
    let (router, reconciler, replica) = router();
    replica.insert(CalendarKind::Temp, calendar("alice", "work", "temp-1"));

    // Act
    let outcome = router
        .route(&json!({"/calendars/alice/work": {}}), march())
        .await;

    // Assert
    assert_eq!(
        reconciler.calls(),
        vec![(CalendarId::new("alice", "work"), CalendarKind::Temp)]
    );
    assert_eq!(outcome.outcomes[0].kind, CalendarKind::Temp);
    let temp = replica
        .calendar(CalendarKind::Temp, &CalendarId::new("alice", "work"))
        .unwrap();
    assert_eq!(temp.sync_token.as_deref(), Some("temp-1+1"));
    let primary = replica
        .calendar(CalendarKind::Primary, &CalendarId::new("alice", "work"))
        .unwrap();
    assert_eq!(primary.sync_token.as_deref(), Some("t1"));
}

#[tokio::test]
async fn route_skips_unregistered_acks() {
    // Arrange
    let (router, reconciler, _) = router();

    // Act
    let outcome = router
        .route(&json!({"unregistered": ["/calendars/alice/work"]}), march())
        .await;

    // Assert
    assert!(reconciler.calls().is_empty());
    assert!(outcome.calendars.is_empty());
    assert!(outcome.ignored.is_empty());
}

#[tokio::test]
async fn route_ignores_invalid_and_unknown_paths() {
    // Arrange
    let (router, reconciler, _) = router();

    // Act
    let outcome = router
        .route(
            &json!({
                "/invalid/path/x": {},
                "/calendars/carol/travel": {},
                "registered": [42],
            }),
            march(),
        )
        .await;

    // Assert
    assert!(reconciler.calls().is_empty());
    assert_eq!(outcome.ignored.len(), 3);
    assert!(
        outcome
            .ignored
            .contains(&SyncError::UnknownCalendarPath("/invalid/path/x".to_string()))
    );
    assert!(
        outcome
            .ignored
            .contains(&SyncError::UnresolvedCalendar("carol/travel".to_string()))
    );
    assert!(
        outcome
            .ignored
            .contains(&SyncError::UnknownCalendarPath("42".to_string()))
    );
}

#[tokio::test]
async fn route_tolerates_non_object_payloads() {
    let (router, reconciler, _) = router();

    for message in [Value::Null, json!("alice/work"), json!(7), json!(["alice/work"])] {
        let outcome = router.route(&message, march()).await;
        assert_eq!(outcome.ignored.len(), 1);
        assert!(matches!(
            outcome.ignored[0],
            SyncError::MalformedPushPayload(_)
        ));
    }
    assert!(reconciler.calls().is_empty());
}

#[tokio::test]
async fn route_applies_deltas_and_records_failures() {
    // Arrange
    let (router, reconciler, replica) = router();
    let bob = CalendarId::new("bob", "home");
    reconciler.fail_for(bob.clone());

    // Act
    let outcome = router
        .route(&json!({"alice/work": {}, "bob/home": {}}), march())
        .await;

    // Assert - one failing calendar does not affect the other
    let work = replica
        .calendar(CalendarKind::Primary, &CalendarId::new("alice", "work"))
        .unwrap();
    assert_eq!(work.sync_token.as_deref(), Some("t1+1"));

    let home = replica.calendar(CalendarKind::Temp, &bob).unwrap();
    assert_eq!(home.sync_token.as_deref(), Some("b1"));
    assert!(matches!(
        replica.failure(CalendarKind::Temp, &bob),
        Some(SyncError::DeltaFetchFailed {
            status: Some(500),
            ..
        })
    ));

    let failed: Vec<_> = outcome
        .outcomes
        .iter()
        .filter(|o| o.result.is_err())
        .map(|o| o.calendar.clone())
        .collect();
    assert_eq!(failed, vec![bob]);
}

#[tokio::test]
async fn route_after_cancel_all_reports_cancellation() {
    // Arrange
    let (router, reconciler, replica) = router();
    router.cancel_all();

    // Act
    let outcome = router.route(&json!({"alice/work": {}}), march()).await;

    // Assert
    assert_eq!(reconciler.calls().len(), 1);
    assert_eq!(outcome.outcomes[0].result, Err(SyncError::Cancelled));
    assert!(
        replica
            .failure(CalendarKind::Primary, &CalendarId::new("alice", "work"))
            .is_none()
    );
}

#[tokio::test(start_paused = true)]
async fn overlapping_routes_for_one_calendar_apply_every_change() {
    // Arrange
    let id = CalendarId::new("a", "c");
    let replica = Arc::new(MemoryReplica::new());
    replica.insert(CalendarKind::Primary, calendar("a", "c", "t1"));
    let server = Arc::new(ChangeLogReconciler::new(Duration::from_millis(10)));
    server.push_change("A");
    let router = PushRouter::new(server.clone(), replica.clone());

    // Act - the second notification arrives while the first fetch is in flight
    let first_payload = json!({"/calendars/a/c": {}});
    let (first, second) = tokio::join!(
        router.route(&first_payload, march()),
        async {
            tokio::time::sleep(Duration::from_millis(2)).await;
            server.push_change("B");
            router.route(&json!({"/calendars/a/c": {}}), march()).await
        }
    );

    // Assert - the second fetch starts from the token the first one stored
    assert!(first.outcomes[0].result.is_ok());
    assert!(second.outcomes[0].result.is_ok());
    assert_eq!(
        server.bases(),
        vec![Some("t1".to_string()), Some("t2".to_string())]
    );
    let stored = replica.calendar(CalendarKind::Primary, &id).unwrap();
    assert_eq!(stored.sync_token.as_deref(), Some("t3"));
    assert_eq!(
        stored.events.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["A", "B"]
    );
}
