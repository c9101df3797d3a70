// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! Reconciliation against a mocked `CalDAV` server.

use calpush_caldav::{AuthMethod, CalDavClient, CalDavConfig};
use calpush_core::{CalendarKind, Reconciler, SyncError};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{calendar, march, ts};

const STANDUP: &str = "BEGIN:VCALENDAR\r
VERSION:2.0\r
PRODID:-//calpush//test//EN\r
BEGIN:VEVENT\r
UID:standup\r
DTSTART:20260302T090000Z\r
DTEND:20260302T093000Z\r
RRULE:FREQ=WEEKLY;COUNT=3\r
SUMMARY:Standup\r
END:VEVENT\r
END:VCALENDAR\r
";

fn reconciler_for(server: &MockServer) -> Reconciler<CalDavClient> {
    let config = CalDavConfig {
        base_url: server.uri(),
        auth: AuthMethod::Bearer {
            token: "secret".to_string(),
        },
        ..Default::default()
    };
    Reconciler::new(CalDavClient::new(config).expect("Failed to create client"))
}

fn multistatus(responses: &str, token: &str) -> ResponseTemplate {
    ResponseTemplate::new(207).set_body_raw(
        format!(
            r#"<?xml version="1.0" encoding="utf-8" ?>
<d:multistatus xmlns:d="DAV:">
{responses}
  <d:sync-token>{token}</d:sync-token>
</d:multistatus>"#
        ),
        "application/xml",
    )
}

fn changed(href: &str) -> String {
    format!(
        r#"  <d:response>
    <d:href>{href}</d:href>
    <d:propstat>
      <d:prop><d:getetag>"e-1"</d:getetag></d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>"#
    )
}

fn deleted(href: &str) -> String {
    format!(
        r"  <d:response>
    <d:href>{href}</d:href>
    <d:status>HTTP/1.1 404 Not Found</d:status>
  </d:response>"
    )
}

#[tokio::test]
async fn reconcile_expands_changed_series_and_collects_deletions() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("REPORT"))
        .and(path("/calendars/alice/work/"))
        .and(body_string_contains("token-41"))
        .respond_with(multistatus(
            &[
                deleted("/calendars/alice/work/gone.ics"),
                changed("/calendars/alice/work/standup.ics"),
            ]
            .join("\n"),
            "token-42",
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/calendars/alice/work/standup.ics"))
        .respond_with(ResponseTemplate::new(200).set_body_string(STANDUP))
        .expect(1)
        .mount(&server)
        .await;

    let work = calendar("alice", "work", "token-41");

    // Act
    let delta = reconciler_for(&server)
        .reconcile(
            &work,
            CalendarKind::Primary,
            march(),
            &CancellationToken::new(),
        )
        .await
        .expect("reconcile succeeds");

    // Assert
    assert_eq!(delta.calendar_id, work.id);
    assert_eq!(delta.sync_token.as_deref(), Some("token-42"));
    assert_eq!(delta.base_sync_token.as_deref(), Some("token-41"));
    assert_eq!(
        delta.deleted_events.iter().collect::<Vec<_>>(),
        vec!["gone"]
    );

    let uids: Vec<_> = delta
        .created_or_updated_events
        .iter()
        .map(|e| e.uid.as_str())
        .collect();
    assert_eq!(
        uids,
        vec![
            "standup/20260302T090000Z",
            "standup/20260309T090000Z",
            "standup/20260316T090000Z",
        ]
    );
    let first = &delta.created_or_updated_events[0];
    assert_eq!(first.start, ts("2026-03-02T09:00:00Z"));
    assert_eq!(first.end, ts("2026-03-02T09:30:00Z"));
    assert_eq!(first.summary.as_deref(), Some("Standup"));
    assert_eq!(first.base_uid(), "standup");
}

#[tokio::test]
async fn reconcile_treats_vanished_items_as_deleted() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("REPORT"))
        .and(path("/calendars/alice/work/"))
        .respond_with(multistatus(&changed("/calendars/alice/work/lunch.ics"), "t2"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/calendars/alice/work/lunch.ics"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    // Act
    let delta = reconciler_for(&server)
        .reconcile(
            &calendar("alice", "work", "t1"),
            CalendarKind::Temp,
            march(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    // Assert
    assert_eq!(delta.calendar_kind, CalendarKind::Temp);
    assert!(delta.deleted_events.contains("lunch"));
    assert!(delta.created_or_updated_events.is_empty());
}

#[tokio::test]
async fn reconcile_surfaces_auth_failures() {
    let server = MockServer::start().await;
    Mock::given(method("REPORT"))
        .and(path("/calendars/alice/work/"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&server)
        .await;

    let err = reconciler_for(&server)
        .reconcile(
            &calendar("alice", "work", "t1"),
            CalendarKind::Primary,
            march(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SyncError::DeltaFetchFailed {
            status: Some(403),
            ..
        }
    ));
    assert!(err.is_auth_failure());
}

#[tokio::test]
async fn reconcile_reports_expired_sync_token() {
    let server = MockServer::start().await;
    Mock::given(method("REPORT"))
        .and(path("/calendars/alice/work/"))
        .respond_with(ResponseTemplate::new(403).set_body_raw(
            r#"<?xml version="1.0" encoding="utf-8"?>
<d:error xmlns:d="DAV:"><d:valid-sync-token/></d:error>"#,
            "application/xml",
        ))
        .mount(&server)
        .await;

    let err = reconciler_for(&server)
        .reconcile(
            &calendar("alice", "work", "t1"),
            CalendarKind::Primary,
            march(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::SyncTokenRejected(_)));
    assert!(!err.is_auth_failure());
}

#[tokio::test]
async fn reconcile_without_token_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("REPORT"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let fresh = calpush_core::Calendar::new(calpush_core::CalendarId::new("alice", "work"));
    let delta = reconciler_for(&server)
        .reconcile(
            &fresh,
            CalendarKind::Primary,
            march(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(delta.is_empty());
}
