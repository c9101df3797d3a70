// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! Test fixtures and fakes.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use calpush_caldav::Ticket;
use calpush_core::transport::memory::{self, MemoryPeer, MemoryServer};
use calpush_core::{
    Calendar, CalendarEvent, CalendarId, CalendarKind, Channel, ChannelListener,
    ConnectionManager, DateWindow, Reconcile, SyncDelta, SyncError, TicketSource,
};
use jiff::Timestamp;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Bounds every wait in the tests.
pub const WAIT: Duration = Duration::from_secs(5);

/// Parses an RFC 3339 instant.
pub fn ts(s: &str) -> Timestamp {
    s.parse().expect("valid timestamp")
}

/// A window covering March 2026.
pub fn march() -> DateWindow {
    DateWindow::new(ts("2026-03-01T00:00:00Z"), ts("2026-04-01T00:00:00Z"))
}

pub fn calendar(owner: &str, name: &str, token: &str) -> Calendar {
    Calendar::new(CalendarId::new(owner, name)).with_sync_token(token)
}

/// Ticket source returning the same ticket, or failing.
#[derive(Debug, Default)]
pub struct StaticTickets {
    calls: AtomicUsize,
    fail: bool,
}

impl StaticTickets {
    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TicketSource for StaticTickets {
    async fn fetch_ticket(&self) -> Result<Ticket, SyncError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            return Err(SyncError::TicketUnavailable("401 Unauthorized".to_string()));
        }
        Ok(Ticket {
            value: format!("tkt-{n}"),
            client_address: "127.0.0.1".to_string(),
            generated_on: ts("2026-03-01T00:00:00Z"),
            valid_until: ts("2026-03-01T00:00:30Z"),
            username: "alice".to_string(),
        })
    }
}

/// Reconciler that records its calls and bumps the token.
#[derive(Debug, Default)]
pub struct RecordingReconciler {
    calls: Mutex<Vec<(CalendarId, CalendarKind)>>,
    failing: Mutex<HashSet<CalendarId>>,
}

impl RecordingReconciler {
    pub fn calls(&self) -> Vec<(CalendarId, CalendarKind)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_for(&self, id: CalendarId) {
        self.failing.lock().unwrap().insert(id);
    }
}

#[async_trait]
impl Reconcile for RecordingReconciler {
    async fn reconcile(
        &self,
        calendar: &Calendar,
        kind: CalendarKind,
        _window: DateWindow,
        cancel: &CancellationToken,
    ) -> Result<SyncDelta, SyncError> {
        self.calls.lock().unwrap().push((calendar.id.clone(), kind));
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        if self.failing.lock().unwrap().contains(&calendar.id) {
            return Err(SyncError::DeltaFetchFailed {
                message: "server error".to_string(),
                status: Some(500),
            });
        }

        let mut delta = SyncDelta::empty(calendar, kind);
        delta.sync_token = Some(format!(
            "{}+1",
            calendar.sync_token.as_deref().unwrap_or("none")
        ));
        Ok(delta)
    }
}

/// Reconciler over a server side change log.
///
/// Token `tN` has seen the first `N - 1` changes; every fetch returns the
/// changes after its token and takes `delay`.
#[derive(Debug)]
pub struct ChangeLogReconciler {
    log: Mutex<Vec<String>>,
    bases: Mutex<Vec<Option<String>>>,
    delay: Duration,
}

impl ChangeLogReconciler {
    pub fn new(delay: Duration) -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            bases: Mutex::new(Vec::new()),
            delay,
        }
    }

    /// Records a change to the event `uid` on the server.
    pub fn push_change(&self, uid: &str) {
        self.log.lock().unwrap().push(uid.to_string());
    }

    /// Tokens the fetches were issued with, in call order.
    pub fn bases(&self) -> Vec<Option<String>> {
        self.bases.lock().unwrap().clone()
    }
}

#[async_trait]
impl Reconcile for ChangeLogReconciler {
    async fn reconcile(
        &self,
        calendar: &Calendar,
        kind: CalendarKind,
        _window: DateWindow,
        _cancel: &CancellationToken,
    ) -> Result<SyncDelta, SyncError> {
        self.bases.lock().unwrap().push(calendar.sync_token.clone());
        let seen = calendar
            .sync_token
            .as_deref()
            .and_then(|token| token.strip_prefix('t'))
            .and_then(|n| n.parse::<usize>().ok())
            .map_or(0, |n| n.saturating_sub(1));
        let log = self.log.lock().unwrap().clone();
        tokio::time::sleep(self.delay).await;

        let mut delta = SyncDelta::empty(calendar, kind);
        delta.created_or_updated_events = log
            .iter()
            .skip(seen)
            .map(|uid| event(&calendar.id, uid))
            .collect();
        delta.sync_token = Some(format!("t{}", log.len() + 1));
        Ok(delta)
    }
}

/// A one hour event on 2 March 2026.
pub fn event(calendar_id: &CalendarId, uid: &str) -> CalendarEvent {
    CalendarEvent {
        uid: uid.to_string(),
        calendar_id: calendar_id.clone(),
        start: ts("2026-03-02T09:00:00Z"),
        end: ts("2026-03-02T10:00:00Z"),
        all_day: false,
        sequence: 0,
        recurrence_id: None,
        summary: None,
    }
}

/// Listener that records everything a channel reports.
#[derive(Debug, Default)]
pub struct RecordingListener {
    pub messages: Mutex<Vec<Value>>,
    pub closed: AtomicUsize,
}

impl ChannelListener for RecordingListener {
    fn on_message(&self, _channel_id: u64, message: Value) {
        self.messages.lock().unwrap().push(message);
    }

    fn on_close(&self, _channel_id: u64) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_error(&self, _channel_id: u64, _error: &SyncError) {}
}

pub fn push_base() -> Url {
    Url::parse("wss://push.example.com").expect("valid url")
}

/// A connection manager over the memory transport.
pub fn memory_manager(tickets: Arc<StaticTickets>) -> (ConnectionManager, MemoryServer) {
    let (connector, server) = memory::pair();
    (
        ConnectionManager::new(Some(push_base()), tickets, Arc::new(connector)),
        server,
    )
}

/// An open channel and the server end it talks to.
pub async fn open_channel() -> (Arc<Channel>, MemoryPeer) {
    let (manager, mut server) = memory_manager(Arc::new(StaticTickets::default()));
    let channel = manager
        .open(Arc::new(RecordingListener::default()))
        .await
        .expect("channel opens");
    let peer = server.accept().await.expect("peer accepted");
    (channel, peer)
}
