// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::error::SyncError;
use crate::lock;
use crate::model::{Calendar, CalendarId, CalendarKind, DateWindow, SyncDelta};
use crate::reconciler::Reconcile;
use crate::replica::Replica;

/// Inbound key confirming registrations.
pub const REGISTERED_ACK: &str = "registered";

/// Inbound key confirming unregistrations.
pub const UNREGISTERED_ACK: &str = "unregistered";

/// Which acknowledgement a control item carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    /// The server now pushes changes of these calendars.
    Registered,
    /// The server stopped pushing changes of these calendars.
    Unregistered,
}

/// One decoded key of an inbound push payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushItem {
    /// A control acknowledgement.
    Control {
        /// Acknowledgement kind.
        kind: ControlKind,
        /// Calendars named by the acknowledgement.
        paths: Vec<CalendarId>,
    },
    /// A calendar changed on the server.
    CalendarChange(CalendarId),
    /// Something that could not be decoded; dropped after logging.
    Malformed(SyncError),
}

/// Decodes a push payload into typed items, in key order.
///
/// A payload that is not a JSON object yields a single
/// [`PushItem::Malformed`].
#[must_use]
pub fn decode_push(message: &Value) -> Vec<PushItem> {
    let Value::Object(map) = message else {
        return vec![PushItem::Malformed(SyncError::MalformedPushPayload(format!(
            "expected an object, got {}",
            kind_of(message)
        )))];
    };

    let mut items = Vec::with_capacity(map.len());
    for (key, value) in map {
        let kind = match key.as_str() {
            REGISTERED_ACK => ControlKind::Registered,
            UNREGISTERED_ACK => ControlKind::Unregistered,
            _ => {
                items.push(match CalendarId::from_wire_path(key) {
                    Some(id) => PushItem::CalendarChange(id),
                    None => PushItem::Malformed(SyncError::UnknownCalendarPath(key.clone())),
                });
                continue;
            }
        };

        let Some(entries) = value.as_array() else {
            items.push(PushItem::Malformed(SyncError::MalformedPushPayload(format!(
                "{key} must carry an array, got {}",
                kind_of(value)
            ))));
            continue;
        };

        let mut paths = Vec::with_capacity(entries.len());
        for entry in entries {
            match entry.as_str().and_then(CalendarId::from_wire_path) {
                Some(id) => paths.push(id),
                None => items.push(PushItem::Malformed(SyncError::UnknownCalendarPath(
                    entry.to_string(),
                ))),
            }
        }
        items.push(PushItem::Control { kind, paths });
    }
    items
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Result of reconciling one calendar.
#[derive(Debug, Clone)]
pub struct CalendarOutcome {
    /// The calendar.
    pub calendar: CalendarId,
    /// Collection it was resolved in.
    pub kind: CalendarKind,
    /// The delta the replica applied, or why none was.
    pub result: Result<SyncDelta, SyncError>,
}

/// What one push payload caused.
#[derive(Debug, Clone, Default)]
pub struct RouteOutcome {
    /// Calendars a reconciliation was run for, in payload order.
    pub calendars: Vec<CalendarId>,
    /// Per-calendar results, aligned with `calendars`.
    pub outcomes: Vec<CalendarOutcome>,
    /// Keys that were logged and dropped.
    pub ignored: Vec<SyncError>,
}

/// Turns push payloads into reconciliations and hands the deltas to the replica.
///
/// Reconciliations of one calendar run one after another, each fetching from
/// the token the previous one stored; different calendars run concurrently.
pub struct PushRouter {
    reconciler: Arc<dyn Reconcile>,
    replica: Arc<dyn Replica>,
    gates: Mutex<HashMap<CalendarId, Arc<AsyncMutex<()>>>>,
    in_flight: Mutex<HashMap<CalendarId, (u64, CancellationToken)>>,
    next_job: AtomicU64,
    root: CancellationToken,
}

impl fmt::Debug for PushRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushRouter")
            .field("in_flight", &lock(&self.in_flight).len())
            .finish_non_exhaustive()
    }
}

impl PushRouter {
    /// Creates a router over a reconciler and a replica.
    pub fn new(reconciler: Arc<dyn Reconcile>, replica: Arc<dyn Replica>) -> Self {
        Self {
            reconciler,
            replica,
            gates: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            next_job: AtomicU64::new(0),
            root: CancellationToken::new(),
        }
    }

    /// Looks a calendar up, temp collection first.
    #[must_use]
    pub fn resolve(&self, id: &CalendarId) -> Option<(Calendar, CalendarKind)> {
        [CalendarKind::Temp, CalendarKind::Primary]
            .into_iter()
            .find_map(|kind| self.replica.calendar(kind, id).map(|c| (c, kind)))
    }

    /// Routes one inbound payload.
    ///
    /// Change notifications and registration acknowledgements reconcile the
    /// named calendars, concurrently and at most once each. Unregistration
    /// acknowledgements are only logged. Nothing in the payload makes this fail.
    pub async fn route(&self, message: &Value, window: DateWindow) -> RouteOutcome {
        let mut outcome = RouteOutcome::default();
        let mut targets = Vec::new();
        let mut seen = HashSet::new();

        for item in decode_push(message) {
            match item {
                PushItem::Control {
                    kind: ControlKind::Registered,
                    paths,
                } => {
                    tracing::debug!(count = paths.len(), "registration acknowledged");
                    targets.extend(paths);
                }
                PushItem::Control {
                    kind: ControlKind::Unregistered,
                    paths,
                } => {
                    for id in &paths {
                        tracing::debug!(calendar = %id, "unregistration acknowledged");
                    }
                }
                PushItem::CalendarChange(id) => targets.push(id),
                PushItem::Malformed(err) => {
                    tracing::debug!(err = %err, "push item dropped");
                    outcome.ignored.push(err);
                }
            }
        }

        let mut jobs = Vec::new();
        for id in targets {
            if !seen.insert(id.clone()) {
                continue;
            }
            match self.resolve(&id) {
                Some((_, kind)) => {
                    outcome.calendars.push(id.clone());
                    jobs.push(self.reconcile_one(id, kind, window));
                }
                None => {
                    tracing::warn!(calendar = %id, "push for a calendar not in the replica");
                    outcome
                        .ignored
                        .push(SyncError::UnresolvedCalendar(id.to_string()));
                }
            }
        }

        outcome.outcomes = join_all(jobs).await;
        outcome
    }

    /// Cancels the running reconciliation of one calendar. Queued ones still run.
    pub fn cancel(&self, id: &CalendarId) -> bool {
        match lock(&self.in_flight).remove(id) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels every in-flight reconciliation, now and later.
    pub fn cancel_all(&self) {
        self.root.cancel();
        lock(&self.in_flight).clear();
    }

    async fn reconcile_one(&self, id: CalendarId, kind: CalendarKind, window: DateWindow) -> CalendarOutcome {
        let token = self.root.child_token();
        let gate = Arc::clone(lock(&self.gates).entry(id.clone()).or_default());
        let guard = tokio::select! {
            biased;
            guard = Arc::clone(&gate).lock_owned() => guard,
            () = token.cancelled() => {
                return CalendarOutcome {
                    calendar: id,
                    kind,
                    result: Err(SyncError::Cancelled),
                };
            }
        };

        // the previous reconciliation may have moved the token, or the calendar
        let (kind, result) = match self.resolve(&id) {
            Some((calendar, kind)) => (kind, self.reconcile_resolved(&calendar, kind, window, token).await),
            None => (kind, Err(SyncError::UnresolvedCalendar(id.to_string()))),
        };

        match &result {
            Ok(_) => {}
            Err(SyncError::Cancelled) => {
                tracing::debug!(calendar = %id, "reconciliation cancelled");
            }
            Err(SyncError::UnresolvedCalendar(_)) => {
                tracing::warn!(calendar = %id, "calendar left the replica before its turn");
            }
            Err(err) => {
                tracing::error!(calendar = %id, %kind, err = %err, "calendar reconciliation failed");
                self.replica.record_failure(kind, &id, err);
            }
        }

        drop(guard);
        {
            let mut gates = lock(&self.gates);
            if gates.get(&id).is_some_and(|g| Arc::ptr_eq(g, &gate) && Arc::strong_count(g) == 2) {
                gates.remove(&id);
            }
        }

        CalendarOutcome {
            calendar: id,
            kind,
            result,
        }
    }

    async fn reconcile_resolved(
        &self,
        calendar: &Calendar,
        kind: CalendarKind,
        window: DateWindow,
        token: CancellationToken,
    ) -> Result<SyncDelta, SyncError> {
        let id = &calendar.id;
        let job = self.next_job.fetch_add(1, Ordering::Relaxed);
        lock(&self.in_flight).insert(id.clone(), (job, token.clone()));

        let result = self.reconciler.reconcile(calendar, kind, window, &token).await;

        {
            let mut in_flight = lock(&self.in_flight);
            if in_flight.get(id).is_some_and(|(j, _)| *j == job) {
                in_flight.remove(id);
            }
        }

        let delta = result?;
        if self.replica.apply_delta(&delta) {
            Ok(delta)
        } else {
            Err(SyncError::DeltaRejected(id.to_string()))
        }
    }
}
