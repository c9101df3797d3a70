// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::error::SyncError;
use crate::lock;
use crate::model::{Calendar, CalendarId, CalendarKind, SyncDelta};

/// The local calendar store the engine reads from and hands deltas to.
pub trait Replica: Send + Sync {
    /// Snapshot of a calendar in one collection.
    fn calendar(&self, kind: CalendarKind, id: &CalendarId) -> Option<Calendar>;

    /// Applies the events and the new token of a delta together.
    ///
    /// Returns `false` if the delta was dropped, e.g. because it was fetched
    /// against a token the replica has moved past.
    fn apply_delta(&self, delta: &SyncDelta) -> bool;

    /// Marks one calendar as failed.
    fn record_failure(&self, kind: CalendarKind, id: &CalendarId, error: &SyncError);
}

#[derive(Debug, Default)]
struct Collections {
    primary: HashMap<CalendarId, Calendar>,
    temp: HashMap<CalendarId, Calendar>,
    failures: HashMap<(CalendarKind, CalendarId), SyncError>,
}

impl Collections {
    fn of(&mut self, kind: CalendarKind) -> &mut HashMap<CalendarId, Calendar> {
        match kind {
            CalendarKind::Primary => &mut self.primary,
            CalendarKind::Temp => &mut self.temp,
        }
    }
}

/// In-memory [`Replica`] with a primary and a temp collection.
#[derive(Debug, Default)]
pub struct MemoryReplica {
    inner: Mutex<Collections>,
}

impl MemoryReplica {
    /// Creates an empty replica.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a calendar.
    pub fn insert(&self, kind: CalendarKind, calendar: Calendar) {
        let mut inner = lock(&self.inner);
        inner.failures.remove(&(kind, calendar.id.clone()));
        inner.of(kind).insert(calendar.id.clone(), calendar);
    }

    /// Removes a calendar.
    pub fn remove(&self, kind: CalendarKind, id: &CalendarId) -> Option<Calendar> {
        let mut inner = lock(&self.inner);
        inner.failures.remove(&(kind, id.clone()));
        inner.of(kind).remove(id)
    }

    /// The last failure recorded for a calendar since its last applied delta.
    #[must_use]
    pub fn failure(&self, kind: CalendarKind, id: &CalendarId) -> Option<SyncError> {
        lock(&self.inner).failures.get(&(kind, id.clone())).cloned()
    }

    /// Identifiers held in one collection, sorted.
    #[must_use]
    pub fn ids(&self, kind: CalendarKind) -> Vec<CalendarId> {
        let mut ids: Vec<_> = lock(&self.inner).of(kind).keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Replica for MemoryReplica {
    fn calendar(&self, kind: CalendarKind, id: &CalendarId) -> Option<Calendar> {
        lock(&self.inner).of(kind).get(id).cloned()
    }

    fn apply_delta(&self, delta: &SyncDelta) -> bool {
        let mut inner = lock(&self.inner);
        let Some(calendar) = inner.of(delta.calendar_kind).get_mut(&delta.calendar_id) else {
            tracing::debug!(calendar = %delta.calendar_id, "delta for unknown calendar dropped");
            return false;
        };
        if calendar.sync_token != delta.base_sync_token {
            tracing::debug!(
                calendar = %delta.calendar_id,
                base = ?delta.base_sync_token,
                current = ?calendar.sync_token,
                "stale delta dropped"
            );
            return false;
        }

        calendar.events.retain(|_, event| {
            !delta.deleted_events.contains(&event.uid)
                && !delta.deleted_events.contains(event.base_uid())
        });

        // an upserted series replaces every stored event of that series
        let series: HashSet<&str> = delta
            .created_or_updated_events
            .iter()
            .map(|event| event.base_uid())
            .collect();
        calendar
            .events
            .retain(|_, event| !series.contains(event.base_uid()));
        for event in &delta.created_or_updated_events {
            calendar.events.insert(event.uid.clone(), event.clone());
        }

        if let Some(token) = &delta.sync_token {
            calendar.sync_token = Some(token.clone());
        }
        inner
            .failures
            .remove(&(delta.calendar_kind, delta.calendar_id.clone()));
        true
    }

    fn record_failure(&self, kind: CalendarKind, id: &CalendarId, error: &SyncError) {
        lock(&self.inner)
            .failures
            .insert((kind, id.clone()), error.clone());
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use jiff::Timestamp;

    use super::*;
    use crate::model::CalendarEvent;

    fn event(uid: &str, recurrence_id: Option<&str>) -> CalendarEvent {
        CalendarEvent {
            uid: uid.to_string(),
            calendar_id: CalendarId::new("a", "c"),
            start: Timestamp::UNIX_EPOCH,
            end: Timestamp::UNIX_EPOCH,
            all_day: false,
            sequence: 0,
            recurrence_id: recurrence_id.map(str::to_string),
            summary: None,
        }
    }

    fn seeded() -> MemoryReplica {
        let mut calendar = Calendar::new(CalendarId::new("a", "c")).with_sync_token("t1");
        for e in [
            event("single", None),
            event("series/20260101T000000Z", Some("20260101T000000Z")),
            event("series/20260102T000000Z", Some("20260102T000000Z")),
            event("gone", None),
        ] {
            calendar.events.insert(e.uid.clone(), e);
        }
        let replica = MemoryReplica::new();
        replica.insert(CalendarKind::Primary, calendar);
        replica
    }

    fn delta(base: Option<&str>, next: Option<&str>) -> SyncDelta {
        SyncDelta {
            calendar_id: CalendarId::new("a", "c"),
            calendar_kind: CalendarKind::Primary,
            deleted_events: BTreeSet::from(["gone".to_string()]),
            created_or_updated_events: vec![event("series/20260103T000000Z", Some("20260103T000000Z"))],
            sync_token: next.map(str::to_string),
            base_sync_token: base.map(str::to_string),
        }
    }

    #[test]
    fn applies_events_and_token_together() {
        let replica = seeded();
        assert!(replica.apply_delta(&delta(Some("t1"), Some("t2"))));

        let calendar = replica
            .calendar(CalendarKind::Primary, &CalendarId::new("a", "c"))
            .unwrap();
        assert_eq!(calendar.sync_token.as_deref(), Some("t2"));
        let uids: Vec<_> = calendar.events.keys().map(String::as_str).collect();
        assert_eq!(uids, vec!["series/20260103T000000Z", "single"]);
    }

    #[test]
    fn stale_delta_is_dropped() {
        let replica = seeded();
        assert!(!replica.apply_delta(&delta(Some("t0"), Some("t2"))));
        let calendar = replica
            .calendar(CalendarKind::Primary, &CalendarId::new("a", "c"))
            .unwrap();
        assert_eq!(calendar.sync_token.as_deref(), Some("t1"));
        assert_eq!(calendar.events.len(), 4);
    }

    #[test]
    fn delta_for_other_collection_is_dropped() {
        let replica = seeded();
        let mut temp = delta(Some("t1"), Some("t2"));
        temp.calendar_kind = CalendarKind::Temp;
        assert!(!replica.apply_delta(&temp));
    }

    #[test]
    fn failures_clear_on_success() {
        let replica = seeded();
        let id = CalendarId::new("a", "c");
        let err = SyncError::DeltaFetchFailed {
            message: "boom".to_string(),
            status: Some(500),
        };
        replica.record_failure(CalendarKind::Primary, &id, &err);
        assert_eq!(replica.failure(CalendarKind::Primary, &id), Some(err));
        assert!(replica.apply_delta(&delta(Some("t1"), Some("t2"))));
        assert_eq!(replica.failure(CalendarKind::Primary, &id), None);
    }
}
