// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use jiff::Timestamp;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Prefix of calendar paths on the push channel.
pub const WIRE_PREFIX: &str = "/calendars/";

/// Composite `owner/calendar` key of a calendar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CalendarId {
    owner: String,
    calendar: String,
}

impl CalendarId {
    /// Creates an identifier from its two segments.
    pub fn new(owner: impl Into<String>, calendar: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            calendar: calendar.into(),
        }
    }

    /// Owner segment.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Calendar segment.
    #[must_use]
    pub fn calendar(&self) -> &str {
        &self.calendar
    }

    /// Path used on the push channel, `/calendars/{owner}/{calendar}`.
    #[must_use]
    pub fn wire_path(&self) -> String {
        format!("{WIRE_PREFIX}{}/{}", self.owner, self.calendar)
    }

    /// Strictly matches a push key against `/calendars/{owner}/{calendar}`.
    ///
    /// The bare `{owner}/{calendar}` form is accepted too. Segments must be
    /// non-empty and slash free.
    #[must_use]
    pub fn from_wire_path(path: &str) -> Option<Self> {
        const RE: &str = r"^(?:/calendars/)?([^/\s]+)/([^/\s]+)$";
        static REGEX: OnceLock<Regex> = OnceLock::new();
        let re = REGEX.get_or_init(|| Regex::new(RE).unwrap());

        let caps = re.captures(path)?;
        Some(Self::new(caps.get(1)?.as_str(), caps.get(2)?.as_str()))
    }
}

impl fmt::Display for CalendarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.calendar)
    }
}

impl FromStr for CalendarId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_wire_path(s).ok_or_else(|| SyncError::UnknownCalendarPath(s.to_string()))
    }
}

impl TryFrom<String> for CalendarId {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CalendarId> for String {
    fn from(id: CalendarId) -> Self {
        id.to_string()
    }
}

/// Which replica collection a calendar lives in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalendarKind {
    /// The user's persisted subscriptions.
    #[default]
    Primary,
    /// Ephemeral previews, e.g. another user's availability.
    Temp,
}

impl fmt::Display for CalendarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Temp => f.write_str("temp"),
        }
    }
}

/// Replica entity of one calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calendar {
    /// Identifier of the calendar.
    pub id: CalendarId,
    /// Incremental baseline; `None` until a full fetch happened elsewhere.
    pub sync_token: Option<String>,
    /// Events keyed by uid.
    #[serde(default)]
    pub events: BTreeMap<String, CalendarEvent>,
}

impl Calendar {
    /// Creates an empty calendar without a sync baseline.
    #[must_use]
    pub fn new(id: CalendarId) -> Self {
        Self {
            id,
            sync_token: None,
            events: BTreeMap::new(),
        }
    }

    /// Sets the sync baseline.
    #[must_use]
    pub fn with_sync_token(mut self, token: impl Into<String>) -> Self {
        self.sync_token = Some(token.into());
        self
    }
}

/// One concrete event, either a standalone event or one occurrence of a series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    /// `base` for standalone events, `base/occurrenceKey` for occurrences.
    pub uid: String,
    /// Calendar the event belongs to.
    pub calendar_id: CalendarId,
    /// Start instant.
    pub start: Timestamp,
    /// End instant, never before `start`.
    pub end: Timestamp,
    /// Whether the event spans whole days.
    #[serde(default)]
    pub all_day: bool,
    /// iCalendar `SEQUENCE`.
    #[serde(default)]
    pub sequence: u32,
    /// Occurrence key for series members.
    #[serde(default)]
    pub recurrence_id: Option<String>,
    /// iCalendar `SUMMARY`.
    #[serde(default)]
    pub summary: Option<String>,
}

impl CalendarEvent {
    /// Uid of the series this event belongs to, or its own uid.
    #[must_use]
    pub fn base_uid(&self) -> &str {
        match &self.recurrence_id {
            Some(key) => self
                .uid
                .strip_suffix(key.as_str())
                .and_then(|s| s.strip_suffix('/'))
                .unwrap_or(&self.uid),
            None => &self.uid,
        }
    }
}

/// Half-open display window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    /// Inclusive start.
    pub start: Timestamp,
    /// Exclusive end.
    pub end: Timestamp,
}

impl DateWindow {
    /// Creates a window; the bounds are swapped if given in reverse.
    #[must_use]
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        if end < start {
            Self {
                start: end,
                end: start,
            }
        } else {
            Self { start, end }
        }
    }

    /// Whether `[start, end)` intersects the window. Zero-length events
    /// count when their instant lies inside the window.
    #[must_use]
    pub fn overlaps(&self, start: Timestamp, end: Timestamp) -> bool {
        if start == end {
            return self.start <= start && start < self.end;
        }
        start < self.end && end > self.start
    }
}

/// Consolidated result of one incremental fetch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncDelta {
    /// Calendar the delta applies to.
    pub calendar_id: CalendarId,
    /// Collection the calendar was resolved in.
    pub calendar_kind: CalendarKind,
    /// Uids to remove.
    pub deleted_events: BTreeSet<String>,
    /// Events to insert or replace, in server order.
    pub created_or_updated_events: Vec<CalendarEvent>,
    /// Token to adopt together with the event changes.
    pub sync_token: Option<String>,
    /// Token the fetch was issued with; lets a replica drop stale results.
    pub base_sync_token: Option<String>,
}

impl SyncDelta {
    /// A delta that changes nothing.
    #[must_use]
    pub fn empty(calendar: &Calendar, kind: CalendarKind) -> Self {
        Self {
            calendar_id: calendar.id.clone(),
            calendar_kind: kind,
            deleted_events: BTreeSet::new(),
            created_or_updated_events: Vec::new(),
            sync_token: None,
            base_sync_token: calendar.sync_token.clone(),
        }
    }

    /// Whether applying the delta would change nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deleted_events.is_empty()
            && self.created_or_updated_events.is_empty()
            && self.sync_token.is_none()
    }
}
