// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! Calendar synchronization engine.
//!
//! Keeps a local calendar replica live from server push: one authenticated
//! push channel with automatic recovery, subscription bookkeeping, liveness
//! probing and incremental reconciliation over `CalDAV` sync tokens.

#![warn(
    trivial_casts,
    trivial_numeric_casts,
    missing_debug_implementations,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    clippy::dbg_macro,
    clippy::indexing_slicing,
    clippy::pedantic
)]
#![allow(clippy::module_name_repetitions, clippy::missing_panics_doc)]

mod channel;
mod config;
mod connection;
mod error;
mod expand;
mod ics;
mod liveness;
mod model;
mod reconciler;
mod reconnect;
mod registrar;
mod replica;
mod router;
mod supervisor;
mod ticket;
pub mod transport;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use crate::channel::{Channel, ChannelListener, ReadyState};
pub use crate::config::{PingStyle, SyncConfig};
pub use crate::connection::{ConnectionManager, HANDSHAKE_TIMEOUT, channel_url};
pub use crate::error::SyncError;
pub use crate::expand::expand_object;
pub use crate::ics::{
    DateOrTime, Frequency, IcsError, RecurrenceRule, VEvent, WeekdayNum, parse_events,
};
pub use crate::liveness::{Link, LivenessMonitor, ping_payload};
pub use crate::model::{
    Calendar, CalendarEvent, CalendarId, CalendarKind, DateWindow, SyncDelta, WIRE_PREFIX,
};
pub use crate::reconciler::{DeltaSource, Reconcile, Reconciler};
pub use crate::reconnect::{
    AttemptResetPolicy, Backoff, ReconnectController, ScheduleOutcome, Trigger,
    exponential_backoff,
};
pub use crate::registrar::{
    REGISTER, SubscriptionDiff, UNREGISTER, reconcile_subscriptions, subscription_diff,
};
pub use crate::replica::{MemoryReplica, Replica};
pub use crate::router::{
    CalendarOutcome, ControlKind, PushItem, PushRouter, REGISTERED_ACK, RouteOutcome,
    UNREGISTERED_ACK, decode_push,
};
pub use crate::supervisor::{ConnectionSupervisor, SyncEvent};
pub use crate::ticket::TicketSource;

/// Locks a mutex, recovering the data of a poisoned one.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
