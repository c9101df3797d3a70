// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::channel::Channel;
use crate::error::SyncError;
use crate::model::CalendarId;

/// Outbound control key announcing interest.
pub const REGISTER: &str = "register";

/// Outbound control key withdrawing interest.
pub const UNREGISTER: &str = "unregister";

/// Set difference between two subscription snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionDiff {
    /// In `current` but not in `previous`, in `current` order.
    pub to_register: Vec<CalendarId>,
    /// In `previous` but not in `current`, in `previous` order.
    pub to_unregister: Vec<CalendarId>,
}

impl SubscriptionDiff {
    /// Whether nothing has to be sent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_register.is_empty() && self.to_unregister.is_empty()
    }
}

/// Computes `current \ previous` and `previous \ current`, without duplicates.
#[must_use]
pub fn subscription_diff(previous: &[CalendarId], current: &[CalendarId]) -> SubscriptionDiff {
    SubscriptionDiff {
        to_register: difference(current, previous),
        to_unregister: difference(previous, current),
    }
}

fn difference(from: &[CalendarId], without: &[CalendarId]) -> Vec<CalendarId> {
    let without: HashSet<&CalendarId> = without.iter().collect();
    let mut seen = HashSet::new();
    from.iter()
        .filter(|id| !without.contains(id) && seen.insert(*id))
        .cloned()
        .collect()
}

fn control_message(key: &str, ids: &[CalendarId]) -> Value {
    let paths: Vec<Value> = ids.iter().map(|id| Value::String(id.wire_path())).collect();
    let mut message = Map::new();
    message.insert(key.to_string(), Value::Array(paths));
    Value::Object(message)
}

/// Sends the register and unregister messages for the diff, in that order.
///
/// Each message is only sent when its list is non-empty. The pair is
/// all-or-nothing from the caller's view: when register fails, unregister
/// is not attempted, and the caller keeps its previous snapshot.
///
/// # Errors
///
/// Returns [`SyncError::ChannelNotOpen`] if the channel is not open at send time.
pub fn reconcile_subscriptions(
    previous: &[CalendarId],
    current: &[CalendarId],
    channel: &Channel,
) -> Result<SubscriptionDiff, SyncError> {
    let diff = subscription_diff(previous, current);
    if diff.is_empty() {
        return Ok(diff);
    }
    if !channel.is_open() {
        return Err(SyncError::ChannelNotOpen);
    }

    if !diff.to_register.is_empty() {
        channel.send_json(&control_message(REGISTER, &diff.to_register))?;
    }
    if !diff.to_unregister.is_empty() {
        channel.send_json(&control_message(UNREGISTER, &diff.to_unregister))?;
    }

    tracing::debug!(
        registered = diff.to_register.len(),
        unregistered = diff.to_unregister.len(),
        "subscriptions reconciled"
    );
    Ok(diff)
}
