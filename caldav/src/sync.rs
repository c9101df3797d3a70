// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! Incremental synchronization types for `CalDAV`.

use crate::types::{ETag, Href};

/// One member reported by a `sync-collection` REPORT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncItem {
    /// The member was removed from the collection.
    Deleted {
        /// Href of the removed member.
        href: Href,
    },
    /// The member was created or updated and must be fetched again.
    Changed {
        /// Href of the member.
        href: Href,
        /// New entity tag, if the server reported one.
        etag: Option<ETag>,
    },
}

impl SyncItem {
    /// Href of the member this item is about.
    #[must_use]
    pub fn href(&self) -> &Href {
        match self {
            Self::Deleted { href } | Self::Changed { href, .. } => href,
        }
    }
}

/// Changes since a sync token, in server order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPage {
    /// Token to present on the next incremental fetch.
    pub sync_token: Option<String>,
    /// Changed and removed members.
    pub items: Vec<SyncItem>,
}

/// Derives the event uid a member href stands for.
///
/// The uid is the last path segment with a trailing `.ics` removed, so
/// `/calendars/a/cal/event-1.ics` maps to `event-1`.
#[must_use]
pub fn uid_from_href(href: &str) -> &str {
    let name = href.trim_end_matches('/').rsplit('/').next().unwrap_or(href);
    name.strip_suffix(".ics").unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_from_href_strips_path_and_extension() {
        assert_eq!(uid_from_href("/calendars/a/cal/event-1.ics"), "event-1");
        assert_eq!(uid_from_href("event-2.ics"), "event-2");
        assert_eq!(uid_from_href("/calendars/a/cal/no-ext"), "no-ext");
    }
}
