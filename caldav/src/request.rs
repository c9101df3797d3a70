// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! Request builders for `CalDAV` operations.

use std::io::Cursor;

use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};

use crate::error::CalDavError;
use crate::xml::ns;

/// `sync-collection` REPORT builder (RFC 6578).
#[derive(Debug, Clone)]
pub struct SyncCollectionRequest {
    sync_token: String,
}

impl SyncCollectionRequest {
    /// Creates a request asking for everything changed since `sync_token`.
    #[must_use]
    pub fn new(sync_token: impl Into<String>) -> Self {
        Self {
            sync_token: sync_token.into(),
        }
    }

    /// Builds the XML body for the REPORT request.
    ///
    /// # Errors
    ///
    /// Returns an error if XML building fails.
    pub fn build(&self) -> Result<String, CalDavError> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

        // <D:sync-collection xmlns:D="DAV:">
        let mut root = BytesStart::new("D:sync-collection");
        root.push_attribute(("xmlns:D", ns::DAV));
        writer.write_event(Event::Start(root))?;

        // <D:sync-token>
        writer.write_event(Event::Start(BytesStart::new("D:sync-token")))?;
        writer.write_event(Event::Text(BytesText::new(&self.sync_token)))?;
        writer.write_event(Event::End(BytesEnd::new("D:sync-token")))?;

        // <D:sync-level>1</D:sync-level>
        writer.write_event(Event::Start(BytesStart::new("D:sync-level")))?;
        writer.write_event(Event::Text(BytesText::new("1")))?;
        writer.write_event(Event::End(BytesEnd::new("D:sync-level")))?;

        // <D:prop><D:getetag/></D:prop>
        writer.write_event(Event::Start(BytesStart::new("D:prop")))?;
        writer.write_event(Event::Empty(BytesStart::new("D:getetag")))?;
        writer.write_event(Event::End(BytesEnd::new("D:prop")))?;

        // </D:sync-collection>
        writer.write_event(Event::End(BytesEnd::new("D:sync-collection")))?;

        let bytes = writer.into_inner().into_inner();
        String::from_utf8(bytes).map_err(|e| CalDavError::Xml(format!("UTF-8 error: {e}")))
    }
}
