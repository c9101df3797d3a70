// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! Response parsers for WebDAV/CalDAV operations.

use quick_xml::Reader;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::Event;

use crate::error::CalDavError;
use crate::sync::{SyncItem, SyncPage};
use crate::types::{ETag, Href};

/// `WebDAV` multistatus response.
#[derive(Debug, Clone, Default)]
pub struct MultiStatusResponse {
    /// The response items, in document order.
    pub responses: Vec<ResponseItem>,
    /// Top-level `sync-token`, present on `sync-collection` answers.
    pub sync_token: Option<String>,
}

/// Individual response in multistatus.
#[derive(Debug, Clone)]
pub struct ResponseItem {
    /// Resource the response is about.
    pub href: Href,
    /// Property groups with their status lines.
    pub prop_stats: Vec<PropStat>,
    /// Response-level status line, used by servers to flag removed members.
    pub status: Option<String>,
}

/// Property stat with status and value.
#[derive(Debug, Clone)]
pub struct PropStat {
    /// Properties reported under this status.
    pub props: Properties,
    /// Status line, e.g. `HTTP/1.1 200 OK`.
    pub status: String,
}

/// Properties the engine reads.
#[derive(Debug, Clone, Default)]
pub struct Properties {
    /// `getetag` value.
    pub get_etag: Option<ETag>,
}

impl ResponseItem {
    /// Whether the server reports this member as gone.
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.status.as_deref().is_some_and(|s| status_code(s) == Some(404))
    }

    /// `ETag` from the first successful propstat.
    #[must_use]
    pub fn etag(&self) -> Option<&ETag> {
        self.prop_stats
            .iter()
            .find(|p| status_code(&p.status) == Some(200))
            .and_then(|p| p.props.get_etag.as_ref())
    }
}

impl MultiStatusResponse {
    /// Parses multistatus response from XML.
    ///
    /// # Errors
    ///
    /// Returns an error if XML parsing fails.
    pub fn from_xml(xml: &str) -> Result<Self, CalDavError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().check_end_names = true;

        let mut responses = Vec::new();
        let mut sync_token = None;
        let mut current_response: Option<ResponseItem> = None;
        let mut current_props = Properties::default();
        let mut in_prop = false;
        let mut in_propstat = false;

        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::End(ref e) if e.name().local_name().into_inner() == b"multistatus" => break,
                Event::Eof => break,

                Event::Start(ref e) => match e.name().local_name().into_inner() {
                    b"response" => {
                        current_response = Some(ResponseItem {
                            href: Href::new(String::new()),
                            prop_stats: Vec::new(),
                            status: None,
                        });
                    }
                    b"sync-token" if current_response.is_none() => {
                        sync_token = Some(read_text(&mut reader, &mut buf)?);
                    }
                    b"href" => {
                        let href = read_text(&mut reader, &mut buf)?;
                        if let Some(ref mut resp) = current_response {
                            resp.href = Href::new(href);
                        }
                    }
                    b"propstat" if current_response.is_some() => {
                        in_propstat = true;
                        current_props = Properties::default();
                    }
                    b"prop" if in_propstat => in_prop = true,
                    b"getetag" if in_prop => {
                        current_props.get_etag = Some(ETag::new(read_text(&mut reader, &mut buf)?));
                    }
                    b"status" => {
                        let status = read_text(&mut reader, &mut buf)?;
                        if let Some(ref mut resp) = current_response {
                            if in_propstat {
                                resp.prop_stats.push(PropStat {
                                    props: std::mem::take(&mut current_props),
                                    status,
                                });
                            } else {
                                resp.status = Some(status);
                            }
                        }
                    }
                    _ => {}
                },
                Event::End(ref e) => match e.name().local_name().into_inner() {
                    b"response" => {
                        if let Some(resp) = current_response.take() {
                            responses.push(resp);
                        }
                    }
                    b"propstat" => in_propstat = false,
                    b"prop" => in_prop = false,
                    _ => {}
                },
                _ => {}
            }
            buf.clear();
        }

        Ok(Self {
            responses,
            sync_token,
        })
    }

    /// Converts a `sync-collection` answer into a page of changes.
    ///
    /// Members reported with a `404` status become deletion markers, members
    /// with a successful propstat become retrievable references. The
    /// collection itself (href equal to `collection`) is skipped.
    #[must_use]
    pub fn into_sync_page(self, collection: &str) -> SyncPage {
        let collection = collection.trim_end_matches('/');
        let mut items = Vec::with_capacity(self.responses.len());
        for response in self.responses {
            if response.href.trim_end_matches('/') == collection {
                continue;
            }

            if response.is_removed() {
                items.push(SyncItem::Deleted { href: response.href });
            } else if let Some(etag) = response.etag().cloned() {
                items.push(SyncItem::Changed {
                    href: response.href,
                    etag: Some(etag),
                });
            } else if response.prop_stats.iter().any(|p| status_code(&p.status) == Some(200)) {
                items.push(SyncItem::Changed {
                    href: response.href,
                    etag: None,
                });
            } else {
                tracing::debug!(href = %response.href, "skipping sync member without usable status");
            }
        }

        SyncPage {
            sync_token: self.sync_token,
            items,
        }
    }
}

/// Reads the text of the element just opened, up to and including its end tag.
///
/// Entity and character references arrive as separate events and are
/// resolved in place.
fn read_text(reader: &mut Reader<&[u8]>, buf: &mut Vec<u8>) -> Result<String, CalDavError> {
    let mut text = String::new();
    loop {
        match reader.read_event_into(buf)? {
            Event::Text(e) => text.push_str(&e.decode().map_err(quick_xml::Error::from)?),
            Event::CData(e) => text.push_str(&e.decode().map_err(quick_xml::Error::from)?),
            Event::GeneralRef(e) => match e.resolve_char_ref()? {
                Some(ch) => text.push(ch),
                None => {
                    let name = e.decode().map_err(quick_xml::Error::from)?;
                    let value = resolve_predefined_entity(&name)
                        .ok_or_else(|| CalDavError::Xml(format!("unknown entity &{name};")))?;
                    text.push_str(value);
                }
            },
            Event::End(_) | Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    buf.clear();
    Ok(text.trim().to_string())
}

/// Extracts the numeric code from a status line such as `HTTP/1.1 404 Not Found`.
fn status_code(line: &str) -> Option<u16> {
    line.split_whitespace().nth(1)?.parse().ok()
}
