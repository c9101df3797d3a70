// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! `CalDAV` wire layer for the calpush engine.
//!
//! Covers the three HTTP exchanges the synchronization engine needs: push
//! ticket issuance, incremental `sync-collection` reports (RFC 6578) and
//! retrieval of single calendar objects.

#![warn(
    trivial_casts,
    trivial_numeric_casts,
    missing_copy_implementations,
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
// Allow certain clippy lints that are too restrictive for this crate
#![allow(clippy::similar_names, clippy::single_match_else)]

mod client;
mod config;
mod error;
mod http;
mod request;
mod response;
mod sync;
mod types;
mod xml;

pub use crate::client::CalDavClient;
pub use crate::config::{AuthMethod, CalDavConfig};
pub use crate::error::CalDavError;
pub use crate::request::SyncCollectionRequest;
pub use crate::response::{MultiStatusResponse, ResponseItem};
pub use crate::sync::{SyncItem, SyncPage, uid_from_href};
pub use crate::types::{ETag, Href, Ticket};
