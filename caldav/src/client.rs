// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! `CalDAV` client for the synchronization engine.

use std::sync::Arc;

use reqwest::Method;

use crate::config::CalDavConfig;
use crate::error::CalDavError;
use crate::http::HttpClient;
use crate::request::SyncCollectionRequest;
use crate::response::MultiStatusResponse;
use crate::sync::SyncPage;
use crate::types::{ETag, Href, Ticket};

/// `CalDAV` client for ticket issuance, incremental sync and object retrieval.
///
/// # Example
///
/// ```ignore
/// use calpush_caldav::{AuthMethod, CalDavClient, CalDavConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = CalDavConfig {
///     base_url: "https://dav.example.com".to_string(),
///     auth: AuthMethod::Bearer { token: "...".to_string() },
///     ..Default::default()
/// };
///
/// let client = CalDavClient::new(config)?;
/// let collection = CalDavClient::collection_href("alice", "work");
/// let page = client.sync_collection(&collection, "http://sabre.io/ns/sync/41").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CalDavClient {
    http: Arc<HttpClient>,
    config: CalDavConfig,
}

impl CalDavClient {
    /// Creates a new `CalDAV` client.
    ///
    /// # Errors
    ///
    /// Returns an error if HTTP client initialization fails.
    pub fn new(config: CalDavConfig) -> Result<Self, CalDavError> {
        let http = HttpClient::new(&config)?;
        Ok(Self {
            http: Arc::new(http),
            config,
        })
    }

    /// Returns the configuration this client was built with.
    #[must_use]
    pub fn config(&self) -> &CalDavConfig {
        &self.config
    }

    /// Href of the calendar collection `owner/calendar`.
    #[must_use]
    pub fn collection_href(owner: &str, calendar: &str) -> Href {
        Href::new(format!("/calendars/{owner}/{calendar}/"))
    }

    /// Requests a fresh push ticket.
    ///
    /// # Errors
    ///
    /// Returns an error if the server refuses or cannot be reached.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_ticket(&self) -> Result<Ticket, CalDavError> {
        let req = self.http.request(Method::POST, &self.config.ticket_path);
        let resp = self.http.send(req).await?;

        let ticket = resp.json::<Ticket>().await.map_err(|e| {
            CalDavError::InvalidResponse(format!("Malformed ticket payload: {e}"))
        })?;
        tracing::debug!(username = %ticket.username, valid_until = %ticket.valid_until, "ticket issued");
        Ok(ticket)
    }

    /// Fetches everything changed in a collection since `sync_token`.
    ///
    /// # Errors
    ///
    /// Returns an error if the REPORT fails or the answer cannot be parsed.
    #[tracing::instrument(skip(self))]
    pub async fn sync_collection(
        &self,
        collection: &Href,
        sync_token: &str,
    ) -> Result<SyncPage, CalDavError> {
        let xml_body = SyncCollectionRequest::new(sync_token).build()?;
        let report = Method::from_bytes(b"REPORT")
            .map_err(|e| CalDavError::Http(format!("Invalid method: {e}")))?;

        let req = self
            .http
            .request(report, collection.as_str())
            .header("Content-Type", "application/xml; charset=utf-8")
            .header("Depth", "1")
            .body(xml_body);
        let resp = self.http.send(req).await?;

        let xml = resp.text().await?;
        let page = MultiStatusResponse::from_xml(&xml)?.into_sync_page(collection.as_str());
        tracing::debug!(items = page.items.len(), "sync-collection answered");
        Ok(page)
    }

    /// Retrieves the iCalendar text of a single calendar object.
    ///
    /// # Errors
    ///
    /// Returns [`CalDavError::NotFound`] if the object is gone, or another
    /// error if the request fails.
    pub async fn get_object(&self, href: &Href) -> Result<(Option<ETag>, String), CalDavError> {
        let req = self.http.request(Method::GET, href.as_str());
        let resp = match self.http.send(req).await {
            Ok(resp) => resp,
            Err(CalDavError::Status { status: 404, .. }) => {
                return Err(CalDavError::NotFound(href.clone()));
            }
            Err(e) => return Err(e),
        };

        let etag = resp
            .headers()
            .get("ETag")
            .and_then(|v| v.to_str().ok())
            .map(ETag::from);
        let body = resp.text().await?;
        Ok((etag, body))
    }
}
