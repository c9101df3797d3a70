// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! HTTP transport shared by every `CalDAV` exchange.

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response};

use crate::config::{AuthMethod, CalDavConfig};
use crate::error::CalDavError;

/// Longest response body kept in a [`CalDavError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Authenticated HTTP client rooted at the configured base URL.
#[derive(Debug)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    auth: AuthMethod,
}

impl HttpClient {
    /// Creates a new HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is empty or the HTTP client cannot
    /// be built.
    pub fn new(config: &CalDavConfig) -> Result<Self, CalDavError> {
        if config.base_url.trim().is_empty() {
            return Err(CalDavError::Config("base_url is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(&config.user_agent)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth: config.auth.clone(),
        })
    }

    /// Resolves an href against the base URL. Absolute URLs pass through.
    pub fn url(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            href.to_string()
        } else {
            format!("{}{href}", self.base_url)
        }
    }

    /// Starts an authenticated request for `href`.
    pub fn request(&self, method: Method, href: &str) -> RequestBuilder {
        let req = self.client.request(method, self.url(href));
        match &self.auth {
            AuthMethod::Basic { username, password } => req.basic_auth(username, Some(password)),
            AuthMethod::Bearer { token } => req.bearer_auth(token),
            AuthMethod::None => req,
        }
    }

    /// Sends a request, turning any non-2xx answer into [`CalDavError::Status`].
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent or the server answers
    /// with a failure status.
    pub async fn send(&self, req: RequestBuilder) -> Result<Response, CalDavError> {
        let resp = req.send().await?;
        let status = resp.status();
        tracing::trace!(url = %resp.url(), %status, "caldav response");
        if status.is_success() {
            return Ok(resp);
        }

        let mut body = resp.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut end = MAX_ERROR_BODY;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            body.truncate(end);
        }
        Err(CalDavError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
