// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use url::Url;

use crate::channel::{Channel, ChannelListener};
use crate::error::SyncError;
use crate::ticket::TicketSource;
use crate::transport::Connector;

/// Time allowed for the socket handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds `{base}/ws?ticket={ticket}`.
///
/// # Errors
///
/// Returns [`SyncError::NoEndpointConfigured`] if `base` cannot carry a path.
pub fn channel_url(base: &Url, ticket: &str) -> Result<Url, SyncError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| SyncError::NoEndpointConfigured)?
        .pop_if_empty()
        .push("ws");
    url.query_pairs_mut().append_pair("ticket", ticket);
    Ok(url)
}

/// Opens push channels, one attempt per call.
pub struct ConnectionManager {
    push_base: Option<Url>,
    tickets: Arc<dyn TicketSource>,
    connector: Arc<dyn Connector>,
    handshake_timeout: Duration,
    next_id: AtomicU64,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("push_base", &self.push_base.as_ref().map(Url::as_str))
            .field("handshake_timeout", &self.handshake_timeout)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Creates a manager; `push_base` is `None` when no endpoint resolved.
    pub fn new(
        push_base: Option<Url>,
        tickets: Arc<dyn TicketSource>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            push_base,
            tickets,
            connector,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            next_id: AtomicU64::new(0),
        }
    }

    /// Opens a channel and attaches `listener` to it.
    ///
    /// Fetches a ticket, connects to the push URL built from it and waits
    /// for the handshake.
    ///
    /// # Errors
    ///
    /// - [`SyncError::NoEndpointConfigured`] before any request is made,
    /// - [`SyncError::TicketUnavailable`] from the ticket source,
    /// - [`SyncError::HandshakeTimeout`] if the handshake takes too long,
    /// - [`SyncError::ConnectionFailed`] if the transport fails first.
    #[tracing::instrument(skip_all)]
    pub async fn open(&self, listener: Arc<dyn ChannelListener>) -> Result<Arc<Channel>, SyncError> {
        let base = self
            .push_base
            .as_ref()
            .ok_or(SyncError::NoEndpointConfigured)?;

        let ticket = self.tickets.fetch_ticket().await?;
        let url = channel_url(base, &ticket.value)?;

        // Dropping the connect future on timeout tears the half-open socket down.
        let transport =
            match tokio::time::timeout(self.handshake_timeout, self.connector.connect(&url)).await {
                Ok(Ok(transport)) => transport,
                Ok(Err(SyncError::ConnectionFailed(reason))) => {
                    return Err(SyncError::ConnectionFailed(reason));
                }
                Ok(Err(e)) => return Err(SyncError::ConnectionFailed(e.to_string())),
                Err(_) => {
                    tracing::warn!(host = url.host_str(), "push handshake timed out");
                    return Err(SyncError::HandshakeTimeout);
                }
            };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(channel = id, host = url.host_str(), "push channel open");
        Ok(Channel::start(id, transport, listener))
    }
}
