// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

use calpush_caldav::CalDavError;

/// Errors raised by the synchronization engine.
///
/// The connection variants are fatal to one attempt only; the supervisor
/// recovers from them until the reconnect budget is spent. The three push
/// payload variants are never returned from `route`, they are collected as
/// diagnostics and logged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The ticket endpoint refused or could not be reached.
    #[error("push ticket unavailable: {0}")]
    TicketUnavailable(String),

    /// Neither a push URL nor an HTTP base URL is configured.
    #[error("no push endpoint configured")]
    NoEndpointConfigured,

    /// The channel did not complete its handshake in time.
    #[error("push channel handshake timed out")]
    HandshakeTimeout,

    /// The transport failed before the handshake completed.
    #[error("push channel connection failed: {0}")]
    ConnectionFailed(String),

    /// A message was about to be sent on a channel that is not open.
    #[error("push channel is not open")]
    ChannelNotOpen,

    /// The channel did not come back within the liveness timeout.
    #[error("push channel did not reopen in time")]
    ReconnectTimeout,

    /// The incremental fetch for one calendar failed.
    #[error("delta fetch failed: {message}")]
    DeltaFetchFailed {
        /// Human readable cause.
        message: String,
        /// HTTP status, when the server produced one.
        status: Option<u16>,
    },

    /// The server no longer accepts the calendar's sync token; the calendar
    /// needs a full resync.
    #[error("sync token rejected: {0}")]
    SyncTokenRejected(String),

    /// An inbound push payload was not a JSON object or had a bad control value.
    #[error("malformed push payload: {0}")]
    MalformedPushPayload(String),

    /// A push key did not look like a calendar path.
    #[error("unknown calendar path: {0}")]
    UnknownCalendarPath(String),

    /// A calendar path was valid but the replica does not hold it.
    #[error("calendar not in replica: {0}")]
    UnresolvedCalendar(String),

    /// The replica refused a delta, its token having moved since the fetch began.
    #[error("replica rejected the delta for {0}")]
    DeltaRejected(String),

    /// The reconciliation was abandoned by its caller.
    #[error("reconciliation cancelled")]
    Cancelled,

    /// Writing to an open channel failed.
    #[error("push channel send failed: {0}")]
    Transport(String),
}

impl SyncError {
    /// Whether the server rejected our credentials; retrying blindly will not help.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::DeltaFetchFailed {
                status: Some(401 | 403),
                ..
            }
        )
    }

    /// Whether the failure is worth retrying on the next notification or refresh.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::DeltaFetchFailed { status: None, .. } => true,
            Self::DeltaFetchFailed {
                status: Some(status),
                ..
            } => *status == 408 || *status == 429 || *status >= 500,
            Self::TicketUnavailable(_)
            | Self::DeltaRejected(_)
            | Self::HandshakeTimeout
            | Self::ConnectionFailed(_)
            | Self::ChannelNotOpen
            | Self::ReconnectTimeout
            | Self::Transport(_) => true,
            _ => false,
        }
    }

    pub(crate) fn delta_fetch(err: &CalDavError) -> Self {
        if err.is_invalid_sync_token() {
            return Self::SyncTokenRejected(err.to_string());
        }
        Self::DeltaFetchFailed {
            message: err.to_string(),
            status: err.status(),
        }
    }
}
