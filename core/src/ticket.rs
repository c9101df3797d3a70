// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use calpush_caldav::{CalDavClient, Ticket};

use crate::error::SyncError;

/// Issues single-use push channel credentials.
///
/// One call is one outbound request; retries belong to the reconnect logic.
#[async_trait]
pub trait TicketSource: Send + Sync {
    /// Obtains a fresh ticket.
    async fn fetch_ticket(&self) -> Result<Ticket, SyncError>;
}

#[async_trait]
impl TicketSource for CalDavClient {
    async fn fetch_ticket(&self) -> Result<Ticket, SyncError> {
        CalDavClient::fetch_ticket(self)
            .await
            .map_err(|e| SyncError::TicketUnavailable(e.to_string()))
    }
}
