// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! Socket abstraction under the push channel.
//!
//! The engine only talks to [`Connector`] and [`Transport`]; the WebSocket
//! implementation is used in production and the in-process [`memory`]
//! implementation in tests and embedders that bring their own wire.

pub mod memory;
mod websocket;

use async_trait::async_trait;
use url::Url;

use crate::error::SyncError;

pub use crate::transport::websocket::WebSocketConnector;

/// An inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A text frame, normally carrying JSON.
    Text(String),
    /// Transport-level keepalive from the peer.
    Ping,
    /// Transport-level keepalive answer from the peer.
    Pong,
    /// The peer closed the connection.
    Close,
}

/// One established, bidirectional connection.
#[async_trait]
pub trait Transport: Send {
    /// Sends one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), SyncError>;

    /// Waits for the next inbound frame; `None` once the connection is gone.
    async fn recv(&mut self) -> Option<Result<Frame, SyncError>>;

    /// Closes the connection; errors are not interesting at this point.
    async fn close(&mut self);
}

/// Opens transports. Returning from `connect` means the handshake completed.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a connection to `url`.
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>, SyncError>;
}
