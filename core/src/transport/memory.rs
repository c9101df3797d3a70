// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! In-process transport.
//!
//! [`MemoryConnector`] hands every accepted connection to its paired
//! [`MemoryServer`] as a [`MemoryPeer`], which plays the server side.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use url::Url;

use crate::error::SyncError;
use crate::lock;
use crate::transport::{Connector, Frame, Transport};

/// What the connector does with the next connection attempts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Behavior {
    /// Complete the handshake.
    #[default]
    Accept,
    /// Fail with [`SyncError::ConnectionFailed`].
    Refuse(String),
    /// Never complete the handshake.
    Hang,
}

/// Creates a connected connector and server pair.
#[must_use]
pub fn pair() -> (MemoryConnector, MemoryServer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let behavior = Arc::new(Mutex::new(Behavior::Accept));
    (
        MemoryConnector {
            accepted: tx,
            behavior: behavior.clone(),
        },
        MemoryServer {
            accepted: rx,
            behavior,
        },
    )
}

/// Client side factory.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    accepted: mpsc::UnboundedSender<MemoryPeer>,
    behavior: Arc<Mutex<Behavior>>,
}

/// Server side of a [`MemoryConnector`].
#[derive(Debug)]
pub struct MemoryServer {
    accepted: mpsc::UnboundedReceiver<MemoryPeer>,
    behavior: Arc<Mutex<Behavior>>,
}

impl MemoryServer {
    /// Waits for the next client connection.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accepted.recv().await
    }

    /// Sets how future connection attempts are answered.
    pub fn set_behavior(&self, behavior: Behavior) {
        *lock(&self.behavior) = behavior;
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>, SyncError> {
        let behavior = lock(&self.behavior).clone();
        match behavior {
            Behavior::Accept => {}
            Behavior::Refuse(reason) => return Err(SyncError::ConnectionFailed(reason)),
            Behavior::Hang => {
                std::future::pending::<()>().await;
            }
        }

        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            url: url.clone(),
            to_client,
            from_client,
        };
        self.accepted
            .send(peer)
            .map_err(|_| SyncError::ConnectionFailed("memory server dropped".to_string()))?;
        Ok(Box::new(MemoryTransport { incoming, outgoing }))
    }
}

/// Server end of one memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    url: Url,
    to_client: mpsc::UnboundedSender<Frame>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    /// URL the client connected to.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Pushes a frame to the client; false once the client is gone.
    pub fn send(&self, frame: Frame) -> bool {
        self.to_client.send(frame).is_ok()
    }

    /// Pushes a JSON text frame to the client.
    pub fn send_json(&self, value: &Value) -> bool {
        self.send(Frame::Text(value.to_string()))
    }

    /// Waits for the next text the client sent.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Waits for the next text the client sent, decoded as JSON.
    pub async fn recv_json(&mut self) -> Option<Value> {
        let text = self.recv_text().await?;
        serde_json::from_str(&text).ok()
    }

    /// Returns an already sent text without waiting.
    pub fn try_recv_text(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }

    /// Closes the connection from the server side.
    pub fn close(self) {
        let _ = self.to_client.send(Frame::Close);
    }
}

struct MemoryTransport {
    incoming: mpsc::UnboundedReceiver<Frame>,
    outgoing: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_text(&mut self, text: String) -> Result<(), SyncError> {
        self.outgoing
            .send(text)
            .map_err(|_| SyncError::Transport("memory peer gone".to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Frame, SyncError>> {
        self.incoming.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.incoming.close();
    }
}
