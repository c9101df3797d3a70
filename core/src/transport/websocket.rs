// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use crate::error::SyncError;
use crate::transport::{Connector, Frame, Transport};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Connector backed by `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>, SyncError> {
        let (ws, response) = connect_async(url.as_str())
            .await
            .map_err(|e| SyncError::ConnectionFailed(e.to_string()))?;
        tracing::debug!(status = %response.status(), host = url.host_str(), "websocket established");
        Ok(Box::new(WebSocketTransport { ws }))
    }
}

struct WebSocketTransport {
    ws: WsStream,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send_text(&mut self, text: String) -> Result<(), SyncError> {
        self.ws
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Frame, SyncError>> {
        loop {
            return match self.ws.next().await? {
                Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.to_string()))),
                Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => Some(Ok(Frame::Text(text))),
                    Err(_) => {
                        tracing::debug!(len = data.len(), "dropping non utf-8 binary frame");
                        continue;
                    }
                },
                Ok(Message::Ping(_)) => Some(Ok(Frame::Ping)),
                Ok(Message::Pong(_)) => Some(Ok(Frame::Pong)),
                Ok(Message::Close(_)) => Some(Ok(Frame::Close)),
                Ok(Message::Frame(_)) => continue,
                Err(e) => Some(Err(SyncError::Transport(e.to_string()))),
            };
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.ws.close(None).await {
            tracing::debug!(err = %e, "websocket close failed");
        }
    }
}
