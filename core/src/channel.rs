// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::error::SyncError;
use crate::lock;
use crate::transport::{Frame, Transport};

/// Lifecycle state of a [`Channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    /// Handshake in progress.
    Connecting = 0,
    /// Usable.
    Open = 1,
    /// Close requested, not yet confirmed.
    Closing = 2,
    /// Gone.
    Closed = 3,
}

impl ReadyState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Receives the long-lived events of one channel.
///
/// Callbacks run on the channel's pump task and must not block.
pub trait ChannelListener: Send + Sync {
    /// A text frame arrived. Frames that are not JSON come as [`Value::String`].
    fn on_message(&self, channel_id: u64, message: Value);

    /// The channel is closed, whichever side closed it.
    fn on_close(&self, channel_id: u64);

    /// The transport failed; `on_close` follows.
    fn on_error(&self, channel_id: u64, error: &SyncError);
}

/// Handle of the live push connection.
///
/// Every channel gets a fresh id so that events of a replaced channel can be
/// told apart from the current one.
pub struct Channel {
    id: u64,
    state: AtomicU8,
    outgoing: mpsc::UnboundedSender<String>,
    inbound: watch::Sender<u64>,
    listener: Mutex<Option<Arc<dyn ChannelListener>>>,
    shutdown: CancellationToken,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("state", &self.ready_state())
            .finish_non_exhaustive()
    }
}

impl Channel {
    /// Wraps an established transport and starts pumping it.
    ///
    /// The listener is attached before the first frame is read.
    #[must_use]
    pub fn start(
        id: u64,
        transport: Box<dyn Transport>,
        listener: Arc<dyn ChannelListener>,
    ) -> Arc<Self> {
        let (outgoing, commands) = mpsc::unbounded_channel();
        let (inbound, _) = watch::channel(0);
        let channel = Arc::new(Self {
            id,
            state: AtomicU8::new(ReadyState::Open as u8),
            outgoing,
            inbound,
            listener: Mutex::new(Some(listener)),
            shutdown: CancellationToken::new(),
        });
        tokio::spawn(pump(channel.clone(), transport, commands));
        channel
    }

    /// Identifier, unique per connection manager.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Shorthand for `ready_state() == Open`.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    /// Queues a JSON message.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ChannelNotOpen`] unless the channel is open.
    pub fn send_json(&self, message: &Value) -> Result<(), SyncError> {
        if !self.is_open() {
            return Err(SyncError::ChannelNotOpen);
        }
        let text = serde_json::to_string(message).map_err(|e| SyncError::Transport(e.to_string()))?;
        self.outgoing
            .send(text)
            .map_err(|_| SyncError::ChannelNotOpen)
    }

    /// Watches the number of inbound frames, pings and pongs included.
    #[must_use]
    pub fn subscribe_inbound(&self) -> watch::Receiver<u64> {
        self.inbound.subscribe()
    }

    /// Detaches the listener. Safe to call repeatedly.
    pub fn cleanup(&self) {
        if lock(&self.listener).take().is_some() {
            tracing::debug!(channel = self.id, "listeners detached");
        }
    }

    /// Requests the transport to close.
    pub fn close(&self) {
        let _ = self.state.compare_exchange(
            ReadyState::Open as u8,
            ReadyState::Closing as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.shutdown.cancel();
    }

    fn listener(&self) -> Option<Arc<dyn ChannelListener>> {
        lock(&self.listener).clone()
    }

    fn touch(&self) {
        self.inbound.send_modify(|count| *count = count.wrapping_add(1));
    }
}

async fn pump(
    channel: Arc<Channel>,
    mut transport: Box<dyn Transport>,
    mut commands: mpsc::UnboundedReceiver<String>,
) {
    loop {
        tokio::select! {
            () = channel.shutdown.cancelled() => {
                transport.close().await;
                break;
            }
            frame = transport.recv() => match frame {
                Some(Ok(Frame::Text(text))) => {
                    channel.touch();
                    let message = serde_json::from_str(&text).unwrap_or(Value::String(text));
                    if let Some(listener) = channel.listener() {
                        listener.on_message(channel.id, message);
                    }
                }
                Some(Ok(Frame::Ping | Frame::Pong)) => channel.touch(),
                Some(Ok(Frame::Close)) | None => {
                    tracing::debug!(channel = channel.id, "closed by peer");
                    break;
                }
                Some(Err(e)) => {
                    if let Some(listener) = channel.listener() {
                        listener.on_error(channel.id, &e);
                    }
                    break;
                }
            },
            Some(text) = commands.recv() => {
                if let Err(e) = transport.send_text(text).await {
                    if let Some(listener) = channel.listener() {
                        listener.on_error(channel.id, &e);
                    }
                    break;
                }
            }
        }
    }

    channel
        .state
        .store(ReadyState::Closed as u8, Ordering::Release);
    if let Some(listener) = channel.listener() {
        listener.on_close(channel.id);
    }
}
