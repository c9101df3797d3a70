// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use jiff::Timestamp;
use serde_json::{Value, json};

use crate::channel::Channel;
use crate::config::PingStyle;
use crate::error::SyncError;
use crate::lock;

const OPEN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What the liveness monitor needs to know about the connection owner.
pub trait Link: Send + Sync {
    /// The current channel, if one was ever opened.
    fn channel(&self) -> Option<Arc<Channel>>;

    /// Whether an open attempt is running right now.
    fn is_connecting(&self) -> bool;

    /// Asks for a reconnect to be scheduled.
    fn request_reconnect(&self);
}

/// Builds the probe payload.
#[must_use]
pub fn ping_payload(style: PingStyle, now: Timestamp) -> Value {
    match style {
        PingStyle::Typed => json!({ "type": "ping", "timestamp": now.as_millisecond() }),
        PingStyle::Empty => json!({}),
    }
}

type Check = Shared<BoxFuture<'static, Result<(), SyncError>>>;

#[derive(Default)]
struct Slot {
    generation: u64,
    in_flight: Option<(u64, Check)>,
}

/// Probes the push channel; concurrent callers share one probe.
pub struct LivenessMonitor {
    timeout: Duration,
    style: PingStyle,
    slot: Mutex<Slot>,
}

impl fmt::Debug for LivenessMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LivenessMonitor")
            .field("timeout", &self.timeout)
            .field("style", &self.style)
            .field("in_flight", &lock(&self.slot).in_flight.is_some())
            .finish()
    }
}

impl LivenessMonitor {
    /// Creates a monitor with the reply and reopen timeout.
    #[must_use]
    pub fn new(timeout: Duration, style: PingStyle) -> Self {
        Self {
            timeout,
            style,
            slot: Mutex::new(Slot::default()),
        }
    }

    /// Resolves once the channel is confirmed live.
    ///
    /// No channel yet, or a connection attempt in progress, counts as success.
    /// A closed channel or an unanswered ping triggers one reconnect, after
    /// which this waits for the new channel to open.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ReconnectTimeout`] if no open channel shows up in time.
    pub async fn assert_alive(&self, link: Arc<dyn Link>) -> Result<(), SyncError> {
        let (generation, check) = {
            let mut slot = lock(&self.slot);
            if let Some((generation, check)) = &slot.in_flight {
                tracing::trace!("joining in-flight liveness check");
                (*generation, check.clone())
            } else {
                slot.generation += 1;
                let generation = slot.generation;
                let check = probe(link, self.timeout, self.style).boxed().shared();
                slot.in_flight = Some((generation, check.clone()));
                (generation, check)
            }
        };

        let result = check.await;

        let mut slot = lock(&self.slot);
        if slot.in_flight.as_ref().is_some_and(|(g, _)| *g == generation) {
            slot.in_flight = None;
        }
        result
    }
}

async fn probe(link: Arc<dyn Link>, timeout: Duration, style: PingStyle) -> Result<(), SyncError> {
    if link.is_connecting() {
        return Ok(());
    }
    let Some(channel) = link.channel() else {
        return Ok(());
    };

    if !channel.is_open() {
        tracing::debug!(channel = channel.id(), "channel not open, reconnecting");
        link.request_reconnect();
        return wait_for_open(link.as_ref(), channel.id(), timeout).await;
    }

    let mut inbound = channel.subscribe_inbound();
    inbound.borrow_and_update();
    let answered = match channel.send_json(&ping_payload(style, Timestamp::now())) {
        Ok(()) => matches!(
            tokio::time::timeout(timeout, inbound.changed()).await,
            Ok(Ok(()))
        ),
        Err(e) => {
            tracing::debug!(err = %e, "ping not sent");
            false
        }
    };
    if answered {
        return Ok(());
    }

    tracing::warn!(channel = channel.id(), ?timeout, "push channel did not answer ping");
    link.request_reconnect();
    wait_for_open(link.as_ref(), channel.id(), timeout).await
}

async fn wait_for_open(link: &dyn Link, stale: u64, timeout: Duration) -> Result<(), SyncError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if link
            .channel()
            .is_some_and(|channel| channel.id() != stale && channel.is_open())
        {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(SyncError::ReconnectTimeout);
        }
        tokio::time::sleep(OPEN_POLL_INTERVAL).await;
    }
}
