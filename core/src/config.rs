// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use calpush_caldav::CalDavConfig;
use url::Url;

use crate::error::SyncError;
use crate::reconnect::AttemptResetPolicy;

/// Shape of the liveness probe sent on the push channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PingStyle {
    /// `{"type":"ping","timestamp":<epoch ms>}`
    #[default]
    Typed,
    /// `{}`
    Empty,
}

/// Settings of the synchronization engine.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SyncConfig {
    /// Explicit socket base, e.g. `wss://push.example.com`.
    #[serde(default)]
    pub push_url: Option<String>,

    /// Seconds between two heartbeat probes.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a ping reply, and for a reconnect to complete.
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,

    /// Probe payload.
    #[serde(default)]
    pub ping_style: PingStyle,

    /// Reconnect attempts before giving up.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Item expansions in flight per reconciliation.
    #[serde(default = "default_expansion_concurrency")]
    pub expansion_concurrency: usize,

    /// If set, a session open this long resets the reconnect attempt count.
    #[serde(default)]
    pub stable_session_secs: Option<u64>,
}

const fn default_ping_interval() -> u64 {
    30
}

const fn default_ping_timeout() -> u64 {
    10
}

const fn default_max_reconnect_attempts() -> u32 {
    10
}

const fn default_expansion_concurrency() -> usize {
    8
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            push_url: None,
            ping_interval_secs: default_ping_interval(),
            ping_timeout_secs: default_ping_timeout(),
            ping_style: PingStyle::default(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            expansion_concurrency: default_expansion_concurrency(),
            stable_session_secs: None,
        }
    }
}

impl SyncConfig {
    /// Resolves the socket base address.
    ///
    /// An explicit `push_url` wins; otherwise the scheme of the `CalDAV` base
    /// URL is rewritten to its socket equivalent.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoEndpointConfigured`] if neither address is usable.
    pub fn push_base(&self, caldav: &CalDavConfig) -> Result<Url, SyncError> {
        if let Some(push_url) = self.push_url.as_deref().filter(|s| !s.trim().is_empty()) {
            return Url::parse(push_url.trim()).map_err(|e| {
                tracing::warn!(push_url, err = %e, "invalid push url");
                SyncError::NoEndpointConfigured
            });
        }

        let base = caldav.base_url.trim();
        if base.is_empty() {
            return Err(SyncError::NoEndpointConfigured);
        }

        let mut url = Url::parse(base).map_err(|e| {
            tracing::warn!(base_url = base, err = %e, "invalid base url");
            SyncError::NoEndpointConfigured
        })?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            "ws" | "wss" => return Ok(url),
            _ => return Err(SyncError::NoEndpointConfigured),
        };
        url.set_scheme(scheme)
            .map_err(|()| SyncError::NoEndpointConfigured)?;
        Ok(url)
    }

    /// Interval of the heartbeat loop.
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Liveness and reconnect-wait timeout.
    #[must_use]
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }

    /// Policy deciding when a stable session forgets past failures.
    #[must_use]
    pub fn attempt_reset_policy(&self) -> AttemptResetPolicy {
        match self.stable_session_secs {
            Some(secs) => AttemptResetPolicy::AfterStable(Duration::from_secs(secs)),
            None => AttemptResetPolicy::Never,
        }
    }
}
