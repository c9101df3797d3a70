// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::lock;

/// Maps the current attempt count to a delay. Must not decrease as the count grows.
pub type Backoff = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Invoked when a scheduled reconnect fires.
pub type Trigger = Arc<dyn Fn() + Send + Sync>;

/// Default backoff: one second doubling per attempt, capped at 30 seconds.
#[must_use]
pub fn exponential_backoff(attempt: u32) -> Duration {
    const CAP: Duration = Duration::from_secs(30);
    2u64.checked_pow(attempt)
        .map_or(CAP, |factor| Duration::from_secs(factor).min(CAP))
}

/// When a healthy session forgets the failures before it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AttemptResetPolicy {
    /// Only a manual connect resets the attempt count.
    #[default]
    Never,
    /// A session that stays open this long resets the attempt count.
    AfterStable(Duration),
}

/// What [`ReconnectController::schedule`] decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Not authenticated; nothing to reconnect to.
    Skipped,
    /// The attempt budget is spent.
    GaveUp,
    /// A timer is armed for this delay.
    Scheduled(Duration),
}

#[derive(Default)]
struct State {
    attempt_count: u32,
    is_authenticated: bool,
    pending: Option<JoinHandle<()>>,
    generation: u64,
    stable: Option<JoinHandle<()>>,
}

struct Inner {
    state: Mutex<State>,
    max_attempts: u32,
    backoff: Backoff,
    trigger: Trigger,
    policy: AttemptResetPolicy,
}

/// Owns retry state and decides when the channel is reopened.
///
/// Timers run on the ambient tokio runtime. At most one timer is pending:
/// scheduling again supersedes the previous one.
#[derive(Clone)]
pub struct ReconnectController {
    inner: Arc<Inner>,
}

impl fmt::Debug for ReconnectController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("ReconnectController")
            .field("attempt_count", &state.attempt_count)
            .field("max_attempts", &self.inner.max_attempts)
            .field("is_authenticated", &state.is_authenticated)
            .field("pending", &state.pending.is_some())
            .finish_non_exhaustive()
    }
}

impl ReconnectController {
    /// Creates an idle, unauthenticated controller.
    pub fn new(
        max_attempts: u32,
        backoff: Backoff,
        trigger: Trigger,
        policy: AttemptResetPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                max_attempts,
                backoff,
                trigger,
                policy,
            }),
        }
    }

    /// Arms a reconnect timer.
    ///
    /// On firing, the attempt count is incremented and then the trigger runs.
    pub fn schedule(&self) -> ScheduleOutcome {
        let mut state = lock(&self.inner.state);
        if !state.is_authenticated {
            tracing::debug!("not authenticated, reconnect skipped");
            return ScheduleOutcome::Skipped;
        }

        if state.attempt_count >= self.inner.max_attempts {
            if let Some(pending) = state.pending.take() {
                pending.abort();
            }
            tracing::error!(
                attempts = state.attempt_count,
                "giving up on the push channel after too many reconnect attempts"
            );
            return ScheduleOutcome::GaveUp;
        }

        if let Some(pending) = state.pending.take() {
            pending.abort();
        }
        let delay = (self.inner.backoff)(state.attempt_count);
        state.generation += 1;
        let generation = state.generation;
        let inner = self.inner.clone();
        state.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.fire(generation);
        }));
        tracing::debug!(attempt = state.attempt_count, ?delay, "reconnect scheduled");
        ScheduleOutcome::Scheduled(delay)
    }

    /// Cancels the pending timer, if any.
    pub fn clear_reconnect_timeout(&self) {
        let mut state = lock(&self.inner.state);
        state.generation += 1;
        if let Some(pending) = state.pending.take() {
            pending.abort();
        }
    }

    /// Forgets past failures.
    pub fn reset_attempts(&self) {
        lock(&self.inner.state).attempt_count = 0;
    }

    /// Records that a session opened; starts the stability timer if the policy has one.
    pub fn mark_open(&self) {
        let AttemptResetPolicy::AfterStable(after) = self.inner.policy else {
            return;
        };

        let mut state = lock(&self.inner.state);
        if let Some(stable) = state.stable.take() {
            stable.abort();
        }
        let inner = self.inner.clone();
        state.stable = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let mut state = lock(&inner.state);
            if state.attempt_count > 0 {
                tracing::debug!(attempts = state.attempt_count, "session stable, attempts reset");
            }
            state.attempt_count = 0;
            state.stable = None;
        }));
    }

    /// Records that the session ended before it became stable.
    pub fn mark_closed(&self) {
        if let Some(stable) = lock(&self.inner.state).stable.take() {
            stable.abort();
        }
    }

    /// Sets whether there is a session worth reconnecting; clears timers when not.
    pub fn set_authenticated(&self, authenticated: bool) {
        let mut state = lock(&self.inner.state);
        state.is_authenticated = authenticated;
        if !authenticated {
            state.generation += 1;
            for handle in [state.pending.take(), state.stable.take()].into_iter().flatten() {
                handle.abort();
            }
        }
    }

    /// Whether a session is worth reconnecting.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        lock(&self.inner.state).is_authenticated
    }

    /// Number of fired attempts in the current failure episode.
    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        lock(&self.inner.state).attempt_count
    }

    /// Configured attempt budget.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.inner.max_attempts
    }

    /// Whether a timer is armed.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        lock(&self.inner.state).pending.is_some()
    }
}

impl Inner {
    fn fire(&self, generation: u64) {
        {
            let mut state = lock(&self.state);
            // superseded while we waited for the lock
            if state.generation != generation {
                return;
            }
            state.pending = None;
            state.attempt_count += 1;
            tracing::info!(attempt = state.attempt_count, "reconnecting push channel");
        }
        (self.trigger)();
    }
}
