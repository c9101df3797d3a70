// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use calpush_caldav::CalDavClient;
use jiff::{SignedDuration, Timestamp};
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::channel::{Channel, ChannelListener};
use crate::config::SyncConfig;
use crate::connection::ConnectionManager;
use crate::error::SyncError;
use crate::liveness::{Link, LivenessMonitor};
use crate::lock;
use crate::model::{CalendarId, CalendarKind, DateWindow};
use crate::reconciler::{Reconcile, Reconciler};
use crate::reconnect::{Backoff, ReconnectController, ScheduleOutcome, Trigger, exponential_backoff};
use crate::registrar::{SubscriptionDiff, reconcile_subscriptions, subscription_diff};
use crate::replica::Replica;
use crate::router::PushRouter;
use crate::transport::WebSocketConnector;

const EVENT_CAPACITY: usize = 64;
const DEFAULT_WINDOW_DAYS: i64 = 30;

/// Conditions observable outside the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A push channel opened.
    Connected,
    /// The push channel closed.
    Disconnected,
    /// Reconnecting stopped after the attempt budget was spent.
    Offline {
        /// Attempts made in the failed episode.
        attempts: u32,
    },
    /// A delta was reconciled and handed to the replica.
    CalendarSynced {
        /// The calendar.
        calendar: CalendarId,
        /// Its collection.
        kind: CalendarKind,
        /// Number of deleted uids.
        deleted: usize,
        /// Number of upserted events.
        upserted: usize,
    },
    /// Reconciling one calendar failed.
    CalendarFailed {
        /// The calendar.
        calendar: CalendarId,
        /// Its collection.
        kind: CalendarKind,
        /// The failure.
        error: SyncError,
    },
}

#[derive(Debug, Default)]
struct Subscriptions {
    previous: Vec<CalendarId>,
    current: Vec<CalendarId>,
}

struct Inner {
    connection: ConnectionManager,
    reconnect: ReconnectController,
    liveness: LivenessMonitor,
    router: PushRouter,
    channel: Mutex<Option<Arc<Channel>>>,
    connecting: AtomicBool,
    manual: AtomicBool,
    offline: AtomicBool,
    subscriptions: Mutex<Subscriptions>,
    window: Mutex<DateWindow>,
    events: broadcast::Sender<SyncEvent>,
    toggle: Arc<watch::Sender<bool>>,
    shutdown: CancellationToken,
}

/// Owns the push channel and everything that keeps it useful.
///
/// Construct one per session from the application wiring and pass it to
/// whoever needs the channel. Dropping it shuts the engine down.
pub struct ConnectionSupervisor {
    inner: Arc<Inner>,
}

impl fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("channel", &lock(&self.inner.channel))
            .field("reconnect", &self.inner.reconnect)
            .field("subscriptions", &lock(&self.inner.subscriptions))
            .finish_non_exhaustive()
    }
}

impl ConnectionSupervisor {
    /// Wires the engine together and starts its background tasks.
    ///
    /// Must be called within a tokio runtime. Nothing connects until
    /// [`set_authenticated`](Self::set_authenticated) is called with `true`.
    pub fn new(
        config: &SyncConfig,
        connection: ConnectionManager,
        reconciler: Arc<dyn Reconcile>,
        replica: Arc<dyn Replica>,
        backoff: Backoff,
    ) -> Self {
        let (toggle, toggle_rx) = watch::channel(false);
        let toggle = Arc::new(toggle);
        let trigger: Trigger = {
            let toggle = toggle.clone();
            Arc::new(move || toggle.send_modify(|flag| *flag = !*flag))
        };

        let now = Timestamp::now();
        let until = now
            .checked_add(SignedDuration::from_hours(24 * DEFAULT_WINDOW_DAYS))
            .unwrap_or(now);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let inner = Arc::new(Inner {
            connection,
            reconnect: ReconnectController::new(
                config.max_reconnect_attempts,
                backoff,
                trigger,
                config.attempt_reset_policy(),
            ),
            liveness: LivenessMonitor::new(config.ping_timeout(), config.ping_style),
            router: PushRouter::new(reconciler, replica),
            channel: Mutex::new(None),
            connecting: AtomicBool::new(false),
            manual: AtomicBool::new(false),
            offline: AtomicBool::new(false),
            subscriptions: Mutex::new(Subscriptions::default()),
            window: Mutex::new(DateWindow::new(now, until)),
            events,
            toggle,
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(run_connect_loop(inner.clone(), toggle_rx));
        tokio::spawn(run_heartbeat(inner.clone(), config.ping_interval()));
        Self { inner }
    }

    /// Supervisor over a `CalDAV` server and its WebSocket push endpoint.
    pub fn for_caldav(client: CalDavClient, config: &SyncConfig, replica: Arc<dyn Replica>) -> Self {
        let push_base = config.push_base(client.config()).ok();
        let reconciler =
            Reconciler::new(client.clone()).with_max_concurrency(config.expansion_concurrency);
        let connection =
            ConnectionManager::new(push_base, Arc::new(client), Arc::new(WebSocketConnector));
        Self::new(
            config,
            connection,
            Arc::new(reconciler),
            replica,
            Arc::new(exponential_backoff),
        )
    }

    /// Receives [`SyncEvent`]s from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Sets whether a session exists; connects when it appears and
    /// disconnects when it goes away.
    pub fn set_authenticated(&self, authenticated: bool) {
        let was = self.inner.reconnect.is_authenticated();
        self.inner.reconnect.set_authenticated(authenticated);
        if authenticated && !was {
            self.connect();
        } else if !authenticated {
            self.inner.disconnect();
        }
    }

    /// Opens a channel now, replacing any current one.
    ///
    /// A manual connect starts a new failure episode: the attempt count is
    /// reset once it succeeds.
    pub fn connect(&self) {
        self.inner.reconnect.clear_reconnect_timeout();
        self.inner.manual.store(true, Ordering::SeqCst);
        self.inner.offline.store(false, Ordering::SeqCst);
        self.inner.toggle.send_modify(|flag| *flag = !*flag);
    }

    /// Closes the channel without reconnecting.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Replaces the set of calendars the server should push changes for.
    ///
    /// In-flight reconciliations of dropped calendars are cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ChannelNotOpen`] if there is something to send
    /// but no open channel; the change is sent after the next open.
    pub fn set_selected_calendars(&self, ids: Vec<CalendarId>) -> Result<SubscriptionDiff, SyncError> {
        {
            let mut subscriptions = lock(&self.inner.subscriptions);
            for dropped in subscriptions.current.iter().filter(|id| !ids.contains(id)) {
                self.inner.router.cancel(dropped);
            }
            subscriptions.current = ids;
        }
        self.inner.push_subscriptions()
    }

    /// Drops one calendar from the selection and cancels its reconciliation.
    ///
    /// # Errors
    ///
    /// See [`set_selected_calendars`](Self::set_selected_calendars).
    pub fn deselect(&self, id: &CalendarId) -> Result<SubscriptionDiff, SyncError> {
        let remaining: Vec<CalendarId> = lock(&self.inner.subscriptions)
            .current
            .iter()
            .filter(|current| *current != id)
            .cloned()
            .collect();
        self.inner.router.cancel(id);
        self.set_selected_calendars(remaining)
    }

    /// Calendars currently selected.
    #[must_use]
    pub fn selected_calendars(&self) -> Vec<CalendarId> {
        lock(&self.inner.subscriptions).current.clone()
    }

    /// Sets the display window used for recurrence expansion.
    pub fn set_window(&self, window: DateWindow) {
        *lock(&self.inner.window) = window;
    }

    /// The display window used for recurrence expansion.
    #[must_use]
    pub fn window(&self) -> DateWindow {
        *lock(&self.inner.window)
    }

    /// Confirms the channel is live, reconnecting if it is not.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ReconnectTimeout`] if the channel does not come back.
    pub async fn assert_alive(&self) -> Result<(), SyncError> {
        self.inner.liveness.assert_alive(self.inner.clone()).await
    }

    /// The current channel, open or not.
    #[must_use]
    pub fn channel(&self) -> Option<Arc<Channel>> {
        lock(&self.inner.channel).clone()
    }

    /// Whether the current channel is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.channel().is_some_and(|channel| channel.is_open())
    }

    /// Reconnect attempts in the current failure episode.
    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        self.inner.reconnect.attempt_count()
    }

    /// Stops background tasks, cancels reconciliations and closes the channel.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.router.cancel_all();
        self.inner.reconnect.set_authenticated(false);
        self.inner.disconnect();
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn publish(&self, event: SyncEvent) {
        // no receiver is fine
        let _ = self.events.send(event);
    }

    async fn connect_once(self: &Arc<Self>) {
        if self.shutdown.is_cancelled() || !self.reconnect.is_authenticated() {
            return;
        }
        if self.connecting.swap(true, Ordering::SeqCst) {
            tracing::debug!("connect already in progress");
            return;
        }

        if let Some(old) = lock(&self.channel).take() {
            old.cleanup();
            old.close();
        }

        let listener: Arc<dyn ChannelListener> = Arc::new(SupervisorListener {
            inner: Arc::downgrade(self),
        });
        match self.connection.open(listener).await {
            Ok(channel) => {
                if self.manual.swap(false, Ordering::SeqCst) {
                    self.reconnect.reset_attempts();
                }
                *lock(&self.channel) = Some(channel.clone());
                self.connecting.store(false, Ordering::SeqCst);
                self.offline.store(false, Ordering::SeqCst);
                self.reconnect.mark_open();
                self.publish(SyncEvent::Connected);

                // a fresh channel carries no registrations
                lock(&self.subscriptions).previous.clear();
                if let Err(err) = self.push_subscriptions() {
                    tracing::warn!(err = %err, "subscriptions not sent on open");
                }
            }
            Err(err) => {
                self.connecting.store(false, Ordering::SeqCst);
                tracing::warn!(err = %err, attempt = self.reconnect.attempt_count(), "push channel open failed");
                self.schedule_reconnect();
            }
        }
    }

    fn push_subscriptions(&self) -> Result<SubscriptionDiff, SyncError> {
        let channel = lock(&self.channel).clone();
        let mut subscriptions = lock(&self.subscriptions);
        let result = match &channel {
            Some(channel) => {
                reconcile_subscriptions(&subscriptions.previous, &subscriptions.current, channel)
            }
            None => {
                let diff = subscription_diff(&subscriptions.previous, &subscriptions.current);
                if diff.is_empty() {
                    Ok(diff)
                } else {
                    Err(SyncError::ChannelNotOpen)
                }
            }
        };
        if result.is_ok() {
            subscriptions.previous = subscriptions.current.clone();
        }
        result
    }

    fn schedule_reconnect(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        if self.reconnect.schedule() == ScheduleOutcome::GaveUp
            && !self.offline.swap(true, Ordering::SeqCst)
        {
            self.publish(SyncEvent::Offline {
                attempts: self.reconnect.attempt_count(),
            });
        }
    }

    fn disconnect(&self) {
        self.reconnect.clear_reconnect_timeout();
        self.reconnect.mark_closed();
        if let Some(channel) = lock(&self.channel).take() {
            channel.cleanup();
            channel.close();
            self.publish(SyncEvent::Disconnected);
        }
    }

    fn is_current(&self, channel_id: u64) -> bool {
        lock(&self.channel)
            .as_ref()
            .is_none_or(|channel| channel.id() == channel_id)
    }

    async fn handle_message(&self, message: Value) {
        let window = *lock(&self.window);
        let outcome = self.router.route(&message, window).await;
        for calendar in outcome.outcomes {
            match calendar.result {
                Ok(delta) => self.publish(SyncEvent::CalendarSynced {
                    calendar: calendar.calendar,
                    kind: calendar.kind,
                    deleted: delta.deleted_events.len(),
                    upserted: delta.created_or_updated_events.len(),
                }),
                Err(SyncError::Cancelled) => {}
                Err(error) => self.publish(SyncEvent::CalendarFailed {
                    calendar: calendar.calendar,
                    kind: calendar.kind,
                    error,
                }),
            }
        }
    }
}

impl Link for Inner {
    fn channel(&self) -> Option<Arc<Channel>> {
        lock(&self.channel).clone()
    }

    fn is_connecting(&self) -> bool {
        self.connecting.load(Ordering::SeqCst)
    }

    fn request_reconnect(&self) {
        self.schedule_reconnect();
    }
}

struct SupervisorListener {
    inner: Weak<Inner>,
}

impl ChannelListener for SupervisorListener {
    fn on_message(&self, _channel_id: u64, message: Value) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        tokio::spawn(async move { inner.handle_message(message).await });
    }

    fn on_close(&self, channel_id: u64) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if !inner.is_current(channel_id) {
            return;
        }
        tracing::info!(channel = channel_id, "push channel closed");
        inner.reconnect.mark_closed();
        inner.publish(SyncEvent::Disconnected);
        inner.schedule_reconnect();
    }

    fn on_error(&self, channel_id: u64, error: &SyncError) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if !inner.is_current(channel_id) {
            return;
        }
        tracing::warn!(channel = channel_id, err = %error, "push channel error");
        inner.schedule_reconnect();
    }
}

async fn run_connect_loop(inner: Arc<Inner>, mut toggle: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            () = inner.shutdown.cancelled() => break,
            changed = toggle.changed() => {
                if changed.is_err() {
                    break;
                }
                inner.connect_once().await;
            }
        }
    }
}

async fn run_heartbeat(inner: Arc<Inner>, period: Duration) {
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(100)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            () = inner.shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(err) = inner.liveness.assert_alive(inner.clone()).await {
                    tracing::warn!(err = %err, "liveness check failed");
                }
            }
        }
    }
}
