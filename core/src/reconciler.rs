// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;
use calpush_caldav::{CalDavClient, CalDavError, Href, SyncItem, SyncPage, uid_from_href};
use futures::{StreamExt, TryStreamExt, stream};
use tokio_util::sync::CancellationToken;

use crate::error::SyncError;
use crate::expand::expand_object;
use crate::model::{Calendar, CalendarEvent, CalendarId, CalendarKind, DateWindow, SyncDelta};

/// Default number of item expansions in flight.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Remote store the reconciler pulls deltas and items from.
#[async_trait]
pub trait DeltaSource: Send + Sync {
    /// Everything changed in the calendar since `sync_token`, in server order.
    async fn fetch_delta(&self, calendar: &CalendarId, sync_token: &str) -> Result<SyncPage, SyncError>;

    /// iCalendar text of one item; `None` if it no longer exists.
    async fn fetch_item(&self, href: &Href) -> Result<Option<String>, SyncError>;
}

#[async_trait]
impl DeltaSource for CalDavClient {
    async fn fetch_delta(&self, calendar: &CalendarId, sync_token: &str) -> Result<SyncPage, SyncError> {
        let collection = CalDavClient::collection_href(calendar.owner(), calendar.calendar());
        self.sync_collection(&collection, sync_token)
            .await
            .map_err(|e| SyncError::delta_fetch(&e))
    }

    async fn fetch_item(&self, href: &Href) -> Result<Option<String>, SyncError> {
        match self.get_object(href).await {
            Ok((_, body)) => Ok(Some(body)),
            Err(CalDavError::NotFound(_)) => Ok(None),
            Err(e) => Err(SyncError::delta_fetch(&e)),
        }
    }
}

/// Object-safe face of a reconciler, used by the push router.
#[async_trait]
pub trait Reconcile: Send + Sync {
    /// Computes the delta of `calendar` since its sync token.
    async fn reconcile(
        &self,
        calendar: &Calendar,
        kind: CalendarKind,
        window: DateWindow,
        cancel: &CancellationToken,
    ) -> Result<SyncDelta, SyncError>;
}

/// Turns a sync token into a consolidated [`SyncDelta`].
#[derive(Debug, Clone)]
pub struct Reconciler<S> {
    source: S,
    max_concurrency: usize,
}

enum Expansion {
    Events(Vec<CalendarEvent>),
    Gone(Href),
}

impl<S: DeltaSource> Reconciler<S> {
    /// Creates a reconciler with the default concurrency.
    pub fn new(source: S) -> Self {
        Self {
            source,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    /// Sets how many items are fetched and expanded at once.
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// The underlying source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetches and expands the changes of `calendar` since its sync token.
    ///
    /// Without a token this returns an empty delta and makes no request.
    /// Events come out in the order the server listed their items.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::DeltaFetchFailed`] if the delta or an item cannot
    /// be fetched or read, and [`SyncError::Cancelled`] once `cancel` fires.
    #[tracing::instrument(skip_all, fields(calendar = %calendar.id, %kind))]
    pub async fn reconcile(
        &self,
        calendar: &Calendar,
        kind: CalendarKind,
        window: DateWindow,
        cancel: &CancellationToken,
    ) -> Result<SyncDelta, SyncError> {
        let Some(token) = calendar.sync_token.as_deref() else {
            tracing::debug!("no sync token, nothing to reconcile");
            return Ok(SyncDelta::empty(calendar, kind));
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!("reconciliation cancelled");
                Err(SyncError::Cancelled)
            }
            result = self.fetch_and_expand(calendar, kind, token, window) => result,
        }
    }

    async fn fetch_and_expand(
        &self,
        calendar: &Calendar,
        kind: CalendarKind,
        token: &str,
        window: DateWindow,
    ) -> Result<SyncDelta, SyncError> {
        let page = self.source.fetch_delta(&calendar.id, token).await?;

        let mut deleted = BTreeSet::new();
        let mut to_expand = Vec::new();
        let mut seen = HashSet::new();
        for item in page.items {
            match item {
                SyncItem::Deleted { href } => {
                    deleted.insert(uid_from_href(&href).to_string());
                }
                SyncItem::Changed { href, .. } => {
                    if seen.insert(href.clone()) {
                        to_expand.push(href);
                    }
                }
            }
        }

        let expansions: Vec<Expansion> = stream::iter(to_expand)
            .map(|href| self.expand(href, &calendar.id, window))
            .buffered(self.max_concurrency)
            .try_collect()
            .await?;

        let mut upserted = Vec::new();
        for expansion in expansions {
            match expansion {
                Expansion::Events(events) => upserted.extend(events),
                Expansion::Gone(href) => {
                    deleted.insert(uid_from_href(&href).to_string());
                }
            }
        }

        for event in &upserted {
            deleted.remove(event.uid.as_str());
            deleted.remove(event.base_uid());
        }

        tracing::debug!(
            deleted = deleted.len(),
            upserted = upserted.len(),
            "delta reconciled"
        );
        Ok(SyncDelta {
            calendar_id: calendar.id.clone(),
            calendar_kind: kind,
            deleted_events: deleted,
            created_or_updated_events: upserted,
            sync_token: page.sync_token,
            base_sync_token: Some(token.to_string()),
        })
    }

    async fn expand(
        &self,
        href: Href,
        calendar_id: &CalendarId,
        window: DateWindow,
    ) -> Result<Expansion, SyncError> {
        let Some(text) = self.source.fetch_item(&href).await? else {
            tracing::debug!(%href, "item vanished before it could be fetched");
            return Ok(Expansion::Gone(href));
        };
        expand_object(&text, calendar_id, &window)
            .map(Expansion::Events)
            .map_err(|e| SyncError::DeltaFetchFailed {
                message: format!("unreadable calendar object {href}: {e}"),
                status: None,
            })
    }
}

#[async_trait]
impl<S: DeltaSource> Reconcile for Reconciler<S> {
    async fn reconcile(
        &self,
        calendar: &Calendar,
        kind: CalendarKind,
        window: DateWindow,
        cancel: &CancellationToken,
    ) -> Result<SyncDelta, SyncError> {
        Reconciler::reconcile(self, calendar, kind, window, cancel).await
    }
}
