// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! Subscription registration over a live channel.

use calpush_core::{CalendarId, SyncError, reconcile_subscriptions};
use serde_json::json;
use tokio::time::timeout;

use crate::common::{WAIT, open_channel};

fn ids(names: &[&str]) -> Vec<CalendarId> {
    names
        .iter()
        .map(|name| CalendarId::new("alice", *name))
        .collect()
}

#[tokio::test]
async fn subscriptions_register_before_unregister() {
    // Arrange
    let (channel, mut peer) = open_channel().await;

    // Act
    let diff = reconcile_subscriptions(
        &ids(&["work", "home"]),
        &ids(&["home", "travel", "gym"]),
        &channel,
    )
    .unwrap();

    // Assert
    assert_eq!(diff.to_register, ids(&["travel", "gym"]));
    assert_eq!(diff.to_unregister, ids(&["work"]));

    let first = timeout(WAIT, peer.recv_json()).await.unwrap().unwrap();
    assert_eq!(
        first,
        json!({"register": ["/calendars/alice/travel", "/calendars/alice/gym"]})
    );
    let second = timeout(WAIT, peer.recv_json()).await.unwrap().unwrap();
    assert_eq!(second, json!({"unregister": ["/calendars/alice/work"]}));
}

#[tokio::test]
async fn subscriptions_send_only_what_changed() {
    // Arrange
    let (channel, mut peer) = open_channel().await;

    // Act
    reconcile_subscriptions(&ids(&["work"]), &ids(&[]), &channel).unwrap();
    let unchanged = reconcile_subscriptions(&ids(&["work"]), &ids(&["work"]), &channel).unwrap();

    // Assert
    assert!(unchanged.is_empty());
    let only = timeout(WAIT, peer.recv_json()).await.unwrap().unwrap();
    assert_eq!(only, json!({"unregister": ["/calendars/alice/work"]}));
    channel.close();
    assert_eq!(timeout(WAIT, peer.recv_text()).await.unwrap(), None);
}

#[tokio::test]
async fn subscriptions_require_an_open_channel() {
    // Arrange
    let (channel, mut peer) = open_channel().await;
    channel.close();

    // Act
    let err = reconcile_subscriptions(&[], &ids(&["work"]), &channel).unwrap_err();

    // Assert
    assert_eq!(err, SyncError::ChannelNotOpen);
    assert_eq!(timeout(WAIT, peer.recv_text()).await.unwrap(), None);
}

#[tokio::test]
async fn subscriptions_empty_diff_on_closed_channel_is_fine() {
    let (channel, _peer) = open_channel().await;
    channel.close();

    let diff = reconcile_subscriptions(&ids(&["work"]), &ids(&["work"]), &channel).unwrap();
    assert!(diff.is_empty());
}
