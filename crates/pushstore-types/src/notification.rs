//! The queued notification record.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::{ChannelId, Uaid};
use crate::time::sec_since_epoch;

/// Where a notification instance came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationSource {
    /// Handed in by the endpoint service, not yet persisted.
    #[default]
    Direct,
    /// Decoded from a stored row.
    Stored,
}

/// A push notification queued for one (subscriber, channel) pair.
///
/// Its physical identity is (hashed UAID, sort key); the sort key is derived
/// from `topic`, `sortkey_timestamp` or, for legacy rows, `message_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub uaid: Uaid,
    pub channel_id: ChannelId,
    /// Requested lifetime in seconds. The stored expiry is clamped.
    #[serde(default)]
    pub ttl: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    /// Creation time, seconds since the epoch.
    pub timestamp: u64,
    /// Position in the timestamp-ordered queue (milliseconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sortkey_timestamp: Option<u64>,
    /// Replace-in-place key. At most one live row per (channel, topic).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default)]
    pub source: NotificationSource,
    /// Acknowledgement token returned to the application server.
    pub message_id: String,
    /// Version of the stored row; used to guard deletes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_id: Option<String>,
    /// Row addressed by the pre-versioning `{chid}:{message_id}` key.
    #[serde(default)]
    pub legacy: bool,
}

impl Notification {
    /// A fresh timestamp-ordered notification with the message id doubling as
    /// the update id.
    pub fn new(uaid: Uaid, channel_id: ChannelId, message_id: impl Into<String>, ttl: u64) -> Self {
        let message_id = message_id.into();
        Self {
            uaid,
            channel_id,
            ttl,
            data: None,
            headers: None,
            timestamp: sec_since_epoch(),
            sortkey_timestamp: None,
            topic: None,
            source: NotificationSource::Direct,
            update_id: Some(message_id.clone()),
            message_id,
            legacy: false,
        }
    }

    /// Attach a payload.
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Attach a topic.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Attach crypto headers.
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Pin the queue position.
    pub fn with_sortkey_timestamp(mut self, sortkey_timestamp: u64) -> Self {
        self.sortkey_timestamp = Some(sortkey_timestamp);
        self
    }

    /// Absolute time (seconds) after which the message is stale for delivery.
    pub fn expiry(&self) -> u64 {
        self.timestamp.saturating_add(self.ttl)
    }

    /// Whether the notification has aged out at `at_sec`.
    pub fn expired(&self, at_sec: u64) -> bool {
        at_sec >= self.expiry()
    }
}
