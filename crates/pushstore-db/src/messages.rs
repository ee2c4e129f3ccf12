//! Notification rows.
//!
//! A notification is stored under its sort key (see [`SortKey`]). Topic keys
//! collapse repeats onto one row, so a second store for the same
//! (channel, topic) replaces the first without reading it. Timestamp keys
//! order the rest of the queue; the metadata row's `current_timestamp`
//! records how far the subscriber has read it.

use pushstore_keys::sort_key::check_timestamp;
use pushstore_keys::SortKey;
use pushstore_types::time::{ms_since_epoch, sec_since_epoch};
use pushstore_types::{Notification, NotificationSource, Uaid};
use serde::Serialize;
use tracing::{debug, warn};

use crate::context::TableContext;
use crate::engine::{Condition, ItemKey, KeyRange, MessageItem};
use crate::stats::DbOp;
use crate::{Result, StoreError};

/// Result of a range read.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FetchResult {
    /// Read position to resume from, when one is known.
    pub timestamp: Option<u64>,
    pub messages: Vec<Notification>,
}

/// Result of [`MessageStore::check_storage`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CheckStorageResponse {
    /// Whether `messages` came from the topic range. The caller keeps
    /// asking for topic messages until that range is drained.
    pub include_topic: bool,
    pub messages: Vec<Notification>,
    pub timestamp: Option<u64>,
}

/// Notification CRUD for one message table.
#[derive(Clone, Debug)]
pub struct MessageStore {
    ctx: TableContext,
}

impl MessageStore {
    pub fn new(ctx: TableContext) -> Self {
        Self { ctx }
    }

    pub fn table(&self) -> &str {
        self.ctx.table()
    }

    /// Store `notification` and return the key it was written under.
    ///
    /// A timestamp-ordered notification without a queue position gets the
    /// current time in milliseconds. Legacy notifications are rejected.
    pub fn store_message(&self, notification: &Notification) -> Result<SortKey> {
        self.ctx.track(DbOp::StoreMessage, || {
            let pk = self.ctx.partition_key(&notification.uaid);
            let (key, item) = self.message_item(&pk, notification, sec_since_epoch())?;
            debug!(table = self.ctx.table(), uaid = %pk, key = %key, "store_message");
            self.ctx.store().put_item(self.ctx.table(), &item)?;
            Ok(key)
        })
    }

    /// Store several notifications for `uaid` in one engine call.
    pub fn store_messages(&self, uaid: &Uaid, notifications: &[Notification]) -> Result<()> {
        self.ctx.track(DbOp::StoreMessages, || {
            let pk = self.ctx.partition_key(uaid);
            let now = sec_since_epoch();
            let items = notifications
                .iter()
                .map(|notification| -> Result<MessageItem> {
                    Ok(self.message_item(&pk, notification, now)?.1)
                })
                .collect::<Result<Vec<_>>>()?;
            debug!(table = self.ctx.table(), uaid = %pk, count = items.len(), "store_messages");
            self.ctx.store().put_items(self.ctx.table(), &items)
        })
    }

    /// Delete the row of `notification`.
    ///
    /// With an `update_id` the delete only happens while the stored row still
    /// carries it; otherwise `false` comes back and the row is untouched.
    /// Without one the delete is unconditional.
    pub fn delete_message(&self, notification: &Notification) -> Result<bool> {
        self.ctx.track(DbOp::DeleteMessage, || {
            let pk = self.ctx.partition_key(&notification.uaid);
            let key = SortKey::for_notification(notification)?;
            let item_key = ItemKey::new(pk, key.encode());
            let condition = notification
                .update_id
                .clone()
                .map(Condition::UpdateIdEquals);
            if condition.is_none() {
                warn!(
                    table = self.ctx.table(),
                    key = %key,
                    "unconditional delete of a row without update id"
                );
            }
            let deleted =
                self.ctx
                    .store()
                    .delete_item(self.ctx.table(), &item_key, condition.as_ref())?;
            if !deleted {
                debug!(table = self.ctx.table(), key = %key, "delete superseded");
            }
            Ok(deleted)
        })
    }

    /// Topic and legacy rows (`sort_key < "02"`), ascending, at most `limit`
    /// rows including the metadata row. The metadata row's watermark becomes
    /// the returned timestamp.
    pub fn fetch_messages(&self, uaid: &Uaid, limit: usize) -> Result<FetchResult> {
        self.ctx.track(DbOp::FetchMessages, || {
            let pk = self.ctx.partition_key(uaid);
            let range = KeyRange::Below(SortKey::topic_upper_bound().to_string());
            let mut rows = self
                .ctx
                .store()
                .query(self.ctx.table(), &pk, &range, limit)?
                .into_iter()
                .peekable();

            let mut timestamp = None;
            if let Some(metadata) = rows.next_if(MessageItem::is_metadata) {
                timestamp = metadata.current_timestamp;
            }
            let messages = rows
                .map(|row| notification_from_item(uaid, row))
                .collect::<Result<Vec<_>>>()?;
            debug!(
                table = self.ctx.table(),
                uaid = %pk,
                count = messages.len(),
                "fetch_messages"
            );
            Ok(FetchResult {
                timestamp,
                messages,
            })
        })
    }

    /// Rows after the topic range, or after `timestamp` when given.
    ///
    /// The returned timestamp is the queue position of the last row that has
    /// one. Legacy rows come back too but never move it.
    pub fn fetch_timestamp_messages(
        &self,
        uaid: &Uaid,
        timestamp: Option<u64>,
        limit: usize,
    ) -> Result<FetchResult> {
        self.ctx.track(DbOp::FetchTimestampMessages, || {
            let pk = self.ctx.partition_key(uaid);
            let range = KeyRange::Above(SortKey::timestamp_lower_bound(timestamp)?);
            let messages = self
                .ctx
                .store()
                .query(self.ctx.table(), &pk, &range, limit)?
                .into_iter()
                .map(|row| notification_from_item(uaid, row))
                .collect::<Result<Vec<_>>>()?;
            let timestamp = messages
                .iter()
                .rev()
                .find_map(|message| message.sortkey_timestamp);
            debug!(
                table = self.ctx.table(),
                uaid = %pk,
                count = messages.len(),
                ?timestamp,
                "fetch_timestamp_messages"
            );
            Ok(FetchResult {
                timestamp,
                messages,
            })
        })
    }

    /// Move the read watermark to `timestamp` and refresh the metadata row's
    /// expiry. The watermark must fit the v02 key field.
    pub fn update_last_message_read(&self, uaid: &Uaid, timestamp: u64) -> Result<()> {
        self.ctx.track(DbOp::UpdateLastMessageRead, || {
            let timestamp = check_timestamp(timestamp)?;
            let pk = self.ctx.partition_key(uaid);
            let expiry = self.ctx.expiry_at(sec_since_epoch(), None);
            debug!(table = self.ctx.table(), uaid = %pk, timestamp, "update_last_message_read");
            self.ctx
                .store()
                .set_current_timestamp(self.ctx.table(), &pk, timestamp, expiry)
        })
    }

    /// The read a connecting subscriber performs.
    ///
    /// Topic rows first while `include_topic` is set; once none are left the
    /// timestamp range after the stored (or given) watermark.
    pub fn check_storage(
        &self,
        uaid: &Uaid,
        include_topic: bool,
        timestamp: Option<u64>,
        limit: usize,
    ) -> Result<CheckStorageResponse> {
        let mut timestamp = timestamp;
        if include_topic {
            let topic = self.fetch_messages(uaid, limit)?;
            if !topic.messages.is_empty() {
                return Ok(CheckStorageResponse {
                    include_topic: true,
                    messages: topic.messages,
                    timestamp: topic.timestamp,
                });
            }
            timestamp = topic.timestamp.or(timestamp);
        }
        let next = self.fetch_timestamp_messages(uaid, timestamp, limit)?;
        Ok(CheckStorageResponse {
            include_topic: false,
            messages: next.messages,
            timestamp: next.timestamp.or(timestamp),
        })
    }

    fn message_item(
        &self,
        pk: &str,
        notification: &Notification,
        now: u64,
    ) -> Result<(SortKey, MessageItem)> {
        if notification.legacy && notification.topic.is_none() {
            return Err(StoreError::LegacyWrite(format!(
                "{}:{}",
                notification.channel_id, notification.message_id
            )));
        }
        let key = if notification.topic.is_none() && notification.sortkey_timestamp.is_none() {
            SortKey::timestamped(notification.channel_id, ms_since_epoch())?
        } else {
            SortKey::for_notification(notification)?
        };
        let updateid = notification
            .update_id
            .clone()
            .unwrap_or_else(|| notification.message_id.clone());
        let item = MessageItem {
            headers: notification.headers.clone(),
            data: notification.data.clone(),
            ttl: Some(notification.ttl),
            timestamp: Some(notification.timestamp),
            updateid: Some(updateid),
            expiry: self.ctx.expiry_at(now, Some(notification.ttl)),
            ..MessageItem::from_key(ItemKey::new(pk, key.encode()))
        };
        Ok((key, item))
    }
}

/// Decode a stored row into a notification of `uaid`.
fn notification_from_item(uaid: &Uaid, item: MessageItem) -> Result<Notification> {
    let malformed = |reason: &str| StoreError::MalformedRow {
        key: item.chidmessageid.clone(),
        reason: reason.to_string(),
    };
    let key = SortKey::parse(&item.chidmessageid)?;
    let timestamp = item.timestamp.ok_or_else(|| malformed("missing timestamp"))?;
    let (message_id, update_id) = match key.message_id() {
        Some(message_id) => (message_id.to_string(), item.updateid.clone()),
        None => {
            let updateid = item
                .updateid
                .clone()
                .ok_or_else(|| malformed("missing updateid"))?;
            (updateid.clone(), Some(updateid))
        }
    };
    Ok(Notification {
        uaid: *uaid,
        channel_id: key.channel_id(),
        ttl: item.ttl.unwrap_or(0),
        data: item.data,
        headers: item.headers,
        timestamp,
        sortkey_timestamp: key.sortkey_timestamp(),
        topic: key.topic_name().map(str::to_string),
        source: NotificationSource::Stored,
        message_id,
        update_id,
        legacy: key.is_legacy(),
    })
}
