//! The range-store contract.
//!
//! Rows are addressed by (partition key, sort key) within a named table.
//! A backend must provide strongly consistent reads, per-row atomic set
//! mutation and conditional deletes; everything above this trait relies on
//! those primitives instead of in-process locking.

use std::collections::{BTreeSet, HashMap};

use pushstore_keys::CHANNEL_METADATA_SORT_KEY;

use crate::Result;

/// Primary key of a row in a message table.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ItemKey {
    /// Partition key (possibly hashed UAID).
    pub uaid: String,
    /// Sort key.
    pub chidmessageid: String,
}

impl ItemKey {
    pub fn new(uaid: impl Into<String>, chidmessageid: impl Into<String>) -> Self {
        Self {
            uaid: uaid.into(),
            chidmessageid: chidmessageid.into(),
        }
    }

    /// Key of the channel metadata row of `uaid`.
    pub fn metadata(uaid: impl Into<String>) -> Self {
        Self::new(uaid, CHANNEL_METADATA_SORT_KEY)
    }
}

/// One row of a message table.
///
/// The same shape carries both notification rows and the channel metadata
/// row; unused attributes are `None`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageItem {
    pub uaid: String,
    pub chidmessageid: String,
    pub chids: Option<BTreeSet<String>>,
    pub current_timestamp: Option<u64>,
    pub headers: Option<HashMap<String, String>>,
    pub data: Option<String>,
    pub ttl: Option<u64>,
    pub timestamp: Option<u64>,
    pub updateid: Option<String>,
    /// Absolute expiry, seconds since the epoch.
    pub expiry: u64,
}

impl MessageItem {
    /// An empty row at `key`.
    pub fn from_key(key: ItemKey) -> Self {
        Self {
            uaid: key.uaid,
            chidmessageid: key.chidmessageid,
            ..Self::default()
        }
    }

    pub fn key(&self) -> ItemKey {
        ItemKey::new(self.uaid.clone(), self.chidmessageid.clone())
    }

    pub fn is_metadata(&self) -> bool {
        self.chidmessageid == CHANNEL_METADATA_SORT_KEY
    }
}

/// Precondition on a conditional write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Condition {
    /// The stored row exists and its `updateid` equals this value.
    UpdateIdEquals(String),
}

/// Atomic mutation of the `chids` set of a metadata row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SetUpdate {
    Add(BTreeSet<String>),
    Remove(BTreeSet<String>),
}

/// Exclusive sort key bound of a range read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyRange {
    /// `chidmessageid < bound`
    Below(String),
    /// `chidmessageid > bound`
    Above(String),
}

/// One row of the router table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouterItem {
    /// Partition key (possibly hashed UAID).
    pub uaid: String,
    pub connected_at: u64,
    pub router_type: String,
    /// JSON object text.
    pub router_data: Option<String>,
    pub last_connect: Option<u64>,
    pub node_id: Option<String>,
    pub record_version: Option<u8>,
    pub current_month: Option<String>,
}

/// A partition-key / sort-key addressable store.
pub trait RangeStore: Send + Sync {
    /// Strongly consistent point read.
    fn get_item(&self, table: &str, key: &ItemKey) -> Result<Option<MessageItem>>;

    /// Unconditional full overwrite of one row.
    fn put_item(&self, table: &str, item: &MessageItem) -> Result<()>;

    /// Overwrite several rows in one call.
    fn put_items(&self, table: &str, items: &[MessageItem]) -> Result<()>;

    /// Delete a row. With a condition, returns `false` when the condition
    /// does not hold (including a missing row) and leaves the row untouched.
    fn delete_item(&self, table: &str, key: &ItemKey, condition: Option<&Condition>)
        -> Result<bool>;

    /// Atomically apply `update` to the metadata row of `uaid`, creating the
    /// row if needed, and set its expiry. Returns the set before the update.
    fn update_chids(
        &self,
        table: &str,
        uaid: &str,
        update: &SetUpdate,
        expiry: u64,
    ) -> Result<BTreeSet<String>>;

    /// Upsert the watermark and expiry of the metadata row of `uaid`.
    fn set_current_timestamp(&self, table: &str, uaid: &str, timestamp: u64, expiry: u64)
        -> Result<()>;

    /// Strongly consistent range read in ascending sort key order.
    fn query(&self, table: &str, uaid: &str, range: &KeyRange, limit: usize)
        -> Result<Vec<MessageItem>>;

    /// Delete rows whose expiry is before `now`. Returns the count removed.
    fn sweep_expired(&self, table: &str, now: u64) -> Result<usize>;

    /// Returns `true` when the table was newly created.
    fn create_message_table(&self, name: &str) -> Result<bool>;

    /// Message tables known to the store, sorted by name.
    fn list_message_tables(&self) -> Result<Vec<String>>;

    /// Returns `true` when the table existed.
    fn drop_message_table(&self, name: &str) -> Result<bool>;

    fn create_router_table(&self, name: &str) -> Result<bool>;

    fn get_router(&self, table: &str, uaid: &str) -> Result<Option<RouterItem>>;

    /// Write a router row unless the stored row belongs to a different
    /// router type or to a live connection at least as recent. Returns
    /// whether the write happened.
    fn put_router(&self, table: &str, item: &RouterItem) -> Result<bool>;

    /// Set the message month and `last_connect` of an existing row.
    fn update_router_month(
        &self,
        table: &str,
        uaid: &str,
        month: &str,
        last_connect: u64,
    ) -> Result<bool>;

    /// Set `last_connect` of an existing row.
    fn update_last_connect(&self, table: &str, uaid: &str, last_connect: u64) -> Result<bool>;

    /// Clear `node_id` when it and `connected_at` still match.
    fn clear_node_id(&self, table: &str, uaid: &str, node_id: &str, connected_at: u64)
        -> Result<bool>;

    fn delete_router(&self, table: &str, uaid: &str) -> Result<bool>;
}
