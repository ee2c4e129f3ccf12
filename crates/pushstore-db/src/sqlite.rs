//! SQLite backend of [`RangeStore`].
//!
//! Each rotating epoch is a physical table. A single connection is shared
//! behind a mutex; set mutations and conditional router writes run inside
//! `BEGIN IMMEDIATE` transactions so they stay atomic per row even when
//! several processes share the database file.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use pushstore_keys::rotation::validate_table_name;
use pushstore_keys::CHANNEL_METADATA_SORT_KEY;
use pushstore_types::time::sec_since_epoch;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use crate::engine::{Condition, ItemKey, KeyRange, MessageItem, RangeStore, RouterItem, SetUpdate};
use crate::{schema, Result, StoreError};

const ITEM_COLUMNS: &str = r#"uaid, chidmessageid, chids, "current_timestamp", headers, data, ttl, timestamp, updateid, expiry"#;

const ROUTER_COLUMNS: &str =
    "uaid, connected_at, router_type, router_data, last_connect, node_id, record_version, current_month";

/// [`RangeStore`] over a SQLite database.
pub struct SqliteRangeStore {
    conn: Mutex<Connection>,
}

impl SqliteRangeStore {
    /// Wrap a connection that already went through [`crate::migrations::run`].
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn open(path: &Path, busy_timeout_ms: u64) -> Result<Self> {
        Ok(Self::new(crate::open(path, busy_timeout_ms)?))
    }

    pub fn open_memory() -> Result<Self> {
        Ok(Self::new(crate::open_memory()?))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))
    }

    fn create_table(&self, name: &str, kind: &str, ddl: String) -> Result<bool> {
        let name = checked(name)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let created = tx.execute(
            "INSERT OR IGNORE INTO store_tables (name, kind, created_at) VALUES (?1, ?2, ?3)",
            params![name, kind, sec_since_epoch() as i64],
        )? > 0;
        tx.execute_batch(&ddl)?;
        tx.commit()?;
        if created {
            tracing::info!(table = name, kind, "created table");
        }
        Ok(created)
    }
}

fn checked(name: &str) -> Result<&str> {
    validate_table_name(name).map_err(|_| StoreError::InvalidTableName(name.to_string()))?;
    Ok(name)
}

/// Columns of a message row before JSON attributes are decoded.
struct RawItem {
    item: MessageItem,
    chids: Option<String>,
    headers: Option<String>,
}

impl RawItem {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            item: MessageItem {
                uaid: row.get(0)?,
                chidmessageid: row.get(1)?,
                chids: None,
                current_timestamp: row.get::<_, Option<i64>>(3)?.map(|v| v as u64),
                headers: None,
                data: row.get(5)?,
                ttl: row.get::<_, Option<i64>>(6)?.map(|v| v as u64),
                timestamp: row.get::<_, Option<i64>>(7)?.map(|v| v as u64),
                updateid: row.get(8)?,
                expiry: row.get::<_, i64>(9)? as u64,
            },
            chids: row.get(2)?,
            headers: row.get(4)?,
        })
    }

    fn decode(self) -> Result<MessageItem> {
        let mut item = self.item;
        item.chids = decode_chids(self.chids)?;
        item.headers = self
            .headers
            .map(|text| serde_json::from_str::<HashMap<String, String>>(&text))
            .transpose()?;
        Ok(item)
    }
}

fn decode_chids(text: Option<String>) -> Result<Option<BTreeSet<String>>> {
    Ok(text
        .map(|text| serde_json::from_str::<BTreeSet<String>>(&text))
        .transpose()?)
}

fn encode_chids(chids: &BTreeSet<String>) -> Result<String> {
    Ok(serde_json::to_string(chids)?)
}

fn router_from_row(row: &Row<'_>) -> rusqlite::Result<RouterItem> {
    Ok(RouterItem {
        uaid: row.get(0)?,
        connected_at: row.get::<_, i64>(1)? as u64,
        router_type: row.get(2)?,
        router_data: row.get(3)?,
        last_connect: row.get::<_, Option<i64>>(4)?.map(|v| v as u64),
        node_id: row.get(5)?,
        record_version: row.get(6)?,
        current_month: row.get(7)?,
    })
}

fn insert_item(conn: &Connection, table: &str, item: &MessageItem) -> Result<()> {
    let chids = item.chids.as_ref().map(encode_chids).transpose()?;
    let headers = item
        .headers
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO {table} ({ITEM_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        ),
        params![
            item.uaid,
            item.chidmessageid,
            chids,
            item.current_timestamp.map(|v| v as i64),
            headers,
            item.data,
            item.ttl.map(|v| v as i64),
            item.timestamp.map(|v| v as i64),
            item.updateid,
            item.expiry as i64,
        ],
    )?;
    Ok(())
}

impl RangeStore for SqliteRangeStore {
    fn get_item(&self, table: &str, key: &ItemKey) -> Result<Option<MessageItem>> {
        let table = checked(table)?;
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {ITEM_COLUMNS} FROM {table} WHERE uaid = ?1 AND chidmessageid = ?2"
                ),
                params![key.uaid, key.chidmessageid],
                RawItem::from_row,
            )
            .optional()?;
        raw.map(RawItem::decode).transpose()
    }

    fn put_item(&self, table: &str, item: &MessageItem) -> Result<()> {
        let table = checked(table)?;
        let conn = self.lock()?;
        insert_item(&conn, table, item)
    }

    fn put_items(&self, table: &str, items: &[MessageItem]) -> Result<()> {
        let table = checked(table)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for item in items {
            insert_item(&tx, table, item)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_item(
        &self,
        table: &str,
        key: &ItemKey,
        condition: Option<&Condition>,
    ) -> Result<bool> {
        let table = checked(table)?;
        let conn = self.lock()?;
        match condition {
            Some(Condition::UpdateIdEquals(update_id)) => {
                let deleted = conn.execute(
                    &format!(
                        "DELETE FROM {table}
                         WHERE uaid = ?1 AND chidmessageid = ?2 AND updateid = ?3"
                    ),
                    params![key.uaid, key.chidmessageid, update_id],
                )?;
                Ok(deleted > 0)
            }
            None => {
                conn.execute(
                    &format!("DELETE FROM {table} WHERE uaid = ?1 AND chidmessageid = ?2"),
                    params![key.uaid, key.chidmessageid],
                )?;
                Ok(true)
            }
        }
    }

    fn update_chids(
        &self,
        table: &str,
        uaid: &str,
        update: &SetUpdate,
        expiry: u64,
    ) -> Result<BTreeSet<String>> {
        let table = checked(table)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let stored: Option<Option<String>> = tx
            .query_row(
                &format!("SELECT chids FROM {table} WHERE uaid = ?1 AND chidmessageid = ?2"),
                params![uaid, CHANNEL_METADATA_SORT_KEY],
                |row| row.get(0),
            )
            .optional()?;
        let previous = decode_chids(stored.flatten())?.unwrap_or_default();

        let mut next = previous.clone();
        match update {
            SetUpdate::Add(chids) => next.extend(chids.iter().cloned()),
            SetUpdate::Remove(chids) => next.retain(|chid| !chids.contains(chid)),
        }

        tx.execute(
            &format!(
                "INSERT INTO {table} (uaid, chidmessageid, chids, expiry)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (uaid, chidmessageid)
                 DO UPDATE SET chids = excluded.chids, expiry = excluded.expiry"
            ),
            params![
                uaid,
                CHANNEL_METADATA_SORT_KEY,
                encode_chids(&next)?,
                expiry as i64
            ],
        )?;
        tx.commit()?;
        Ok(previous)
    }

    fn set_current_timestamp(
        &self,
        table: &str,
        uaid: &str,
        timestamp: u64,
        expiry: u64,
    ) -> Result<()> {
        let table = checked(table)?;
        let conn = self.lock()?;
        conn.execute(
            &format!(
                r#"INSERT INTO {table} (uaid, chidmessageid, "current_timestamp", expiry)
                   VALUES (?1, ?2, ?3, ?4)
                   ON CONFLICT (uaid, chidmessageid)
                   DO UPDATE SET "current_timestamp" = excluded."current_timestamp",
                                 expiry = excluded.expiry"#
            ),
            params![
                uaid,
                CHANNEL_METADATA_SORT_KEY,
                timestamp as i64,
                expiry as i64
            ],
        )?;
        Ok(())
    }

    fn query(
        &self,
        table: &str,
        uaid: &str,
        range: &KeyRange,
        limit: usize,
    ) -> Result<Vec<MessageItem>> {
        let table = checked(table)?;
        let (op, bound) = match range {
            KeyRange::Below(bound) => ("<", bound),
            KeyRange::Above(bound) => (">", bound),
        };
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM {table}
             WHERE uaid = ?1 AND chidmessageid {op} ?2
             ORDER BY chidmessageid ASC
             LIMIT ?3"
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![uaid, bound, limit], RawItem::from_row)?;
        let mut items = Vec::new();
        for raw in rows {
            items.push(raw?.decode()?);
        }
        Ok(items)
    }

    fn sweep_expired(&self, table: &str, now: u64) -> Result<usize> {
        let table = checked(table)?;
        let conn = self.lock()?;
        let removed = conn.execute(
            &format!("DELETE FROM {table} WHERE expiry < ?1"),
            params![now as i64],
        )?;
        Ok(removed)
    }

    fn create_message_table(&self, name: &str) -> Result<bool> {
        self.create_table(name, "message", schema::message_table(name))
    }

    fn list_message_tables(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT name FROM store_tables WHERE kind = 'message' ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    fn drop_message_table(&self, name: &str) -> Result<bool> {
        let name = checked(name)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existed = tx.execute(
            "DELETE FROM store_tables WHERE name = ?1 AND kind = 'message'",
            params![name],
        )? > 0;
        if existed {
            tx.execute_batch(&format!("DROP TABLE IF EXISTS {name};"))?;
        }
        tx.commit()?;
        if existed {
            tracing::info!(table = name, "dropped message table");
        }
        Ok(existed)
    }

    fn create_router_table(&self, name: &str) -> Result<bool> {
        self.create_table(name, "router", schema::router_table(name))
    }

    fn get_router(&self, table: &str, uaid: &str) -> Result<Option<RouterItem>> {
        let table = checked(table)?;
        let conn = self.lock()?;
        let item = conn
            .query_row(
                &format!("SELECT {ROUTER_COLUMNS} FROM {table} WHERE uaid = ?1"),
                params![uaid],
                router_from_row,
            )
            .optional()?;
        Ok(item)
    }

    fn put_router(&self, table: &str, item: &RouterItem) -> Result<bool> {
        let table = checked(table)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<(String, Option<String>, i64)> = tx
            .query_row(
                &format!("SELECT router_type, node_id, connected_at FROM {table} WHERE uaid = ?1"),
                params![item.uaid],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let allowed = match existing {
            None => true,
            Some((router_type, node_id, connected_at)) => {
                router_type == item.router_type
                    && (node_id.is_none() || (connected_at as u64) < item.connected_at)
            }
        };
        if !allowed {
            return Ok(false);
        }

        // Attributes absent from the new record keep their stored values.
        tx.execute(
            &format!(
                "INSERT INTO {table} ({ROUTER_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (uaid) DO UPDATE SET
                     connected_at = excluded.connected_at,
                     router_type = excluded.router_type,
                     router_data = COALESCE(excluded.router_data, router_data),
                     last_connect = COALESCE(excluded.last_connect, last_connect),
                     node_id = COALESCE(excluded.node_id, node_id),
                     record_version = COALESCE(excluded.record_version, record_version),
                     current_month = COALESCE(excluded.current_month, current_month)"
            ),
            params![
                item.uaid,
                item.connected_at as i64,
                item.router_type,
                item.router_data,
                item.last_connect.map(|v| v as i64),
                item.node_id,
                item.record_version,
                item.current_month,
            ],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn update_router_month(
        &self,
        table: &str,
        uaid: &str,
        month: &str,
        last_connect: u64,
    ) -> Result<bool> {
        let table = checked(table)?;
        let conn = self.lock()?;
        let updated = conn.execute(
            &format!("UPDATE {table} SET current_month = ?2, last_connect = ?3 WHERE uaid = ?1"),
            params![uaid, month, last_connect as i64],
        )?;
        Ok(updated > 0)
    }

    fn update_last_connect(&self, table: &str, uaid: &str, last_connect: u64) -> Result<bool> {
        let table = checked(table)?;
        let conn = self.lock()?;
        let updated = conn.execute(
            &format!("UPDATE {table} SET last_connect = ?2 WHERE uaid = ?1"),
            params![uaid, last_connect as i64],
        )?;
        Ok(updated > 0)
    }

    fn clear_node_id(
        &self,
        table: &str,
        uaid: &str,
        node_id: &str,
        connected_at: u64,
    ) -> Result<bool> {
        let table = checked(table)?;
        let conn = self.lock()?;
        let updated = conn.execute(
            &format!(
                "UPDATE {table} SET node_id = NULL
                 WHERE uaid = ?1 AND node_id = ?2 AND connected_at = ?3"
            ),
            params![uaid, node_id, connected_at as i64],
        )?;
        Ok(updated > 0)
    }

    fn delete_router(&self, table: &str, uaid: &str) -> Result<bool> {
        let table = checked(table)?;
        let conn = self.lock()?;
        let deleted = conn.execute(
            &format!("DELETE FROM {table} WHERE uaid = ?1"),
            params![uaid],
        )?;
        Ok(deleted > 0)
    }
}
