//! Per-subscriber router rows.
//!
//! The router record names the message table (month) holding the
//! subscriber's messages and the connection node currently serving it.
//! Writes are conditional so a slow, older connection cannot overwrite a
//! newer one.

use chrono::NaiveDate;
use pushstore_keys::rotation::has_connected_this_month;
use pushstore_keys::{LastConnectGenerator, TableRotation};
use pushstore_types::{RouterRecord, Uaid};
use tracing::{debug, info};

use crate::context::TableContext;
use crate::engine::RouterItem;
use crate::stats::DbOp;
use crate::Result;

/// What a connecting subscriber should do next.
#[derive(Clone, Debug, PartialEq)]
pub struct LookupOutcome {
    /// The stored record, `None` for an unknown or dropped subscriber.
    pub user: Option<RouterRecord>,
    /// Message table to read from.
    pub message_month: String,
    /// Stored messages may be waiting.
    pub check_storage: bool,
    /// The subscriber lives in an older month and should be migrated.
    pub rotate_message_table: bool,
    /// The subscriber must be issued a fresh UAID.
    pub reset_uaid: bool,
}

/// Router table access.
#[derive(Clone, Debug)]
pub struct RouterTable {
    ctx: TableContext,
    last_connect: LastConnectGenerator,
}

impl RouterTable {
    pub fn new(ctx: TableContext, last_connect: LastConnectGenerator) -> Self {
        Self { ctx, last_connect }
    }

    pub fn get_user(&self, uaid: &Uaid) -> Result<Option<RouterRecord>> {
        self.ctx.track(DbOp::GetUser, || {
            let pk = self.ctx.partition_key(uaid);
            self.ctx
                .store()
                .get_router(self.ctx.table(), &pk)?
                .map(|item| record_from_item(uaid, item))
                .transpose()
        })
    }

    /// Write `record` unless a newer connection or another router type owns
    /// the row. Returns whether the write happened.
    pub fn register_user(&self, record: &RouterRecord) -> Result<bool> {
        self.ctx.track(DbOp::RegisterUser, || {
            let item = self.item_from_record(record)?;
            let written = self.ctx.store().put_router(self.ctx.table(), &item)?;
            debug!(table = self.ctx.table(), uaid = %item.uaid, written, "register_user");
            Ok(written)
        })
    }

    /// Point the subscriber at `month` and stamp a fresh `last_connect`.
    pub fn update_message_month(&self, uaid: &Uaid, month: &str) -> Result<bool> {
        self.ctx.track(DbOp::UpdateMessageMonth, || {
            let pk = self.ctx.partition_key(uaid);
            self.ctx.store().update_router_month(
                self.ctx.table(),
                &pk,
                month,
                self.last_connect.generate(),
            )
        })
    }

    /// Detach the subscriber from `node_id` if that connection is still the
    /// registered one.
    pub fn remove_node_id(&self, uaid: &Uaid, node_id: &str, connected_at: u64) -> Result<bool> {
        self.ctx.track(DbOp::RemoveNodeId, || {
            let pk = self.ctx.partition_key(uaid);
            self.ctx
                .store()
                .clear_node_id(self.ctx.table(), &pk, node_id, connected_at)
        })
    }

    pub fn drop_user(&self, uaid: &Uaid) -> Result<bool> {
        self.ctx.track(DbOp::DropUser, || {
            let pk = self.ctx.partition_key(uaid);
            info!(table = self.ctx.table(), uaid = %pk, "dropping user");
            self.ctx.store().delete_router(self.ctx.table(), &pk)
        })
    }

    /// Resolve a connecting subscriber.
    ///
    /// A record whose month is no longer retained, or which has no month at
    /// all, is dropped and reported as unknown; the caller registers the
    /// subscriber afresh. A known subscriber gets its `last_connect`
    /// refreshed once per month.
    pub fn lookup_user(
        &self,
        uaid: &Uaid,
        connected_at: u64,
        rotation: &TableRotation,
        today: NaiveDate,
    ) -> Result<LookupOutcome> {
        let current_month = rotation.current_table(today);
        let unknown = || LookupOutcome {
            user: None,
            message_month: current_month.clone(),
            check_storage: false,
            rotate_message_table: false,
            reset_uaid: false,
        };

        let Some(mut user) = self.get_user(uaid)? else {
            return Ok(unknown());
        };
        let Some(user_month) = user
            .current_month
            .clone()
            .filter(|month| rotation.is_retained(month, today))
        else {
            info!(month = ?user.current_month, "user month no longer retained");
            self.drop_user(uaid)?;
            return Ok(unknown());
        };

        if !has_connected_this_month(&user, today) {
            let last_connect = self.last_connect.generate();
            let pk = self.ctx.partition_key(uaid);
            self.ctx
                .store()
                .update_last_connect(self.ctx.table(), &pk, last_connect)?;
            user.last_connect = Some(last_connect);
        }

        let reset_uaid = user.needs_reset();
        user.connected_at = connected_at;
        Ok(LookupOutcome {
            rotate_message_table: user_month != current_month,
            message_month: user_month,
            check_storage: true,
            reset_uaid,
            user: Some(user),
        })
    }

    fn item_from_record(&self, record: &RouterRecord) -> Result<RouterItem> {
        Ok(RouterItem {
            uaid: self.ctx.partition_key(&record.uaid),
            connected_at: record.connected_at,
            router_type: record.router_type.clone(),
            router_data: record
                .router_data
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            last_connect: record.last_connect,
            node_id: record.node_id.clone(),
            record_version: record.record_version,
            current_month: record.current_month.clone(),
        })
    }
}

fn record_from_item(uaid: &Uaid, item: RouterItem) -> Result<RouterRecord> {
    Ok(RouterRecord {
        uaid: *uaid,
        connected_at: item.connected_at,
        router_type: item.router_type,
        router_data: item
            .router_data
            .map(|text| serde_json::from_str(&text))
            .transpose()?,
        last_connect: item.last_connect,
        node_id: item.node_id,
        record_version: item.record_version,
        current_month: item.current_month,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use crate::{RangeStore, SqliteRangeStore};
    use chrono::Datelike;
    use pushstore_keys::TableEpoch;

    fn test_router() -> RouterTable {
        let store = SqliteRangeStore::open_memory().expect("open test store");
        store.create_router_table("router").expect("router table");
        let ctx = TableContext::new(Arc::new(store), "router").expect("context");
        RouterTable::new(ctx, LastConnectGenerator::default())
    }

    fn rotation() -> TableRotation {
        TableRotation::new("message", 3).expect("rotation")
    }

    fn record(uaid: Uaid, connected_at: u64, node: &str, month: &str) -> RouterRecord {
        RouterRecord {
            connected_at,
            node_id: Some(node.to_string()),
            current_month: Some(month.to_string()),
            ..RouterRecord::new(uaid)
        }
    }

    #[test]
    fn test_register_and_get() {
        let router = test_router();
        let uaid = Uaid::new_v4();
        let mut user = record(uaid, 100, "node-a", "message_2024_01");
        user.router_data = Some(HashMap::from([(
            "token".to_string(),
            serde_json::json!("abc"),
        )]));
        assert!(router.register_user(&user).expect("register"));
        assert_eq!(router.get_user(&uaid).expect("get"), Some(user));
        assert_eq!(router.get_user(&Uaid::new_v4()).expect("get"), None);
    }

    #[test]
    fn test_newer_connection_wins() {
        let router = test_router();
        let uaid = Uaid::new_v4();
        router
            .register_user(&record(uaid, 200, "node-b", "message_2024_01"))
            .expect("newer");
        assert!(!router
            .register_user(&record(uaid, 100, "node-a", "message_2024_01"))
            .expect("older"));
        let stored = router.get_user(&uaid).expect("get").expect("user");
        assert_eq!(stored.node_id.as_deref(), Some("node-b"));
    }

    #[test]
    fn test_remove_node_id() {
        let router = test_router();
        let uaid = Uaid::new_v4();
        router
            .register_user(&record(uaid, 100, "node-a", "message_2024_01"))
            .expect("register");
        assert!(!router.remove_node_id(&uaid, "node-b", 100).expect("other node"));
        assert!(router.remove_node_id(&uaid, "node-a", 100).expect("own node"));
        let stored = router.get_user(&uaid).expect("get").expect("user");
        assert_eq!(stored.node_id, None);
    }

    #[test]
    fn test_update_message_month() {
        let router = test_router();
        let uaid = Uaid::new_v4();
        router
            .register_user(&record(uaid, 100, "node-a", "message_2024_01"))
            .expect("register");
        assert!(router
            .update_message_month(&uaid, "message_2024_02")
            .expect("update"));
        let stored = router.get_user(&uaid).expect("get").expect("user");
        assert_eq!(stored.current_month.as_deref(), Some("message_2024_02"));
        assert!(has_connected_this_month(
            &stored,
            chrono::Utc::now().date_naive()
        ));
        assert!(!router
            .update_message_month(&Uaid::new_v4(), "message_2024_02")
            .expect("unknown user"));
    }

    #[test]
    fn test_lookup_unknown_user() {
        let router = test_router();
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).expect("date");
        let outcome = router
            .lookup_user(&Uaid::new_v4(), 1, &rotation(), today)
            .expect("lookup");
        assert_eq!(outcome.user, None);
        assert_eq!(outcome.message_month, "message_2024_03");
        assert!(!outcome.check_storage);
        assert!(!outcome.reset_uaid);
    }

    #[test]
    fn test_lookup_current_month_user() {
        let router = test_router();
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).expect("date");
        let uaid = Uaid::new_v4();
        router
            .register_user(&record(uaid, 100, "node-a", "message_2024_03"))
            .expect("register");

        let outcome = router
            .lookup_user(&uaid, 500, &rotation(), today)
            .expect("lookup");
        assert!(outcome.check_storage);
        assert!(!outcome.rotate_message_table);
        assert!(!outcome.reset_uaid);
        assert_eq!(outcome.message_month, "message_2024_03");
        let user = outcome.user.expect("user");
        assert_eq!(user.connected_at, 500);

        // last_connect was stamped for the real current month.
        let stored = router.get_user(&uaid).expect("get").expect("user");
        assert_eq!(stored.last_connect, user.last_connect);
        let stamped = stored.last_connect.expect("last_connect").to_string();
        let now = chrono::Utc::now();
        assert!(stamped.starts_with(&format!("{}{:02}", now.year(), now.month())));
    }

    #[test]
    fn test_lookup_keeps_recent_last_connect() {
        let router = test_router();
        let today = chrono::Utc::now().date_naive();
        let month = TableEpoch::from_date(today).table_name("message");
        let uaid = Uaid::new_v4();
        let mut user = record(uaid, 100, "node-a", &month);
        let stamp = format!("{}{:02}000007", today.year(), today.month())
            .parse::<u64>()
            .expect("stamp");
        user.last_connect = Some(stamp);
        router.register_user(&user).expect("register");

        let outcome = router
            .lookup_user(&uaid, 500, &rotation(), today)
            .expect("lookup");
        assert_eq!(outcome.user.expect("user").last_connect, Some(stamp));
    }

    #[test]
    fn test_lookup_previous_month_rotates() {
        let router = test_router();
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).expect("date");
        let uaid = Uaid::new_v4();
        let mut user = record(uaid, 100, "node-a", "message_2024_02");
        user.record_version = None;
        router.register_user(&user).expect("register");

        let outcome = router
            .lookup_user(&uaid, 500, &rotation(), today)
            .expect("lookup");
        assert!(outcome.rotate_message_table);
        assert!(outcome.reset_uaid);
        assert_eq!(outcome.message_month, "message_2024_02");
    }

    #[test]
    fn test_lookup_expired_month_drops_user() {
        let router = test_router();
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).expect("date");
        let uaid = Uaid::new_v4();
        router
            .register_user(&record(uaid, 100, "node-a", "message_2023_11"))
            .expect("register");

        let outcome = router
            .lookup_user(&uaid, 500, &rotation(), today)
            .expect("lookup");
        assert_eq!(outcome.user, None);
        assert!(!outcome.reset_uaid);
        assert!(!outcome.check_storage);
        assert_eq!(outcome.message_month, "message_2024_03");
        assert_eq!(router.get_user(&uaid).expect("get"), None);

        // The same UAID registers again into the current month.
        let again = record(uaid, 600, "node-b", &outcome.message_month);
        assert!(router.register_user(&again).expect("re-register"));
        let stored = router.get_user(&uaid).expect("get").expect("user");
        assert_eq!(stored.current_month.as_deref(), Some("message_2024_03"));
    }
}
