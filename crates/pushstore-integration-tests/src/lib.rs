//! Integration test fixtures for the notification store.
//!
//! The scenarios under `tests/` drive the store through the same handles a
//! connection service would hold: a router table plus a registry and a
//! message store per monthly table.
//!
//! Run them with:
//! ```sh
//! cargo test -p pushstore-integration-tests
//! ```

use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use pushstore_db::migrate::ensure_rotation_tables;
use pushstore_db::{
    CallStats, ChannelRegistry, MessageStore, RangeStore, Result, RouterTable, SqliteRangeStore,
    StoreSettings, TableContext,
};
use pushstore_keys::TableRotation;

/// Store handles for one process.
pub struct Harness {
    pub settings: StoreSettings,
    pub store: Arc<dyn RangeStore>,
    pub stats: Arc<CallStats>,
    pub rotation: TableRotation,
    pub today: NaiveDate,
}

impl Harness {
    /// In-memory store with tables for `today`'s month and the retained
    /// months before it.
    pub fn in_memory(settings: StoreSettings, today: NaiveDate) -> Result<Self> {
        let store = SqliteRangeStore::open_memory()?;
        Self::with_store(settings, Arc::new(store), today)
    }

    /// File-backed store; several harnesses may share `path`.
    pub fn on_disk(settings: StoreSettings, path: &Path, today: NaiveDate) -> Result<Self> {
        let store = SqliteRangeStore::open(path, settings.database.busy_timeout_ms)?;
        Self::with_store(settings, Arc::new(store), today)
    }

    fn with_store(
        settings: StoreSettings,
        store: Arc<dyn RangeStore>,
        today: NaiveDate,
    ) -> Result<Self> {
        let rotation = settings.rotation()?;
        store.create_router_table(&settings.tables.router_table)?;
        for table in rotation.retained_tables(today) {
            store.create_message_table(&table)?;
        }
        ensure_rotation_tables(store.as_ref(), &rotation, today)?;
        let stats = Arc::new(CallStats::new(settings.diagnostics.track_db_calls));
        Ok(Self {
            settings,
            store,
            stats,
            rotation,
            today,
        })
    }

    pub fn current_table(&self) -> String {
        self.rotation.current_table(self.today)
    }

    pub fn context(&self, table: &str) -> Result<TableContext> {
        self.settings
            .context(Arc::clone(&self.store), table, Arc::clone(&self.stats))
    }

    pub fn registry(&self, table: &str) -> Result<ChannelRegistry> {
        Ok(ChannelRegistry::new(self.context(table)?))
    }

    pub fn messages(&self, table: &str) -> Result<MessageStore> {
        Ok(MessageStore::new(self.context(table)?))
    }

    pub fn router(&self) -> Result<RouterTable> {
        Ok(RouterTable::new(
            self.context(&self.settings.tables.router_table)?,
            self.settings.last_connect(),
        ))
    }
}
