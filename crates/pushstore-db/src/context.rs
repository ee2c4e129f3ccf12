//! Shared handle to one table of a range store.

use std::fmt;
use std::sync::Arc;

use pushstore_keys::rotation::validate_table_name;
use pushstore_keys::UaidHasher;
use pushstore_types::{Uaid, MAX_RETENTION_SECS};

use crate::engine::RangeStore;
use crate::stats::{CallStats, DbOp};
use crate::{Result, StoreError};

/// Store, table name, partition key hasher and retention cap.
///
/// Everything a table-level component needs is injected here; cloning is
/// cheap and clones share the store and counters.
#[derive(Clone)]
pub struct TableContext {
    store: Arc<dyn RangeStore>,
    table: String,
    hasher: UaidHasher,
    max_ttl: u64,
    stats: Arc<CallStats>,
}

impl TableContext {
    pub fn new(store: Arc<dyn RangeStore>, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_table_name(&table).map_err(|_| StoreError::InvalidTableName(table.clone()))?;
        Ok(Self {
            store,
            table,
            hasher: UaidHasher::disabled(),
            max_ttl: MAX_RETENTION_SECS,
            stats: Arc::new(CallStats::default()),
        })
    }

    pub fn with_hasher(mut self, hasher: UaidHasher) -> Self {
        self.hasher = hasher;
        self
    }

    /// Cap on stored lifetimes. Never above [`MAX_RETENTION_SECS`].
    pub fn with_max_ttl(mut self, max_ttl: u64) -> Self {
        self.max_ttl = max_ttl.min(MAX_RETENTION_SECS);
        self
    }

    pub fn with_stats(mut self, stats: Arc<CallStats>) -> Self {
        self.stats = stats;
        self
    }

    /// The same store and keys, pointed at another table.
    pub fn for_table(&self, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_table_name(&table).map_err(|_| StoreError::InvalidTableName(table.clone()))?;
        Ok(Self {
            table,
            ..self.clone()
        })
    }

    pub fn store(&self) -> &dyn RangeStore {
        self.store.as_ref()
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn hasher(&self) -> &UaidHasher {
        &self.hasher
    }

    pub fn max_ttl(&self) -> u64 {
        self.max_ttl
    }

    pub fn stats(&self) -> &CallStats {
        &self.stats
    }

    /// Physical partition key of `uaid`.
    pub fn partition_key(&self, uaid: &Uaid) -> String {
        self.hasher.partition_key(uaid)
    }

    /// `now + min(ttl, max_ttl)`; a missing ttl means the maximum.
    pub fn expiry_at(&self, now: u64, ttl: Option<u64>) -> u64 {
        let ttl = ttl.map_or(self.max_ttl, |ttl| ttl.min(self.max_ttl));
        now.saturating_add(ttl)
    }

    pub(crate) fn track<T>(&self, op: DbOp, call: impl FnOnce() -> Result<T>) -> Result<T> {
        let result = call();
        self.stats.record(op, &result);
        result
    }
}

impl fmt::Debug for TableContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableContext")
            .field("table", &self.table)
            .field("hasher", &self.hasher)
            .field("max_ttl", &self.max_ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SqliteRangeStore;

    fn test_ctx() -> TableContext {
        let store = SqliteRangeStore::open_memory().expect("open test store");
        TableContext::new(Arc::new(store), "message_2024_01").expect("context")
    }

    #[test]
    fn test_expiry_is_clamped() {
        let ctx = test_ctx();
        assert_eq!(ctx.expiry_at(1000, Some(60)), 1060);
        assert_eq!(ctx.expiry_at(1000, Some(0)), 1000);
        assert_eq!(ctx.expiry_at(1000, Some(u64::MAX)), 1000 + MAX_RETENTION_SECS);
        assert_eq!(ctx.expiry_at(1000, None), 1000 + MAX_RETENTION_SECS);

        let short = ctx.with_max_ttl(100);
        assert_eq!(short.expiry_at(1000, Some(500)), 1100);
        assert_eq!(short.with_max_ttl(u64::MAX).max_ttl(), MAX_RETENTION_SECS);
    }

    #[test]
    fn test_partition_key_follows_hasher() {
        let ctx = test_ctx();
        let uaid = Uaid::parse("deadbeef-0000-0000-0000-000000000001").expect("uaid");
        assert_eq!(ctx.partition_key(&uaid), "deadbeef000000000000000000000001");

        let hashed = ctx.with_hasher(UaidHasher::new(b"secret").expect("hasher"));
        let key = hashed.partition_key(&uaid);
        assert_eq!(key.len(), 64);
        assert_ne!(key, uaid.simple());
    }

    #[test]
    fn test_rejects_bad_table() {
        let ctx = test_ctx();
        assert!(ctx.for_table("message_2024_02").is_ok());
        assert!(matches!(
            ctx.for_table("x; DROP TABLE y"),
            Err(StoreError::InvalidTableName(_))
        ));
    }
}
