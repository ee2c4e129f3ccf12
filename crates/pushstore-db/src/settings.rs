//! Store configuration.
//!
//! Read from a TOML file; every field has a default, so a missing file or
//! a partial one is fine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pushstore_keys::rotation::DEFAULT_LAST_CONNECT_BUCKETS;
use pushstore_keys::{LastConnectGenerator, TableRotation, UaidHasher};
use pushstore_types::MAX_RETENTION_SECS;
use serde::{Deserialize, Serialize};

use crate::context::TableContext;
use crate::engine::RangeStore;
use crate::stats::CallStats;
use crate::{Result, StoreError, DEFAULT_BUSY_TIMEOUT_MS};

/// Complete store configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub tables: TableSettings,
    #[serde(default)]
    pub messages: MessageSettings,
    #[serde(default)]
    pub keys: KeySettings,
    #[serde(default)]
    pub diagnostics: DiagnosticsSettings,
}

/// Database file settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Database file. Empty = `$data_dir/pushstore.db`.
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

/// Table naming and rotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSettings {
    #[serde(default = "default_router_table")]
    pub router_table: String,
    #[serde(default = "default_message_prefix")]
    pub message_table_prefix: String,
    /// Valid message epochs: the current month and the ones before it.
    #[serde(default = "default_retained_months")]
    pub retained_months: u32,
}

/// Message retention and read sizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSettings {
    #[serde(default = "default_max_ttl")]
    pub max_ttl_secs: u64,
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
}

/// Partition key and index settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeySettings {
    /// Hex HMAC key for UAID pseudonymization. Empty = disabled.
    #[serde(default)]
    pub uaid_hash_key: String,
    #[serde(default = "default_last_connect_buckets")]
    pub last_connect_buckets: u32,
}

/// Logging and counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsSettings {
    #[serde(default)]
    pub track_db_calls: bool,
    /// Log level: "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default value functions

fn default_busy_timeout() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

fn default_router_table() -> String {
    "router".to_string()
}

fn default_message_prefix() -> String {
    "message".to_string()
}

fn default_retained_months() -> u32 {
    3
}

fn default_max_ttl() -> u64 {
    MAX_RETENTION_SECS
}

fn default_fetch_limit() -> usize {
    10
}

fn default_last_connect_buckets() -> u32 {
    DEFAULT_LAST_CONNECT_BUCKETS
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: String::new(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

impl Default for TableSettings {
    fn default() -> Self {
        Self {
            router_table: default_router_table(),
            message_table_prefix: default_message_prefix(),
            retained_months: default_retained_months(),
        }
    }
}

impl Default for MessageSettings {
    fn default() -> Self {
        Self {
            max_ttl_secs: default_max_ttl(),
            fetch_limit: default_fetch_limit(),
        }
    }
}

impl Default for KeySettings {
    fn default() -> Self {
        Self {
            uaid_hash_key: String::new(),
            last_connect_buckets: default_last_connect_buckets(),
        }
    }
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        Self {
            track_db_calls: false,
            log_level: default_log_level(),
        }
    }
}

impl StoreSettings {
    /// Load settings from `path`, falling back to defaults if it does not
    /// exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Load from `$PUSHSTORE_CONFIG`, else `$data_dir/config.toml`.
    pub fn load_default() -> Result<Self> {
        Self::load(&Self::config_path())
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: StoreSettings =
            toml::from_str(content).map_err(|e| StoreError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that would fail later at first use.
    pub fn validate(&self) -> Result<()> {
        self.rotation()?;
        self.hasher()?;
        pushstore_keys::rotation::validate_table_name(&self.tables.router_table)
            .map_err(|e| StoreError::Config(e.to_string()))?;
        if self.messages.fetch_limit == 0 {
            return Err(StoreError::Config("fetch_limit must be positive".to_string()));
        }
        Ok(())
    }

    /// Directory holding the database and config file.
    pub fn data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("PUSHSTORE_DATA_DIR") {
            return PathBuf::from(dir);
        }
        std::env::var("HOME")
            .map(|home| PathBuf::from(home).join(".pushstore"))
            .unwrap_or_else(|_| PathBuf::from("/tmp/pushstore"))
    }

    fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("PUSHSTORE_CONFIG") {
            return PathBuf::from(path);
        }
        Self::data_dir().join("config.toml")
    }

    pub fn database_path(&self) -> PathBuf {
        if self.database.path.is_empty() {
            Self::data_dir().join("pushstore.db")
        } else {
            PathBuf::from(&self.database.path)
        }
    }

    pub fn hasher(&self) -> Result<UaidHasher> {
        UaidHasher::from_hex(&self.keys.uaid_hash_key)
            .map_err(|e| StoreError::Config(e.to_string()))
    }

    pub fn rotation(&self) -> Result<TableRotation> {
        TableRotation::new(
            self.tables.message_table_prefix.clone(),
            self.tables.retained_months,
        )
        .map_err(|e| StoreError::Config(e.to_string()))
    }

    pub fn last_connect(&self) -> LastConnectGenerator {
        LastConnectGenerator::new(self.keys.last_connect_buckets)
    }

    /// A context over `table` carrying the configured keys and limits.
    pub fn context(
        &self,
        store: Arc<dyn RangeStore>,
        table: &str,
        stats: Arc<CallStats>,
    ) -> Result<TableContext> {
        Ok(TableContext::new(store, table)?
            .with_hasher(self.hasher()?)
            .with_max_ttl(self.messages.max_ttl_secs)
            .with_stats(stats))
    }
}
