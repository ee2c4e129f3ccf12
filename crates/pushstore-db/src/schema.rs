//! SQL schema.
//!
//! The fixed schema only holds the table catalog. Router and message tables
//! are created by name at runtime; callers validate names with
//! [`pushstore_keys::rotation::validate_table_name`] before they reach here.

/// Initial schema (v1).
pub const SCHEMA_V1: &str = r#"
-- Catalog of router and rotating message tables
CREATE TABLE IF NOT EXISTS store_tables (
    name        TEXT PRIMARY KEY,
    kind        TEXT NOT NULL CHECK (kind IN ('router', 'message')),
    created_at  INTEGER NOT NULL
);
"#;

/// DDL for one message table.
///
/// `chidmessageid` is the sort key. The channel metadata row uses `chids`
/// (JSON array) and `"current_timestamp"`; message rows use the rest.
pub fn message_table(name: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {name} (
    uaid                TEXT NOT NULL,
    chidmessageid       TEXT NOT NULL,
    chids               TEXT,
    "current_timestamp" INTEGER,
    headers             TEXT,
    data                TEXT,
    ttl                 INTEGER,
    timestamp           INTEGER,
    updateid            TEXT,
    expiry              INTEGER NOT NULL,
    PRIMARY KEY (uaid, chidmessageid)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_{name}_expiry ON {name}(expiry);
"#
    )
}

/// DDL for the router table.
pub fn router_table(name: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {name} (
    uaid            TEXT PRIMARY KEY,
    connected_at    INTEGER NOT NULL,
    router_type     TEXT NOT NULL,
    router_data     TEXT,
    last_connect    INTEGER,
    node_id         TEXT,
    record_version  INTEGER,
    current_month   TEXT
);

CREATE INDEX IF NOT EXISTS idx_{name}_last_connect ON {name}(last_connect);
"#
    )
}
