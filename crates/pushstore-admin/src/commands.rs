//! Admin command handlers. Each returns a JSON report.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use pushstore_db::migrate::{drop_unretained_tables, ensure_rotation_tables};
use pushstore_db::{
    CallStats, ChannelRegistry, MessageStore, RangeStore, RouterTable, SqliteRangeStore,
    StoreSettings,
};
use pushstore_types::Uaid;
use serde_json::{json, Value};
use tracing::info;

/// Operator tool for the notification store.
#[derive(Debug, Parser)]
#[command(name = "pushstore-admin", long_about = None)]
pub struct Cli {
    /// Settings file. Defaults to `$PUSHSTORE_CONFIG`, then
    /// `$PUSHSTORE_DATA_DIR/config.toml`.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Create the current and next month's tables, drop retired ones.
    Rotate,
    /// Delete expired rows from every message table.
    Sweep,
    /// List message tables.
    Tables,
    /// Show a subscriber's router record, channels and pending messages.
    Inspect { uaid: Uaid },
}

pub fn run(
    settings: &StoreSettings,
    command: &Command,
    now: DateTime<Utc>,
) -> anyhow::Result<Value> {
    let store = Arc::new(SqliteRangeStore::open(
        &settings.database_path(),
        settings.database.busy_timeout_ms,
    )?);
    run_with_store(settings, store, command, now)
}

pub fn run_with_store(
    settings: &StoreSettings,
    store: Arc<dyn RangeStore>,
    command: &Command,
    now: DateTime<Utc>,
) -> anyhow::Result<Value> {
    let today = now.date_naive();
    let rotation = settings.rotation()?;
    match command {
        Command::Rotate => {
            store.create_router_table(&settings.tables.router_table)?;
            let created = ensure_rotation_tables(store.as_ref(), &rotation, today)?;
            let dropped = drop_unretained_tables(store.as_ref(), &rotation, today)?;
            info!(created = created.len(), dropped = dropped.len(), "rotation done");
            Ok(json!({ "created": created, "dropped": dropped }))
        }
        Command::Sweep => {
            let cutoff = now.timestamp().max(0) as u64;
            let mut removed = serde_json::Map::new();
            for table in store.list_message_tables()? {
                let count = store.sweep_expired(&table, cutoff)?;
                info!(table = %table, count, "swept expired rows");
                removed.insert(table, json!(count));
            }
            Ok(Value::Object(removed))
        }
        Command::Tables => Ok(json!({
            "router": settings.tables.router_table,
            "messages": store.list_message_tables()?,
            "retained": rotation.retained_tables(today),
        })),
        Command::Inspect { uaid } => {
            inspect(settings, store, uaid, &rotation.current_table(today))
        }
    }
}

fn inspect(
    settings: &StoreSettings,
    store: Arc<dyn RangeStore>,
    uaid: &Uaid,
    current_table: &str,
) -> anyhow::Result<Value> {
    let stats = Arc::new(CallStats::new(settings.diagnostics.track_db_calls));
    let router_ctx = settings.context(
        Arc::clone(&store),
        &settings.tables.router_table,
        Arc::clone(&stats),
    )?;
    let router = RouterTable::new(router_ctx.clone(), settings.last_connect());
    let user = router.get_user(uaid)?;
    let month = user
        .as_ref()
        .and_then(|user| user.current_month.clone())
        .unwrap_or_else(|| current_table.to_string());
    if !store.list_message_tables()?.contains(&month) {
        bail!("message table {month} does not exist");
    }

    let message_ctx = router_ctx.for_table(month.clone())?;
    let (registered, channels) = ChannelRegistry::new(message_ctx.clone()).all_channels(uaid)?;
    let messages = MessageStore::new(message_ctx);
    let limit = settings.messages.fetch_limit;
    let topic = messages.fetch_messages(uaid, limit)?;
    let timestamped = messages.fetch_timestamp_messages(uaid, topic.timestamp, limit)?;

    Ok(json!({
        "uaid": uaid,
        "user": user,
        "message_month": month,
        "registered": registered,
        "channels": channels,
        "watermark": topic.timestamp,
        "topic_messages": topic.messages,
        "pending_messages": timestamped.messages,
        "db_calls": stats.snapshot(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pushstore_types::{ChannelId, Notification};

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0)
            .single()
            .expect("valid time")
    }

    #[test]
    fn test_parse_commands() {
        let cli = Cli::try_parse_from(["pushstore-admin", "rotate"]).expect("parse");
        assert_eq!(cli.command, Command::Rotate);
        assert_eq!(cli.config, None);

        let cli = Cli::try_parse_from(["pushstore-admin", "--config=/etc/push.toml", "tables"])
            .expect("parse --opt=value");
        assert_eq!(cli.config, Some(PathBuf::from("/etc/push.toml")));
        assert_eq!(cli.command, Command::Tables);

        let cli = Cli::try_parse_from(["pushstore-admin", "--config", "push.toml", "sweep"])
            .expect("parse --opt value");
        assert_eq!(cli.config, Some(PathBuf::from("push.toml")));

        let uaid = "11111111-1111-1111-1111-111111111111";
        let cli = Cli::try_parse_from(["pushstore-admin", "inspect", uaid]).expect("parse");
        assert_eq!(
            cli.command,
            Command::Inspect {
                uaid: Uaid::parse(uaid).expect("uaid")
            }
        );

        assert!(Cli::try_parse_from(["pushstore-admin"]).is_err());
        assert!(Cli::try_parse_from(["pushstore-admin", "inspect", "nope"]).is_err());
        assert!(Cli::try_parse_from(["pushstore-admin", "frobnicate"]).is_err());
    }

    #[test]
    fn test_rotate_then_tables() {
        let settings = StoreSettings::default();
        let store: Arc<dyn RangeStore> =
            Arc::new(SqliteRangeStore::open_memory().expect("open store"));
        let now = at(2024, 5, 20);

        let report = run_with_store(&settings, Arc::clone(&store), &Command::Rotate, now)
            .expect("rotate");
        assert_eq!(report["created"], json!(["message_2024_05", "message_2024_06"]));

        let tables = run_with_store(&settings, store, &Command::Tables, now).expect("tables");
        assert_eq!(tables["router"], "router");
        assert_eq!(
            tables["retained"],
            json!(["message_2024_03", "message_2024_04", "message_2024_05"])
        );
    }

    #[test]
    fn test_inspect_reports_channels_and_messages() {
        let settings = StoreSettings::default();
        let store: Arc<dyn RangeStore> =
            Arc::new(SqliteRangeStore::open_memory().expect("open store"));
        let now = Utc::now();
        run_with_store(&settings, Arc::clone(&store), &Command::Rotate, now).expect("rotate");

        let rotation = settings.rotation().expect("rotation");
        let table = rotation.current_table(now.date_naive());
        let ctx = settings
            .context(Arc::clone(&store), &table, Arc::new(CallStats::default()))
            .expect("ctx");
        let uaid = Uaid::new_v4();
        let chid = ChannelId::new_v4();
        ChannelRegistry::new(ctx.clone())
            .register_channel(&uaid, &chid, None)
            .expect("register");
        MessageStore::new(ctx)
            .store_message(&Notification::new(uaid, chid, "m1", 60).with_sortkey_timestamp(5))
            .expect("store");

        let report = run_with_store(&settings, store, &Command::Inspect { uaid }, now)
            .expect("inspect");
        assert_eq!(report["registered"], json!(true));
        assert_eq!(report["channels"], json!([chid.to_string()]));
        assert_eq!(report["pending_messages"][0]["message_id"], "m1");
        assert_eq!(report["user"], Value::Null);
    }

    #[test]
    fn test_sweep_file_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut settings = StoreSettings::default();
        settings.database.path = dir.path().join("push.db").display().to_string();
        let now = at(2024, 5, 20);
        run(&settings, &Command::Rotate, now).expect("rotate");
        let report = run(&settings, &Command::Sweep, now).expect("sweep");
        assert_eq!(report["message_2024_05"], json!(0));
    }
}
