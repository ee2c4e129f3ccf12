//! pushstore-admin: operator tool for the notification store.
//!
//! Creates and retires monthly message tables, sweeps expired rows and
//! inspects a single subscriber.

mod commands;

use anyhow::Context;
use clap::Parser;
use pushstore_db::StoreSettings;
use tracing::info;

use crate::commands::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => StoreSettings::load(path)?,
        None => StoreSettings::load_default()?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("pushstore={}", settings.diagnostics.log_level).parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let db_path = settings.database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    info!("Opening store at {:?}", db_path);

    let output = commands::run(&settings, &cli.command, chrono::Utc::now())?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
