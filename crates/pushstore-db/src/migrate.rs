//! Monthly table rotation.
//!
//! Messages are not copied between months. A subscriber found in an older
//! month has its channel set carried into the current month and its router
//! record repointed; anything left in the old table ages out with it.

use chrono::NaiveDate;
use pushstore_keys::{TableEpoch, TableRotation};
use pushstore_types::Uaid;
use tracing::info;

use crate::engine::RangeStore;
use crate::registry::ChannelRegistry;
use crate::router::RouterTable;
use crate::Result;

/// Move `uaid` from the month behind `from` into the month behind `to`.
pub fn migrate_user(
    uaid: &Uaid,
    from: &ChannelRegistry,
    to: &ChannelRegistry,
    router: &RouterTable,
) -> Result<()> {
    let (_, channels) = from.all_channels(uaid)?;
    if !channels.is_empty() {
        to.save_channels(uaid, &channels)?;
    }
    router.update_message_month(uaid, to.table())?;
    info!(
        from = from.table(),
        to = to.table(),
        channels = channels.len(),
        "migrated user"
    );
    Ok(())
}

/// Create this month's and next month's tables. Returns the ones created.
pub fn ensure_rotation_tables(
    store: &dyn RangeStore,
    rotation: &TableRotation,
    today: NaiveDate,
) -> Result<Vec<String>> {
    let mut created = Vec::new();
    for table in [rotation.current_table(today), rotation.next_table(today)] {
        if store.create_message_table(&table)? {
            created.push(table);
        }
    }
    Ok(created)
}

/// Drop message tables older than the oldest retained month. Tables whose
/// names do not parse as months of this rotation are left alone.
pub fn drop_unretained_tables(
    store: &dyn RangeStore,
    rotation: &TableRotation,
    today: NaiveDate,
) -> Result<Vec<String>> {
    let Some(oldest) = rotation.retained_epochs(today).first().copied() else {
        return Ok(Vec::new());
    };
    let mut dropped = Vec::new();
    for table in store.list_message_tables()? {
        let Ok(epoch) = TableEpoch::parse_table_name(rotation.prefix(), &table) else {
            continue;
        };
        if epoch < oldest && store.drop_message_table(&table)? {
            dropped.push(table);
        }
    }
    Ok(dropped)
}
