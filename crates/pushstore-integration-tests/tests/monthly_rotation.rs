//! Integration test: monthly table rotation.
//!
//! 1. A subscriber registered last month is told to rotate on connect
//! 2. `migrate_user` carries the channel set forward and repoints the router
//! 3. The next lookup reads from the current month
//! 4. A subscriber whose month has aged out is dropped and registers again

use std::collections::BTreeSet;

use chrono::NaiveDate;
use pushstore_db::migrate::drop_unretained_tables;
use pushstore_db::{migrate_user, StoreSettings};
use pushstore_integration_tests::Harness;
use pushstore_keys::get_month_from;
use pushstore_keys::TableEpoch;
use pushstore_types::time::ms_since_epoch;
use pushstore_types::{ChannelId, Notification, RouterRecord, Uaid};

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 31).expect("date")
}

fn previous_table() -> String {
    TableEpoch::from_date(get_month_from(today(), -1)).table_name("message")
}

#[test]
fn previous_month_user_is_migrated() {
    let h = Harness::in_memory(StoreSettings::default(), today()).expect("harness");
    let router = h.router().expect("router");
    let old_table = previous_table();
    assert_eq!(old_table, "message_2024_02");

    let uaid = Uaid::new_v4();
    let channels = BTreeSet::from([ChannelId::new_v4(), ChannelId::new_v4()]);
    let old_registry = h.registry(&old_table).expect("old registry");
    for chid in &channels {
        old_registry.register_channel(&uaid, chid, None).expect("register");
    }
    let mut user = RouterRecord::new(uaid);
    user.node_id = Some("node-1".to_string());
    user.current_month = Some(old_table.clone());
    assert!(router.register_user(&user).expect("register user"));

    let connected_at = ms_since_epoch();
    let outcome = router
        .lookup_user(&uaid, connected_at, &h.rotation, today())
        .expect("lookup");
    assert!(outcome.check_storage);
    assert!(outcome.rotate_message_table);
    assert_eq!(outcome.message_month, old_table);

    // Old-month messages are still delivered before the move.
    let old_messages = h.messages(&old_table).expect("old messages");
    old_messages
        .store_message(&Notification::new(uaid, *channels.first().expect("chid"), "m", 60))
        .expect("store");
    let pending = old_messages
        .check_storage(&uaid, true, None, 10)
        .expect("check");
    assert_eq!(pending.messages.len(), 1);

    let new_registry = h.registry(&h.current_table()).expect("new registry");
    migrate_user(&uaid, &old_registry, &new_registry, &router).expect("migrate");
    assert_eq!(
        new_registry.all_channels(&uaid).expect("all_channels"),
        (true, channels)
    );

    let after = router
        .lookup_user(&uaid, connected_at, &h.rotation, today())
        .expect("lookup");
    assert!(!after.rotate_message_table);
    assert_eq!(after.message_month, "message_2024_03");
}

#[test]
fn aged_out_user_is_dropped() {
    let h = Harness::in_memory(StoreSettings::default(), today()).expect("harness");
    let router = h.router().expect("router");
    let uaid = Uaid::new_v4();
    let mut user = RouterRecord::new(uaid);
    user.current_month = Some("message_2023_12".to_string());
    router.register_user(&user).expect("register user");

    let outcome = router
        .lookup_user(&uaid, ms_since_epoch(), &h.rotation, today())
        .expect("lookup");
    assert!(!outcome.reset_uaid);
    assert!(outcome.user.is_none());
    assert_eq!(outcome.message_month, "message_2024_03");
    assert!(router.get_user(&uaid).expect("get").is_none());

    let mut fresh = RouterRecord::new(uaid);
    fresh.current_month = Some(outcome.message_month.clone());
    assert!(router.register_user(&fresh).expect("register again"));
}

#[test]
fn retired_tables_are_dropped() {
    let h = Harness::in_memory(StoreSettings::default(), today()).expect("harness");
    h.store
        .create_message_table("message_2023_10")
        .expect("old table");

    let dropped = drop_unretained_tables(h.store.as_ref(), &h.rotation, today()).expect("drop");
    assert_eq!(dropped, vec!["message_2023_10"]);
    assert_eq!(
        h.store.list_message_tables().expect("list"),
        vec![
            "message_2024_01",
            "message_2024_02",
            "message_2024_03",
            "message_2024_04"
        ]
    );
}
