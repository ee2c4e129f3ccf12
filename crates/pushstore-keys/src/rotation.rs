//! Monthly table rotation and the bucketed `last_connect` index.
//!
//! Messages live in one table per calendar month ("table epoch"). A
//! subscriber's router record names the epoch holding its messages; when the
//! month rolls over the subscriber is migrated forward on next connect.
//!
//! Month arithmetic steps the calendar date 14 days at a time until the month
//! changes, once per month of `delta`. Table names depend on agreeing with
//! that stepping exactly, so it is kept as is rather than replaced with
//! calendar "add N months" arithmetic.

use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use pushstore_types::RouterRecord;
use rand::Rng;

use crate::{KeyError, Result};

/// Step used when walking across month boundaries.
const MONTH_STEP_DAYS: i64 = 14;

/// Upper bound on the random `last_connect` bucket (four digit field).
pub const MAX_LAST_CONNECT_BUCKETS: u32 = 10_000;

/// Default number of random `last_connect` buckets per hour.
pub const DEFAULT_LAST_CONNECT_BUCKETS: u32 = 10;

/// The date `delta` months away from `today`.
pub fn get_month_from(today: NaiveDate, delta: i32) -> NaiveDate {
    let step = Duration::days(MONTH_STEP_DAYS);
    let mut new = today;
    let mut last = today;
    for _ in 0..delta.unsigned_abs() {
        while new.month() == last.month() {
            if delta < 0 {
                new -= step;
            } else {
                new += step;
            }
        }
        last = new;
    }
    new
}

/// The date `delta` months away from today (UTC).
pub fn get_month(delta: i32) -> NaiveDate {
    get_month_from(Utc::now().date_naive(), delta)
}

/// Whether `record.last_connect` falls in the month of `today`.
pub fn has_connected_this_month(record: &RouterRecord, today: NaiveDate) -> bool {
    record.last_connect.is_some_and(|last_connect| {
        let prefix = format!("{}{:02}", today.year(), today.month());
        last_connect.to_string().starts_with(&prefix)
    })
}

/// Compose a `YYYYMMHHNNNN` index value for `now` with a random bucket.
///
/// Spreads one month's connections over `24 * buckets` keys instead of a
/// single hot one. This is an index value, not a primary key.
pub fn generate_last_connect<R: Rng>(now: DateTime<Utc>, rng: &mut R, buckets: u32) -> u64 {
    let buckets = buckets.clamp(1, MAX_LAST_CONNECT_BUCKETS);
    let bucket = u64::from(rng.gen_range(0..buckets));
    let year = u64::try_from(now.year()).unwrap_or_default();
    year * 100_000_000
        + u64::from(now.month()) * 1_000_000
        + u64::from(now.hour()) * 10_000
        + bucket
}

/// Configured `last_connect` generator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LastConnectGenerator {
    buckets: u32,
}

impl Default for LastConnectGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_LAST_CONNECT_BUCKETS)
    }
}

impl LastConnectGenerator {
    pub fn new(buckets: u32) -> Self {
        Self {
            buckets: buckets.clamp(1, MAX_LAST_CONNECT_BUCKETS),
        }
    }

    pub fn buckets(&self) -> u32 {
        self.buckets
    }

    /// A value for the current hour.
    pub fn generate(&self) -> u64 {
        generate_last_connect(Utc::now(), &mut rand::thread_rng(), self.buckets)
    }

    /// A value for `now` drawn from `rng`.
    pub fn generate_with<R: Rng>(&self, now: DateTime<Utc>, rng: &mut R) -> u64 {
        generate_last_connect(now, rng, self.buckets)
    }
}

/// A calendar month identifying one message table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableEpoch {
    year: i32,
    month: u32,
}

impl TableEpoch {
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// The epoch of the current UTC month.
    pub fn current() -> Self {
        Self::from_date(Utc::now().date_naive())
    }

    /// The epoch `delta` months from `today`, by [`get_month_from`].
    pub fn offset_from(today: NaiveDate, delta: i32) -> Self {
        Self::from_date(get_month_from(today, delta))
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// `{prefix}_{year}_{month:02}`.
    pub fn table_name(&self, prefix: &str) -> String {
        format!("{prefix}_{}_{:02}", self.year, self.month)
    }

    /// Recover the epoch from a rotating table name.
    pub fn parse_table_name(prefix: &str, name: &str) -> Result<Self> {
        let invalid = || KeyError::InvalidTableName(name.to_string());
        let rest = name
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('_'))
            .ok_or_else(invalid)?;
        let (year, month) = rest.split_once('_').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        if !(1..=12).contains(&month) {
            return Err(invalid());
        }
        Ok(Self { year, month })
    }
}

impl fmt::Display for TableEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

/// Which rotating tables are live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableRotation {
    prefix: String,
    retained_months: u32,
}

impl TableRotation {
    pub fn new(prefix: impl Into<String>, retained_months: u32) -> Result<Self> {
        let prefix = prefix.into();
        validate_table_name(&prefix)?;
        Ok(Self {
            prefix,
            retained_months: retained_months.max(1),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Retained epochs as of `today`, oldest first, current last.
    pub fn retained_epochs(&self, today: NaiveDate) -> Vec<TableEpoch> {
        let oldest = i32::try_from(self.retained_months).unwrap_or(i32::MAX) - 1;
        (-oldest..=0)
            .map(|delta| TableEpoch::offset_from(today, delta))
            .collect()
    }

    /// Retained table names as of `today`, oldest first.
    pub fn retained_tables(&self, today: NaiveDate) -> Vec<String> {
        self.retained_epochs(today)
            .iter()
            .map(|epoch| epoch.table_name(&self.prefix))
            .collect()
    }

    pub fn current_table(&self, today: NaiveDate) -> String {
        TableEpoch::offset_from(today, 0).table_name(&self.prefix)
    }

    /// Next month's table, created ahead of the rollover.
    pub fn next_table(&self, today: NaiveDate) -> String {
        TableEpoch::offset_from(today, 1).table_name(&self.prefix)
    }

    /// Whether `table` is one of the retained tables as of `today`.
    pub fn is_retained(&self, table: &str, today: NaiveDate) -> bool {
        self.retained_tables(today).iter().any(|name| name == table)
    }
}

/// Table names are interpolated into SQL, so only `[a-z][a-z0-9_]*` passes.
pub fn validate_table_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(KeyError::InvalidTableName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn test_get_month_zero_is_today() {
        let today = date(2024, 5, 17);
        assert_eq!(get_month_from(today, 0), today);
    }

    #[test]
    fn test_get_month_steps_by_fourteen_days() {
        // Jan 31 + 14 days lands mid-February.
        assert_eq!(get_month_from(date(2023, 1, 31), 1), date(2023, 2, 14));
        // Backwards from Mar 31 passes Mar 17 and Mar 3 before reaching February.
        assert_eq!(get_month_from(date(2023, 3, 31), -1), date(2023, 2, 17));
        assert_eq!(get_month_from(date(2023, 12, 20), 1), date(2024, 1, 3));
        assert_eq!(get_month_from(date(2024, 1, 3), -1), date(2023, 12, 20));
    }

    #[test]
    fn test_get_month_twelve_is_same_month_next_year() {
        let mut day = date(2024, 1, 1);
        while day.year() == 2024 {
            let later = get_month_from(day, 12);
            assert_eq!(later.month(), day.month(), "from {day}");
            assert_eq!(later.year(), 2025, "from {day}");
            let earlier = get_month_from(day, -12);
            assert_eq!(earlier.month(), day.month(), "from {day}");
            assert_eq!(earlier.year(), 2023, "from {day}");
            day += Duration::days(1);
        }
    }

    #[test]
    fn test_get_month_from_leap_day() {
        let later = get_month_from(date(2024, 2, 29), 12);
        assert_eq!((later.year(), later.month()), (2025, 2));
    }

    #[test]
    fn test_get_month_uses_today() {
        let today = Utc::now().date_naive();
        assert_eq!(get_month(0), today);
        assert_ne!(get_month(1).month(), today.month());
    }

    #[test]
    fn test_has_connected_this_month() {
        let mut record = RouterRecord::new(pushstore_types::Uaid::new_v4());
        let today = date(2024, 3, 9);
        assert!(!has_connected_this_month(&record, today));

        record.last_connect = Some(2024_03_15_0007);
        assert!(has_connected_this_month(&record, today));

        record.last_connect = Some(2024_02_15_0007);
        assert!(!has_connected_this_month(&record, today));
    }

    #[test]
    fn test_generate_last_connect_layout() {
        let now = Utc
            .with_ymd_and_hms(2024, 3, 9, 7, 30, 0)
            .single()
            .expect("valid time");
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let value = generate_last_connect(now, &mut rng, 10);
            assert!((2024_03_07_0000..2024_03_07_0010).contains(&value), "{value}");
        }
    }

    #[test]
    fn test_generate_last_connect_is_seeded() {
        let now = Utc::now();
        let generator = LastConnectGenerator::new(10);
        let a = generator.generate_with(now, &mut StdRng::seed_from_u64(42));
        let b = generator.generate_with(now, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn test_generate_last_connect_bucket_spread() {
        let now = Utc
            .with_ymd_and_hms(2024, 11, 1, 23, 0, 0)
            .single()
            .expect("valid time");
        let mut rng = StdRng::seed_from_u64(1);
        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..1000 {
            seen.insert(generate_last_connect(now, &mut rng, 3) % 10_000);
        }
        assert_eq!(seen.into_iter().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_generated_value_counts_as_this_month() {
        let mut record = RouterRecord::new(pushstore_types::Uaid::new_v4());
        record.last_connect = Some(LastConnectGenerator::default().generate());
        assert!(has_connected_this_month(&record, Utc::now().date_naive()));
    }

    #[test]
    fn test_generator_clamps_buckets() {
        assert_eq!(LastConnectGenerator::new(0).buckets(), 1);
        assert_eq!(LastConnectGenerator::new(50_000).buckets(), 10_000);
    }

    #[test]
    fn test_table_names() {
        let epoch = TableEpoch::from_date(date(2024, 3, 9));
        assert_eq!(epoch.table_name("message"), "message_2024_03");
        assert_eq!(
            TableEpoch::parse_table_name("message", "message_2024_03").expect("parse"),
            epoch
        );
        for bad in ["message_2024_13", "message_24_03", "router", "message_2024"] {
            assert!(TableEpoch::parse_table_name("message", bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_retained_tables() {
        let rotation = TableRotation::new("message", 3).expect("rotation");
        let today = date(2024, 1, 20);
        assert_eq!(
            rotation.retained_tables(today),
            vec!["message_2023_11", "message_2023_12", "message_2024_01"]
        );
        assert_eq!(rotation.current_table(today), "message_2024_01");
        assert_eq!(rotation.next_table(today), "message_2024_02");
        assert!(rotation.is_retained("message_2023_12", today));
        assert!(!rotation.is_retained("message_2023_10", today));
    }

    #[test]
    fn test_validate_table_name() {
        assert!(validate_table_name("message_2024_01").is_ok());
        assert!(validate_table_name("router").is_ok());
        for bad in ["", "1abc", "Message", "msg;drop", "a-b", "a b"] {
            assert!(validate_table_name(bad).is_err(), "{bad}");
        }
        assert!(TableRotation::new("bad-prefix", 3).is_err());
    }
}
