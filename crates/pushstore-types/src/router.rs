//! The per-subscriber router record.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::Uaid;
use crate::time::ms_since_epoch;
use crate::{DEFAULT_ROUTER_TYPE, USER_RECORD_VERSION};

/// Router row for one subscriber.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouterRecord {
    pub uaid: Uaid,
    /// Milliseconds since the epoch of the last connection.
    pub connected_at: u64,
    pub router_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router_data: Option<HashMap<String, serde_json::Value>>,
    /// Bucketed `YYYYMMHHNNNN` index value, see `generate_last_connect`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connect: Option<u64>,
    /// Connection node currently holding the subscriber.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_version: Option<u8>,
    /// Table epoch holding the subscriber's messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_month: Option<String>,
}

impl RouterRecord {
    /// A fresh webpush record connected now.
    pub fn new(uaid: Uaid) -> Self {
        Self {
            uaid,
            connected_at: ms_since_epoch(),
            router_type: DEFAULT_ROUTER_TYPE.to_string(),
            router_data: None,
            last_connect: None,
            node_id: None,
            record_version: Some(USER_RECORD_VERSION),
            current_month: None,
        }
    }

    /// Whether the record predates the current record layout.
    pub fn needs_reset(&self) -> bool {
        self.record_version
            .map_or(true, |version| version < USER_RECORD_VERSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_current() {
        let record = RouterRecord::new(Uaid::new_v4());
        assert_eq!(record.router_type, "webpush");
        assert!(!record.needs_reset());
    }

    #[test]
    fn test_missing_or_old_version_needs_reset() {
        let mut record = RouterRecord::new(Uaid::new_v4());
        record.record_version = None;
        assert!(record.needs_reset());
        record.record_version = Some(0);
        assert!(record.needs_reset());
    }
}
