//! Versioned sort keys.
//!
//! Every row in a subscriber's partition is addressed by a sort key whose
//! prefix selects the layout of the rest of the key:
//!
//! | Version | Layout | Use |
//! |---------|--------|-----|
//! | `01` | `01:{chid}:{topic}` | topic messages, one live row per (chid, topic) |
//! | `02` | `02:{timestamp:019}:{chid}` | timestamp-ordered messages |
//! | `00` | `{chid}:{message_id}` | legacy rows, read and deleted only |
//!
//! The channel metadata row uses the single-space sentinel
//! [`CHANNEL_METADATA_SORT_KEY`], which sorts before every version.
//!
//! The v02 timestamp is zero-padded to a fixed width so that string order of
//! keys equals numeric order of their timestamps.

use std::fmt;
use std::str::FromStr;

use pushstore_types::{ChannelId, Notification};

use crate::{KeyError, Result};

/// Sort key of the per-subscriber channel metadata row.
pub const CHANNEL_METADATA_SORT_KEY: &str = " ";

/// Version prefix of topic keys.
pub const TOPIC_PREFIX: &str = "01";

/// Version prefix of timestamp-ordered keys.
pub const TIMESTAMP_PREFIX: &str = "02";

/// Reported version of keys without a prefix.
pub const LEGACY_API_VERSION: &str = "00";

/// Width of the zero-padded v02 timestamp field.
pub const TIMESTAMP_WIDTH: usize = 19;

/// Largest timestamp that fits the v02 field.
pub const MAX_ENCODABLE_TIMESTAMP: u64 = 9_999_999_999_999_999_999;

/// Reject timestamps wider than the v02 field; a wider one would break
/// the lexicographic ordering of keys.
pub fn check_timestamp(ts: u64) -> Result<u64> {
    if ts > MAX_ENCODABLE_TIMESTAMP {
        return Err(KeyError::TimestampOutOfRange(ts));
    }
    Ok(ts)
}

/// Decoded sort key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SortKey {
    /// Pre-versioning row `{chid}:{message_id}`.
    Legacy {
        channel_id: ChannelId,
        message_id: String,
    },
    /// `01:{chid}:{topic}`.
    Topic { channel_id: ChannelId, topic: String },
    /// `02:{timestamp}:{chid}`.
    Timestamped {
        sortkey_timestamp: u64,
        channel_id: ChannelId,
    },
}

impl SortKey {
    /// Build a topic key, rejecting topics that cannot round-trip.
    pub fn topic(channel_id: ChannelId, topic: impl Into<String>) -> Result<Self> {
        let topic = topic.into();
        if !is_segment(&topic) {
            return Err(KeyError::InvalidTopic(topic));
        }
        Ok(Self::Topic { channel_id, topic })
    }

    /// Build a timestamp-ordered key.
    pub fn timestamped(channel_id: ChannelId, sortkey_timestamp: u64) -> Result<Self> {
        Ok(Self::Timestamped {
            sortkey_timestamp: check_timestamp(sortkey_timestamp)?,
            channel_id,
        })
    }

    /// Address an existing legacy row.
    pub fn legacy(channel_id: ChannelId, message_id: impl Into<String>) -> Result<Self> {
        let message_id = message_id.into();
        if !is_segment(&message_id) {
            return Err(KeyError::InvalidMessageId(message_id));
        }
        Ok(Self::Legacy {
            channel_id,
            message_id,
        })
    }

    /// The key addressing `notification`.
    ///
    /// Topic wins over the legacy flag, which wins over the timestamp layout.
    pub fn for_notification(notification: &Notification) -> Result<Self> {
        if let Some(topic) = &notification.topic {
            Self::topic(notification.channel_id, topic.clone())
        } else if notification.legacy {
            Self::legacy(notification.channel_id, notification.message_id.clone())
        } else {
            let sortkey_timestamp = notification
                .sortkey_timestamp
                .ok_or(KeyError::MissingSortkeyTimestamp)?;
            Self::timestamped(notification.channel_id, sortkey_timestamp)
        }
    }

    /// Decode a stored sort key.
    pub fn parse(key: &str) -> Result<Self> {
        let invalid = || KeyError::InvalidSortKey(key.to_string());

        if key.starts_with("01:") {
            let parts: Vec<&str> = key.split(':').collect();
            let [_, channel_id, topic] = parts.as_slice() else {
                return Err(invalid());
            };
            if channel_id.is_empty() || topic.is_empty() {
                return Err(invalid());
            }
            Ok(Self::Topic {
                channel_id: ChannelId::parse(channel_id)?,
                topic: (*topic).to_string(),
            })
        } else if key.starts_with("02:") {
            let parts: Vec<&str> = key.split(':').collect();
            let [_, raw_timestamp, channel_id] = parts.as_slice() else {
                return Err(invalid());
            };
            if raw_timestamp.is_empty() || !raw_timestamp.bytes().all(|b| b.is_ascii_digit()) {
                return Err(KeyError::InvalidTimestamp((*raw_timestamp).to_string()));
            }
            let sortkey_timestamp = raw_timestamp
                .parse::<u64>()
                .map_err(|_| KeyError::InvalidTimestamp((*raw_timestamp).to_string()))?;
            Ok(Self::Timestamped {
                sortkey_timestamp,
                channel_id: ChannelId::parse(channel_id)?,
            })
        } else {
            let parts: Vec<&str> = key.split(':').collect();
            let [channel_id, message_id] = parts.as_slice() else {
                return Err(invalid());
            };
            if channel_id.is_empty() || message_id.is_empty() {
                return Err(invalid());
            }
            Ok(Self::Legacy {
                channel_id: ChannelId::parse(channel_id)?,
                message_id: (*message_id).to_string(),
            })
        }
    }

    /// Encoded form written to storage.
    pub fn encode(&self) -> String {
        match self {
            Self::Legacy {
                channel_id,
                message_id,
            } => format!("{channel_id}:{message_id}"),
            Self::Topic { channel_id, topic } => format!("{TOPIC_PREFIX}:{channel_id}:{topic}"),
            Self::Timestamped {
                sortkey_timestamp,
                channel_id,
            } => format!(
                "{TIMESTAMP_PREFIX}:{sortkey_timestamp:0width$}:{channel_id}",
                width = TIMESTAMP_WIDTH
            ),
        }
    }

    /// Exclusive lower bound for a timestamp-ordered range read.
    ///
    /// With a watermark this selects v02 keys strictly after it; without one
    /// it selects everything after the topic rows. Watermarks wider than
    /// the key field are rejected.
    pub fn timestamp_lower_bound(watermark: Option<u64>) -> Result<String> {
        Ok(match watermark {
            Some(ts) => format!(
                "{TIMESTAMP_PREFIX}:{ts:0width$}:z",
                ts = check_timestamp(ts)?,
                width = TIMESTAMP_WIDTH
            ),
            None => format!("{TOPIC_PREFIX};"),
        })
    }

    /// Exclusive upper bound for the topic / legacy range read.
    pub fn topic_upper_bound() -> &'static str {
        TIMESTAMP_PREFIX
    }

    /// `"00"`, `"01"` or `"02"`.
    pub fn api_version(&self) -> &'static str {
        match self {
            Self::Legacy { .. } => LEGACY_API_VERSION,
            Self::Topic { .. } => TOPIC_PREFIX,
            Self::Timestamped { .. } => TIMESTAMP_PREFIX,
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        match self {
            Self::Legacy { channel_id, .. }
            | Self::Topic { channel_id, .. }
            | Self::Timestamped { channel_id, .. } => *channel_id,
        }
    }

    pub fn topic_name(&self) -> Option<&str> {
        match self {
            Self::Topic { topic, .. } => Some(topic),
            _ => None,
        }
    }

    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::Legacy { message_id, .. } => Some(message_id),
            _ => None,
        }
    }

    pub fn sortkey_timestamp(&self) -> Option<u64> {
        match self {
            Self::Timestamped {
                sortkey_timestamp, ..
            } => Some(*sortkey_timestamp),
            _ => None,
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Legacy { .. })
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for SortKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Non-empty, no delimiter, no whitespace.
fn is_segment(value: &str) -> bool {
    !value.is_empty() && !value.contains(':') && !value.chars().any(char::is_whitespace)
}
