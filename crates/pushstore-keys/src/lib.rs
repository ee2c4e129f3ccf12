//! # pushstore-keys
//!
//! Key design for the notification store. Everything here is pure: no
//! storage access, only clock and configuration inputs.
//!
//! ## Modules
//!
//! - [`sort_key`]: versioned sort key codec (legacy, topic, timestamped).
//! - [`hashing`]: HMAC-SHA256 pseudonymization of the partition key.
//! - [`rotation`]: monthly table epochs and the bucketed `last_connect` index.

pub mod hashing;
pub mod rotation;
pub mod sort_key;

pub use hashing::UaidHasher;
pub use rotation::{
    generate_last_connect, get_month, get_month_from, has_connected_this_month,
    LastConnectGenerator, TableEpoch, TableRotation,
};
pub use sort_key::{SortKey, CHANNEL_METADATA_SORT_KEY};

use pushstore_types::IdError;

/// Key encoding errors. All of them are fatal to the call that hit them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// Sort key does not match any known version layout.
    #[error("invalid sort key: {0:?}")]
    InvalidSortKey(String),

    /// The timestamp segment of a v02 key is not a decimal number.
    #[error("invalid sort key timestamp: {0:?}")]
    InvalidTimestamp(String),

    /// Timestamp wider than the fixed 19 digit field.
    #[error("timestamp {0} does not fit the sort key field")]
    TimestampOutOfRange(u64),

    /// Topic is empty or contains the key delimiter.
    #[error("invalid topic: {0:?}")]
    InvalidTopic(String),

    /// Legacy message id is empty or contains the key delimiter.
    #[error("invalid message id: {0:?}")]
    InvalidMessageId(String),

    /// A timestamp-ordered notification without a queue position.
    #[error("notification has no sortkey timestamp")]
    MissingSortkeyTimestamp,

    /// Channel id segment is not a UUID.
    #[error(transparent)]
    InvalidId(#[from] IdError),

    /// Pseudonymization key could not be used.
    #[error("invalid hash key: {0}")]
    InvalidHashKey(String),

    /// Table name outside `[a-z][a-z0-9_]*`.
    #[error("invalid table name: {0:?}")]
    InvalidTableName(String),
}

/// Convenience result type for key operations.
pub type Result<T> = std::result::Result<T, KeyError>;
