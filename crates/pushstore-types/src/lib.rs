//! # pushstore-types
//!
//! Shared domain types for the notification store workspace.
//!
//! - [`ids`]: canonical UAID / CHID identifiers.
//! - [`notification`]: the queued notification record handed to and from
//!   the connection and endpoint services.
//! - [`router`]: the per-subscriber router record.
//! - [`time`]: wall-clock helpers in seconds / milliseconds since the epoch.

pub mod ids;
pub mod notification;
pub mod router;
pub mod time;

pub use ids::{ChannelId, IdError, Uaid};
pub use notification::{Notification, NotificationSource};
pub use router::RouterRecord;

/// Maximum retention for any stored row, in seconds (~30 days).
pub const MAX_RETENTION_SECS: u64 = 2_592_000;

/// Current router record version. Older records request a UAID reset.
pub const USER_RECORD_VERSION: u8 = 1;

/// Default router type for websocket-connected subscribers.
pub const DEFAULT_ROUTER_TYPE: &str = "webpush";
