//! Per-operation call diagnostics.
//!
//! Counts calls and transient engine failures by operation when enabled.
//! No retries happen here; callers decide what to do with a transient error.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::{Result, StoreError};

/// Store operations tracked by [`CallStats`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DbOp {
    RegisterChannel,
    UnregisterChannel,
    AllChannels,
    SaveChannels,
    StoreMessage,
    StoreMessages,
    DeleteMessage,
    FetchMessages,
    FetchTimestampMessages,
    UpdateLastMessageRead,
    GetUser,
    RegisterUser,
    UpdateMessageMonth,
    RemoveNodeId,
    DropUser,
}

const OP_COUNT: usize = 15;

impl DbOp {
    pub const ALL: [DbOp; OP_COUNT] = [
        DbOp::RegisterChannel,
        DbOp::UnregisterChannel,
        DbOp::AllChannels,
        DbOp::SaveChannels,
        DbOp::StoreMessage,
        DbOp::StoreMessages,
        DbOp::DeleteMessage,
        DbOp::FetchMessages,
        DbOp::FetchTimestampMessages,
        DbOp::UpdateLastMessageRead,
        DbOp::GetUser,
        DbOp::RegisterUser,
        DbOp::UpdateMessageMonth,
        DbOp::RemoveNodeId,
        DbOp::DropUser,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DbOp::RegisterChannel => "register_channel",
            DbOp::UnregisterChannel => "unregister_channel",
            DbOp::AllChannels => "all_channels",
            DbOp::SaveChannels => "save_channels",
            DbOp::StoreMessage => "store_message",
            DbOp::StoreMessages => "store_messages",
            DbOp::DeleteMessage => "delete_message",
            DbOp::FetchMessages => "fetch_messages",
            DbOp::FetchTimestampMessages => "fetch_timestamp_messages",
            DbOp::UpdateLastMessageRead => "update_last_message_read",
            DbOp::GetUser => "get_user",
            DbOp::RegisterUser => "register_user",
            DbOp::UpdateMessageMonth => "update_message_month",
            DbOp::RemoveNodeId => "remove_node_id",
            DbOp::DropUser => "drop_user",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Call counters shared by every table handle of a process.
#[derive(Debug)]
pub struct CallStats {
    enabled: bool,
    calls: [AtomicU64; OP_COUNT],
    transient: [AtomicU64; OP_COUNT],
}

impl Default for CallStats {
    fn default() -> Self {
        Self::new(false)
    }
}

impl CallStats {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            calls: std::array::from_fn(|_| AtomicU64::new(0)),
            transient: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record the outcome of one call.
    pub fn record<T>(&self, op: DbOp, result: &Result<T>) {
        if let Err(err @ StoreError::Transient(_)) = result {
            tracing::warn!(op = op.name(), error = %err, "transient storage failure");
            if self.enabled {
                self.transient[op.index()].fetch_add(1, Ordering::Relaxed);
            }
        }
        if self.enabled {
            self.calls[op.index()].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn calls(&self, op: DbOp) -> u64 {
        self.calls[op.index()].load(Ordering::Relaxed)
    }

    pub fn transient_errors(&self, op: DbOp) -> u64 {
        self.transient[op.index()].load(Ordering::Relaxed)
    }

    /// `(operation, calls, transient errors)` for every operation called
    /// at least once.
    pub fn snapshot(&self) -> Vec<(&'static str, u64, u64)> {
        DbOp::ALL
            .iter()
            .map(|op| (op.name(), self.calls(*op), self.transient_errors(*op)))
            .filter(|(_, calls, _)| *calls > 0)
            .collect()
    }
}
