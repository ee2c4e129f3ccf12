//! Per-subscriber channel set.
//!
//! The set lives on the channel metadata row (sort key `" "`) of the
//! subscriber's partition. Adds and removes go through the engine's atomic
//! set update, so concurrent registrations for one subscriber never lose
//! each other's channels.

use std::collections::BTreeSet;

use pushstore_types::time::sec_since_epoch;
use pushstore_types::{ChannelId, Uaid};
use tracing::debug;

use crate::context::TableContext;
use crate::engine::{ItemKey, MessageItem, SetUpdate};
use crate::stats::DbOp;
use crate::Result;

/// Channel registration for one message table.
#[derive(Clone, Debug)]
pub struct ChannelRegistry {
    ctx: TableContext,
}

impl ChannelRegistry {
    pub fn new(ctx: TableContext) -> Self {
        Self { ctx }
    }

    pub fn table(&self) -> &str {
        self.ctx.table()
    }

    /// Add `chid` to the subscriber's set and push the row's expiry to
    /// `now + ttl` (max retention when `ttl` is `None`). Idempotent.
    pub fn register_channel(
        &self,
        uaid: &Uaid,
        chid: &ChannelId,
        ttl: Option<u64>,
    ) -> Result<bool> {
        self.ctx.track(DbOp::RegisterChannel, || {
            let pk = self.ctx.partition_key(uaid);
            let expiry = self.ctx.expiry_at(sec_since_epoch(), ttl);
            debug!(table = self.ctx.table(), uaid = %pk, %chid, "register_channel");
            self.ctx.store().update_chids(
                self.ctx.table(),
                &pk,
                &SetUpdate::Add(BTreeSet::from([chid.to_string()])),
                expiry,
            )?;
            Ok(true)
        })
    }

    /// Remove `chid`; returns whether it was registered beforehand.
    pub fn unregister_channel(&self, uaid: &Uaid, chid: &ChannelId) -> Result<bool> {
        self.ctx.track(DbOp::UnregisterChannel, || {
            let pk = self.ctx.partition_key(uaid);
            let chid = chid.to_string();
            let expiry = self.ctx.expiry_at(sec_since_epoch(), None);
            debug!(table = self.ctx.table(), uaid = %pk, %chid, "unregister_channel");
            let previous = self.ctx.store().update_chids(
                self.ctx.table(),
                &pk,
                &SetUpdate::Remove(BTreeSet::from([chid.clone()])),
                expiry,
            )?;
            Ok(previous.contains(&chid))
        })
    }

    /// `(exists, channels)`. A missing metadata row is `(false, {})`, which is
    /// distinct from a row holding an empty set.
    pub fn all_channels(&self, uaid: &Uaid) -> Result<(bool, BTreeSet<ChannelId>)> {
        self.ctx.track(DbOp::AllChannels, || {
            let pk = self.ctx.partition_key(uaid);
            let Some(row) = self
                .ctx
                .store()
                .get_item(self.ctx.table(), &ItemKey::metadata(pk))?
            else {
                return Ok((false, BTreeSet::new()));
            };
            let channels = row
                .chids
                .unwrap_or_default()
                .iter()
                .map(|chid| ChannelId::parse(chid))
                .collect::<std::result::Result<BTreeSet<_>, _>>()?;
            Ok((true, channels))
        })
    }

    /// Overwrite the whole metadata row with `channels`. Used when moving a
    /// subscriber to a new month; clears any watermark on the row.
    pub fn save_channels(&self, uaid: &Uaid, channels: &BTreeSet<ChannelId>) -> Result<()> {
        self.ctx.track(DbOp::SaveChannels, || {
            let pk = self.ctx.partition_key(uaid);
            debug!(table = self.ctx.table(), uaid = %pk, count = channels.len(), "save_channels");
            let item = MessageItem {
                chids: Some(channels.iter().map(ChannelId::to_string).collect()),
                expiry: self.ctx.expiry_at(sec_since_epoch(), None),
                ..MessageItem::from_key(ItemKey::metadata(pk))
            };
            self.ctx.store().put_item(self.ctx.table(), &item)
        })
    }
}
