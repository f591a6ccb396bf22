//! Durable, ordered key-value store for resting orders.
//!
//! One [`BookStore`] instance per market, holding three logical
//! keyspaces (`bids`, `asks`, an `ids` index) updated together inside
//! a single flush. See [`mmap_store::MmapBookStore`] for the default
//! write-ahead-logged implementation.

pub mod mmap_store;

use crate::orderbook::codec::SortKey;
use crate::orderbook::error::StoreError;
use crate::orderbook::types::{Op, Order, Side};

pub use mmap_store::MmapBookStore;

/// A single staged mutation applied atomically as part of a flush.
#[derive(Debug, Clone)]
pub enum FlushOp {
    Insert(Side, Order),
    Update { side: Side, id: i64, qty: i64 },
    Remove { side: Side, id: i64 },
}

impl FlushOp {
    pub fn from_parts(side: Side, id: i64, op: Op, order: Option<&Order>) -> Option<Self> {
        match op {
            Op::Insert => order.cloned().map(|o| FlushOp::Insert(side, o)),
            Op::UpdateQty(q) => Some(FlushOp::Update { side, id, qty: q }),
            Op::Remove => Some(FlushOp::Remove { side, id }),
        }
    }
}

/// The durable book contract described in `spec.md` §4.2.
pub trait BookStore: Send + Sync {
    /// Whether `side`'s keyspace currently holds no entries at all
    /// (used by `OrderList`'s bootstrap-insert rule).
    fn is_side_empty(&self, side: Side) -> Result<bool, StoreError>;

    /// Return up to `limit` entries for `side` in sort order, strictly
    /// after `from` if given, as a consistent snapshot.
    fn get_range(
        &self,
        side: Side,
        from: Option<SortKey>,
        limit: usize,
    ) -> Result<Vec<(SortKey, Order)>, StoreError>;

    /// Look up the side and sort key for a resting order by id.
    fn get_id(&self, id: i64) -> Result<Option<(Side, SortKey)>, StoreError>;

    /// Apply every op in `ops` as a single atomic, durable transaction
    /// against all three keyspaces. On success, every op's effect (and
    /// its mirrored update to the `ids` index) is observable together;
    /// on failure, none of it is.
    fn apply_flush(&self, ops: Vec<FlushOp>) -> Result<(), StoreError>;
}
