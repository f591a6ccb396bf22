//! In-memory working set for one side of one market, layered over a
//! [`crate::orderbook::store::BookStore`].
//!
//! Mirrors the algorithmic shape of the original LMDB-backed
//! `OrderList` (`insertOrder`/`removeOrder`/`updateQty`/`initPrices`):
//! a bounded prefix of resting orders lives in memory, refilled from
//! the store as iteration exhausts it, with deletes deferred until
//! iteration completes.

use std::collections::BTreeMap;

use crate::orderbook::codec::SortKey;
use crate::orderbook::error::StoreError;
use crate::orderbook::store::{BookStore, FlushOp};
use crate::orderbook::types::{Op, Order, Side};

/// The in-memory working set for one side.
pub struct OrderList {
    side: Side,
    limit: usize,
    /// Sorted keys currently known in memory, in price-time priority
    /// order.
    staged_keys: Vec<SortKey>,
    by_id: BTreeMap<i64, Order>,
    key_by_id: BTreeMap<i64, SortKey>,
    pending: BTreeMap<i64, Op>,
    deleted: BTreeMap<i64, Order>,
    /// Keys queued for removal from `staged_keys` once the active
    /// iteration completes; never touched mid-iteration.
    pending_removal: Vec<i64>,
    iterating: bool,
}

impl OrderList {
    /// Construct a new working set for `side`, priming up to `limit`
    /// earliest entries from `store`.
    pub fn prime(
        side: Side,
        limit: usize,
        store: &dyn BookStore,
    ) -> Result<Self, StoreError> {
        let mut list = OrderList {
            side,
            limit,
            staged_keys: Vec::new(),
            by_id: BTreeMap::new(),
            key_by_id: BTreeMap::new(),
            pending: BTreeMap::new(),
            deleted: BTreeMap::new(),
            pending_removal: Vec::new(),
            iterating: false,
        };
        list.refill(store, None)?;
        Ok(list)
    }

    /// Number of ops staged since the last flush.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether the working set currently holds no orders and nothing
    /// has ever been staged for it (the bootstrap condition for insert
    /// semantics, rule 5).
    pub fn is_empty_and_unprimed(&self, store: &dyn BookStore) -> Result<bool, StoreError> {
        Ok(self.staged_keys.is_empty() && self.pending.is_empty() && store.is_side_empty(self.side)?)
    }

    fn last_staged_key(&self) -> Option<SortKey> {
        self.staged_keys.last().copied()
    }

    /// Refill `staged_keys`/`by_id` from the store, starting strictly
    /// after `from_key` (or from the beginning if `None`).
    fn refill(&mut self, store: &dyn BookStore, from_key: Option<SortKey>) -> Result<usize, StoreError> {
        let page = store.get_range(self.side, from_key, self.limit)?;
        let added = page.len();
        for (key, order) in page {
            self.key_by_id.insert(order.id, key);
            self.by_id.insert(order.id, order);
            self.staged_keys.push(key);
        }
        Ok(added)
    }

    /// Iterate the working set in price-time priority order, refilling
    /// from the store as needed. The closure receives each `Order` by
    /// value (a clone of the in-memory record) together with its sort
    /// key. Returning `false` stops iteration early (e.g. the caller's
    /// remaining demand has been exhausted).
    ///
    /// No mutation of `staged_keys` happens while this runs: `delete`
    /// and `update_qty` called from within `f` only stage ops and queue
    /// removals, applied by [`OrderList::apply_deletes`] afterward.
    pub fn iterate_mut<F>(
        &mut self,
        store: &dyn BookStore,
        mut f: F,
    ) -> Result<(), StoreError>
    where
        F: FnMut(&mut OrderListCursor, Order) -> Result<bool, StoreError>,
    {
        self.iterating = true;
        let mut idx = 0;
        let result = (|| -> Result<(), StoreError> {
            loop {
                if idx >= self.staged_keys.len() {
                    let from = self.last_staged_key();
                    let added = self.refill(store, from)?;
                    if added == 0 {
                        break;
                    }
                }
                if idx >= self.staged_keys.len() {
                    break;
                }
                let key = self.staged_keys[idx];
                let id = crate::orderbook::codec::decode_sort_key(&key).1;
                let Some(order) = self.by_id.get(&id).cloned() else {
                    idx += 1;
                    continue;
                };
                let mut cursor = OrderListCursor { list: self };
                let keep_going = f(&mut cursor, order)?;
                idx += 1;
                if !keep_going {
                    break;
                }
            }
            Ok(())
        })();
        self.iterating = false;
        result
    }

    /// Update a resting order's remaining quantity in place, staging a
    /// `qty` op. Must only be called during iteration or immediately
    /// after, per rule 3.
    pub fn update_qty(&mut self, id: i64, new_qty: i64) {
        if let Some(o) = self.by_id.get_mut(&id) {
            o.qty_remaining = new_qty;
        }
        self.stage(id, Op::UpdateQty(new_qty));
    }

    /// Queue a resting order for removal. Does not touch `staged_keys`
    /// while iteration is active; the caller must run
    /// [`OrderList::apply_deletes`] once iteration has stopped.
    pub fn delete(&mut self, id: i64) {
        self.stage(id, Op::Remove);
        self.pending_removal.push(id);
    }

    /// Cancel a resting order by id: same path as `delete` if it is
    /// currently in the working set, otherwise a standalone `Remove` op
    /// referencing the stored key so flush can delete it from the
    /// store directly.
    pub fn cancel(&mut self, id: i64, stored_key: Option<SortKey>) -> bool {
        if self.by_id.contains_key(&id) {
            self.delete(id);
            true
        } else if stored_key.is_some() {
            self.pending.insert(id, Op::Remove);
            true
        } else {
            false
        }
    }

    fn stage(&mut self, id: i64, op: Op) {
        let collapsed = match (self.pending.get(&id), op) {
            // insert ... remove before it ever reached the store: fuse
            // to a no-op, per the flush-ordering rule.
            (Some(Op::Insert), Op::Remove) => None,
            // insert followed by a qty change is still, from the
            // store's perspective, a single put with the latest value.
            (Some(Op::Insert), Op::UpdateQty(_)) => Some(Op::Insert),
            _ => Some(op),
        };
        match collapsed {
            Some(op) => {
                self.pending.insert(id, op);
            }
            None => {
                self.pending.remove(&id);
            }
        }
    }

    /// Insert a new resting order into this side's working set.
    /// Implements rule 5: bootstrap write-through, in-range insert, or
    /// pending-only insert ahead of the working set.
    pub fn insert(&mut self, order: Order, store: &dyn BookStore) -> Result<(), StoreError> {
        let key = order.sort_key(self.side);
        if self.is_empty_and_unprimed(store)? {
            // Bootstrap: write through immediately so the next refill
            // has an anchor.
            store.apply_flush(vec![FlushOp::Insert(self.side, order.clone())])?;
            let mut o = order;
            o.in_store = true;
            self.key_by_id.insert(o.id, key);
            self.by_id.insert(o.id, o);
            self.staged_keys.push(key);
            return Ok(());
        }

        let in_range = match self.last_staged_key() {
            Some(last) => key < last,
            None => true,
        };

        let order_id = order.id;
        if in_range {
            self.key_by_id.insert(order.id, key);
            self.by_id.insert(order.id, order);
            let pos = self.staged_keys.partition_point(|k| *k < key);
            self.staged_keys.insert(pos, key);
        }
        self.stage(order_id, Op::Insert);
        Ok(())
    }

    /// Remove every queued delete from `staged_keys`, moving the order
    /// from `by_id` to `deleted`. Must only be called once the active
    /// iteration has terminated.
    pub fn apply_deletes(&mut self) {
        debug_assert!(!self.iterating, "apply_deletes called during iteration");
        for id in self.pending_removal.drain(..) {
            if let Some(key) = self.key_by_id.remove(&id) {
                if let Some(pos) = self.staged_keys.iter().position(|k| *k == key) {
                    self.staged_keys.remove(pos);
                }
                if let Some(order) = self.by_id.remove(&id) {
                    self.deleted.insert(id, order);
                }
            }
        }
    }

    /// Drain staged ops for a flush as ready-to-apply [`FlushOp`]s.
    /// Clears `pending` and the post-iteration `deleted` scratch space.
    pub fn drain_flush_ops(&mut self) -> Vec<FlushOp> {
        let mut out = Vec::with_capacity(self.pending.len());
        for (id, op) in std::mem::take(&mut self.pending) {
            let flush_op = match op {
                Op::Insert => self
                    .by_id
                    .get(&id)
                    .cloned()
                    .map(|o| FlushOp::Insert(self.side, o)),
                Op::UpdateQty(qty) => Some(FlushOp::Update {
                    side: self.side,
                    id,
                    qty,
                }),
                Op::Remove => Some(FlushOp::Remove {
                    side: self.side,
                    id,
                }),
            };
            if let Some(flush_op) = flush_op {
                out.push(flush_op);
            }
        }
        self.deleted.clear();
        out
    }

    /// Mark a resting order durable once its insert has been committed
    /// by a flush.
    pub fn mark_in_store(&mut self, id: i64) {
        if let Some(o) = self.by_id.get_mut(&id) {
            o.in_store = true;
        }
    }

    /// The current in-memory record for `id`, if resting.
    pub fn get(&self, id: i64) -> Option<&Order> {
        self.by_id.get(&id)
    }

    /// The stored key for `id`, if known (resting or recently
    /// deleted).
    pub fn key_for(&self, id: i64) -> Option<SortKey> {
        self.key_by_id.get(&id).copied()
    }

    pub fn side(&self) -> Side {
        self.side
    }
}

/// Mutation handle passed into the closure given to
/// [`OrderList::iterate_mut`], so callers can stage `update_qty`/
/// `delete` without re-borrowing the list mutably while iterating.
pub struct OrderListCursor<'a> {
    list: &'a mut OrderList,
}

impl OrderListCursor<'_> {
    pub fn update_qty(&mut self, id: i64, new_qty: i64) {
        self.list.update_qty(id, new_qty);
    }

    pub fn delete(&mut self, id: i64) {
        self.list.delete(id);
    }
}
