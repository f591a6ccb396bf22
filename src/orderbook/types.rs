//! Core value types shared across the book: sides, quotes, resting
//! orders, and the pending-op tags staged between flushes.

use serde::{Deserialize, Serialize};

/// Which queue a quote or resting order belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    /// The opposite side, i.e. what a quote on this side matches
    /// against.
    pub fn opposite(self) -> Side {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }

    /// The sign applied to `price` before building a sort key: bids
    /// negate price so that the highest bid sorts first.
    pub fn price_sign(self, price: i64) -> i64 {
        match self {
            Side::Bid => -price,
            Side::Ask => price,
        }
    }
}

/// Whether a quote is priced or sweeps the book unconditionally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Limit,
    Market,
}

/// An incoming quote, as decoded from a `place-order` event. Transient:
/// consumed by exactly one call to [`crate::orderbook::matching::MatchingEngine::process`].
#[derive(Debug, Clone)]
pub struct Quote {
    /// Id assigned by the dispatcher; unique within the market.
    pub id: i64,
    pub kind: OrderKind,
    pub side: Side,
    /// Required for `Limit`, ignored for `Market`.
    pub price: Option<i64>,
    pub qty: i64,
    pub account_id: i64,
}

impl Quote {
    /// Validate the shape required by `spec.md` §7: positive qty, and a
    /// price present whenever the quote is a limit order.
    pub fn validate(&self) -> Result<(), String> {
        if self.qty <= 0 {
            return Err(format!("qty must be > 0, got {}", self.qty));
        }
        if self.kind == OrderKind::Limit && self.price.is_none() {
            return Err("limit quote missing price".to_string());
        }
        if let Some(p) = self.price {
            if p <= 0 {
                return Err(format!("price must be > 0, got {p}"));
            }
        }
        Ok(())
    }
}

/// A resting order: the residual of a limit quote that was not fully
/// matched, held in an [`crate::orderbook::order_list::OrderList`]
/// until filled or cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub price: i64,
    pub qty_remaining: i64,
    pub account_id: i64,
    /// Whether a flush has already made this order durable. A fresh
    /// residual starts `false`; `apply_flush` in the store layer flips
    /// it to `true` once the insert has been committed.
    pub in_store: bool,
}

impl Order {
    pub fn from_residual(quote: &Quote) -> Self {
        Order {
            id: quote.id,
            price: quote.price.expect("residual only constructed for limit quotes"),
            qty_remaining: quote.qty,
            account_id: quote.account_id,
            in_store: false,
        }
    }

    /// The 16-byte sort key for this order's resting side.
    pub fn sort_key(&self, side: Side) -> crate::orderbook::codec::SortKey {
        crate::orderbook::codec::sort_key(side.price_sign(self.price), self.id)
    }
}

/// A single mutation staged against a resting order since the last
/// flush. At most one effective op is kept per id: appending an op
/// collapses with the previous one per the rules in
/// [`crate::orderbook::order_list::OrderList::stage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Insert,
    UpdateQty(i64),
    Remove,
}
