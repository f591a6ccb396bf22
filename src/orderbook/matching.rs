//! Core price-time priority matching loop.
//!
//! Self-trade prevention here is an unconditional silent skip (no
//! configurable mode, unlike the lock-free engine this crate grew
//! from): step 2 of `spec.md` §4.4 just skips a same-account resting
//! order without consuming it. Matching itself mirrors the original
//! system's `place_order` loop (`tx_amt = min(om.balance, demand)`,
//! self-trade `skip()`), adapted to the [`OrderList`] working-set
//! abstraction.

use crate::orderbook::fees::FeeEngine;
use crate::orderbook::ledger::{BalanceCache, LedgerEntry, LedgerWriter};
use crate::orderbook::order_list::OrderList;
use crate::orderbook::store::BookStore;
use crate::orderbook::trade::Trade;
use crate::orderbook::types::{Order, OrderKind, Quote, Side};
use crate::utils::now_micros;

/// Outcome of processing a single quote.
pub struct MatchOutcome {
    pub trades: Vec<Trade>,
    pub ledger_entries: Vec<LedgerEntry>,
    /// The residual resting order inserted into the same-side list, if
    /// any (limit quotes only: market-order residual is dropped per
    /// `spec.md` §9(i)).
    pub residual: Option<Order>,
}

pub struct MatchingEngine;

impl MatchingEngine {
    /// Match `quote` against `opposite`, the working set for the side
    /// it crosses. `same_side` receives the residual, if any, once
    /// iteration has completed.
    #[allow(clippy::too_many_arguments)]
    pub fn process(
        quote: &Quote,
        opposite: &mut OrderList,
        same_side: &mut OrderList,
        store: &dyn BookStore,
        ledger: &LedgerWriter,
        fee_engine: &FeeEngine<'_>,
        balance_cache: &mut BalanceCache,
    ) -> Result<MatchOutcome, crate::orderbook::error::StoreError> {
        let mut remaining_demand = quote.qty;
        let mut trades = Vec::new();
        let mut ledger_entries = Vec::new();

        opposite.iterate_mut(store, |cursor, resting| {
            if remaining_demand == 0 {
                return Ok(false);
            }

            if resting.account_id == quote.account_id {
                // Self-trade prevention: silently skip without
                // consuming the resting order.
                return Ok(true);
            }

            if quote.kind == OrderKind::Limit {
                let limit_price = quote.price.expect("limit quote validated to carry a price");
                match quote.side {
                    Side::Bid if resting.price > limit_price => return Ok(false),
                    Side::Ask if resting.price < limit_price => return Ok(false),
                    _ => {}
                }
            }

            let fill_qty = remaining_demand.min(resting.qty_remaining);
            remaining_demand -= fill_qty;

            if fill_qty == resting.qty_remaining {
                cursor.delete(resting.id);
            } else {
                cursor.update_qty(resting.id, resting.qty_remaining - fill_qty);
            }

            let (maker_is_buyer, buyer_account, seller_account) = match quote.side {
                // quote is a bid (taker buys), resting is an ask (maker sells)
                Side::Bid => (false, quote.account_id, resting.account_id),
                // quote is an ask (taker sells), resting is a bid (maker buys)
                Side::Ask => (true, resting.account_id, quote.account_id),
            };

            let (taker_order_id, taker_account_id) = (quote.id, quote.account_id);
            trades.push(Trade {
                ts_micros: now_micros(),
                price: resting.price,
                qty: fill_qty,
                maker_order_id: resting.id,
                maker_account_id: resting.account_id,
                taker_order_id,
                taker_account_id,
                taker_side: quote.side,
            });

            let entries = ledger.record_fill(
                balance_cache,
                fee_engine,
                buyer_account,
                seller_account,
                maker_is_buyer,
                fill_qty,
                resting.price,
            );
            ledger_entries.extend(entries);

            Ok(remaining_demand > 0)
        })?;

        opposite.apply_deletes();

        let residual = if remaining_demand > 0 && quote.kind == OrderKind::Limit {
            let mut residual_quote = quote.clone();
            residual_quote.qty = remaining_demand;
            let order = Order::from_residual(&residual_quote);
            same_side.insert(order.clone(), store)?;
            Some(order)
        } else {
            None
        };

        Ok(MatchOutcome {
            trades,
            ledger_entries,
            residual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::fees::{FeeSchedule, ZeroVolumeLookup};
    use crate::orderbook::store::mmap_store::MmapBookStore;
    use tempfile::tempdir;

    fn quote(id: i64, side: Side, kind: OrderKind, price: Option<i64>, qty: i64, account: i64) -> Quote {
        Quote {
            id,
            kind,
            side,
            price,
            qty,
            account_id: account,
        }
    }

    fn setup() -> (tempfile::TempDir, MmapBookStore) {
        let dir = tempdir().unwrap();
        let store = MmapBookStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn scenario_a_empty_book_limit_bid_books_residual() {
        let (_dir, store) = setup();
        let mut asks = OrderList::prime(Side::Ask, 10, &store).unwrap();
        let mut bids = OrderList::prime(Side::Bid, 10, &store).unwrap();
        let schedule = FeeSchedule::flat(0, 0);
        let fee_engine = FeeEngine::new(&schedule, &ZeroVolumeLookup);
        let ledger = LedgerWriter::new(999, 1, 2);
        let mut cache = BalanceCache::new();

        let q = quote(1, Side::Bid, OrderKind::Limit, Some(100), 10, 1);
        let outcome = MatchingEngine::process(&q, &mut asks, &mut bids, &store, &ledger, &fee_engine, &mut cache).unwrap();

        assert!(outcome.trades.is_empty());
        assert_eq!(outcome.residual.unwrap().qty_remaining, 10);
    }

    #[test]
    fn scenario_b_full_crossing_match_emits_one_trade_and_six_entries() {
        let (_dir, store) = setup();
        let mut asks = OrderList::prime(Side::Ask, 10, &store).unwrap();
        let mut bids = OrderList::prime(Side::Bid, 10, &store).unwrap();
        let schedule = FeeSchedule::flat(0, 0);
        let fee_engine = FeeEngine::new(&schedule, &ZeroVolumeLookup);
        let ledger = LedgerWriter::new(999, 1, 2);
        let mut cache = BalanceCache::new();

        let resting_ask = quote(1, Side::Ask, OrderKind::Limit, Some(100), 5, 2);
        MatchingEngine::process(&resting_ask, &mut bids, &mut asks, &store, &ledger, &fee_engine, &mut cache).unwrap();

        let incoming_bid = quote(2, Side::Bid, OrderKind::Limit, Some(100), 5, 3);
        let outcome = MatchingEngine::process(&incoming_bid, &mut asks, &mut bids, &store, &ledger, &fee_engine, &mut cache).unwrap();

        assert_eq!(outcome.trades.len(), 1);
        assert_eq!(outcome.trades[0].qty, 5);
        assert_eq!(outcome.trades[0].maker_account_id, 2);
        assert_eq!(outcome.trades[0].taker_account_id, 3);
        assert_eq!(outcome.ledger_entries.len(), 6);
        assert!(outcome.residual.is_none());
    }

    #[test]
    fn scenario_c_partial_fill_leaves_residual() {
        let (_dir, store) = setup();
        let mut asks = OrderList::prime(Side::Ask, 10, &store).unwrap();
        let mut bids = OrderList::prime(Side::Bid, 10, &store).unwrap();
        let schedule = FeeSchedule::flat(0, 0);
        let fee_engine = FeeEngine::new(&schedule, &ZeroVolumeLookup);
        let ledger = LedgerWriter::new(999, 1, 2);
        let mut cache = BalanceCache::new();

        let resting_ask = quote(1, Side::Ask, OrderKind::Limit, Some(100), 3, 2);
        MatchingEngine::process(&resting_ask, &mut bids, &mut asks, &store, &ledger, &fee_engine, &mut cache).unwrap();

        let incoming_bid = quote(2, Side::Bid, OrderKind::Limit, Some(100), 5, 3);
        let outcome = MatchingEngine::process(&incoming_bid, &mut asks, &mut bids, &store, &ledger, &fee_engine, &mut cache).unwrap();

        assert_eq!(outcome.trades.len(), 1);
        assert_eq!(outcome.trades[0].qty, 3);
        let residual = outcome.residual.unwrap();
        assert_eq!(residual.qty_remaining, 2);
        assert_eq!(residual.price, 100);
    }

    #[test]
    fn scenario_d_self_trade_is_skipped() {
        let (_dir, store) = setup();
        let mut asks = OrderList::prime(Side::Ask, 10, &store).unwrap();
        let mut bids = OrderList::prime(Side::Bid, 10, &store).unwrap();
        let schedule = FeeSchedule::flat(0, 0);
        let fee_engine = FeeEngine::new(&schedule, &ZeroVolumeLookup);
        let ledger = LedgerWriter::new(999, 1, 2);
        let mut cache = BalanceCache::new();

        let resting_ask = quote(1, Side::Ask, OrderKind::Limit, Some(100), 5, 1);
        MatchingEngine::process(&resting_ask, &mut bids, &mut asks, &store, &ledger, &fee_engine, &mut cache).unwrap();

        let incoming_bid = quote(2, Side::Bid, OrderKind::Limit, Some(101), 5, 1);
        let outcome = MatchingEngine::process(&incoming_bid, &mut asks, &mut bids, &store, &ledger, &fee_engine, &mut cache).unwrap();

        assert!(outcome.trades.is_empty());
        let residual = outcome.residual.unwrap();
        assert_eq!(residual.qty_remaining, 5);
        assert_eq!(residual.price, 101);
        // resting ask must remain untouched
        assert_eq!(asks.get(1).unwrap().qty_remaining, 5);
    }

    #[test]
    fn market_order_residual_is_dropped_not_booked() {
        let (_dir, store) = setup();
        let mut asks = OrderList::prime(Side::Ask, 10, &store).unwrap();
        let mut bids = OrderList::prime(Side::Bid, 10, &store).unwrap();
        let schedule = FeeSchedule::flat(0, 0);
        let fee_engine = FeeEngine::new(&schedule, &ZeroVolumeLookup);
        let ledger = LedgerWriter::new(999, 1, 2);
        let mut cache = BalanceCache::new();

        // empty ask book: a market bid with no liquidity to cross
        // against must not book a residual.
        let incoming = quote(1, Side::Bid, OrderKind::Market, None, 10, 1);
        let outcome = MatchingEngine::process(&incoming, &mut asks, &mut bids, &store, &ledger, &fee_engine, &mut cache).unwrap();

        assert!(outcome.trades.is_empty());
        assert!(outcome.residual.is_none());
        assert!(bids.get(1).is_none());
    }
}
