//! Property tests for the six invariants enumerated in the matching
//! engine's testable-properties section: priority, conservation,
//! no-self-trade, price-in-limit, idempotent rehydrate, round-trip.

use proptest::prelude::*;
use tempfile::tempdir;

use mock_exchange_engine::orderbook::codec::decode_sort_key;
use mock_exchange_engine::orderbook::fees::{FeeEngine, FeeSchedule, ZeroVolumeLookup};
use mock_exchange_engine::orderbook::ledger::{BalanceCache, LedgerWriter};
use mock_exchange_engine::orderbook::matching::MatchingEngine;
use mock_exchange_engine::orderbook::order_list::OrderList;
use mock_exchange_engine::orderbook::store::BookStore;
use mock_exchange_engine::orderbook::store::mmap_store::MmapBookStore;
use mock_exchange_engine::orderbook::types::{Order, OrderKind, Quote, Side};

fn fixed_fee_setup() -> (FeeSchedule, ZeroVolumeLookup, LedgerWriter) {
    (FeeSchedule::flat(5, 10), ZeroVolumeLookup, LedgerWriter::new(999, 1, 2))
}

/// A small resting ask book (distinct accounts, ascending ids) crossed
/// by one incoming bid, checking invariants 1-4.
fn resting_ask_ids() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(1i64..=50, 1..30).prop_map(|mut v| {
        v.sort_unstable();
        v.dedup();
        v
    })
}

proptest! {
    #[test]
    fn priority_conservation_no_self_trade_price_in_limit(ids in resting_ask_ids(), sweep_qty in 1i64..60) {
        let dir = tempdir().unwrap();
        let store = MmapBookStore::open(dir.path()).unwrap();
        let mut asks = OrderList::prime(Side::Ask, 5_000, &store).unwrap();
        let mut bids = OrderList::prime(Side::Bid, 5_000, &store).unwrap();
        let (schedule, vol, ledger) = fixed_fee_setup();
        let fee_engine = FeeEngine::new(&schedule, &vol);
        let mut cache = BalanceCache::new();

        // account 1000+id resting, each 1 qty at price 100, ascending id
        // order gives a known expected consumption order.
        for &id in &ids {
            let resting = Quote {
                id,
                kind: OrderKind::Limit,
                side: Side::Ask,
                price: Some(100),
                qty: 1,
                account_id: 1_000 + id,
            };
            MatchingEngine::process(&resting, &mut bids, &mut asks, &store, &ledger, &fee_engine, &mut cache).unwrap();
        }

        let sweep = Quote {
            id: 100_000,
            kind: OrderKind::Limit,
            side: Side::Bid,
            price: Some(100),
            qty: sweep_qty,
            account_id: 1, // shares an account with no resting order, never self-trades here
        };
        let outcome = MatchingEngine::process(&sweep, &mut asks, &mut bids, &store, &ledger, &fee_engine, &mut cache).unwrap();

        // invariant 1: trades consumed in ascending maker id order.
        let consumed_ids: Vec<i64> = outcome.trades.iter().map(|t| t.maker_order_id).collect();
        let mut sorted_consumed = consumed_ids.clone();
        sorted_consumed.sort_unstable();
        prop_assert_eq!(consumed_ids, sorted_consumed);

        // invariant 2: ledger entries sum to zero per asset.
        let base_sum: i64 = outcome.ledger_entries.iter().filter(|e| e.asset_id == 1).map(|e| e.amount).sum();
        let quote_sum: i64 = outcome.ledger_entries.iter().filter(|e| e.asset_id == 2).map(|e| e.amount).sum();
        prop_assert_eq!(base_sum, 0);
        prop_assert_eq!(quote_sum, 0);

        // invariant 3: no self-trade among produced trades.
        for trade in &outcome.trades {
            prop_assert_ne!(trade.maker_account_id, trade.taker_account_id);
        }

        // invariant 4: no trade at a maker price above the limit price.
        for trade in &outcome.trades {
            prop_assert!(trade.price <= 100);
        }
    }
}

/// Invariant 5: closing and reopening the store with no further events
/// produces a byte-identical working set on rehydrate.
#[test]
fn idempotent_rehydrate_matches_prior_session() {
    let dir = tempdir().unwrap();
    {
        let store = MmapBookStore::open(dir.path()).unwrap();
        let mut asks = OrderList::prime(Side::Ask, 10, &store).unwrap();
        for id in 1..=5 {
            asks.insert(
                Order {
                    id,
                    price: 100 + id,
                    qty_remaining: 1,
                    account_id: id,
                    in_store: false,
                },
                &store,
            )
            .unwrap();
        }
        let ops = asks.drain_flush_ops();
        store.apply_flush(ops).unwrap();
    }

    let snapshot_a = {
        let store = MmapBookStore::open(dir.path()).unwrap();
        store.get_range(Side::Ask, None, 100).unwrap()
    };
    let snapshot_b = {
        let store = MmapBookStore::open(dir.path()).unwrap();
        store.get_range(Side::Ask, None, 100).unwrap()
    };
    assert_eq!(snapshot_a, snapshot_b);
}

/// Invariant 6: an order inserted then cancelled before flush leaves no
/// trace in the store once flushed.
#[test]
fn round_trip_insert_then_cancel_leaves_no_trace() {
    let dir = tempdir().unwrap();
    let store = MmapBookStore::open(dir.path()).unwrap();
    let mut asks = OrderList::prime(Side::Ask, 10, &store).unwrap();

    asks.insert(
        Order {
            id: 1,
            price: 100,
            qty_remaining: 5,
            account_id: 1,
            in_store: false,
        },
        &store,
    )
    .unwrap();
    let ops = asks.drain_flush_ops();
    store.apply_flush(ops).unwrap();

    let mut asks = OrderList::prime(Side::Ask, 10, &store).unwrap();
    asks.delete(1);
    asks.apply_deletes();
    let ops = asks.drain_flush_ops();
    store.apply_flush(ops).unwrap();

    assert!(store.get_id(1).unwrap().is_none());
    assert!(store.get_range(Side::Ask, None, 10).unwrap().is_empty());

    // sanity: sort key decode round-trips the id we just removed.
    let key = Order {
        id: 1,
        price: 100,
        qty_remaining: 5,
        account_id: 1,
        in_store: false,
    }
    .sort_key(Side::Ask);
    let (_, decoded_id) = decode_sort_key(&key);
    assert_eq!(decoded_id, 1);
}
