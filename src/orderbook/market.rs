//! `Market` ties together one market's `BookStore`, both
//! [`OrderList`]s, its [`TradeTape`], and its ledger-write session.
//!
//! Generalizes the teacher's single struct owning both book sides
//! (`orderbook/book.rs`'s `OrderBook<T>`) from an in-memory lock-free
//! skip-map pair to the durable, single-writer components this crate
//! uses instead.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::Config;
use crate::orderbook::error::MarketError;
use crate::orderbook::fees::{FeeEngine, FeeSchedule, VolumeLookup, ZeroVolumeLookup};
use crate::orderbook::ledger::{BalanceCache, LedgerEntry, LedgerKind, LedgerWriter};
use crate::orderbook::order_list::OrderList;
use crate::orderbook::store::mmap_store::MmapBookStore;
use crate::orderbook::store::{BookStore, FlushOp};
use crate::orderbook::trade::{Trade, TradeTape};
use crate::orderbook::types::{OrderKind, Quote, Side};
use crate::utils::now_millis;

/// Inbound event payloads, matching `spec.md` §6 field-for-field. The
/// `side`/`type` string fields are decoded into [`Side`]/[`OrderKind`]
/// at construction so `Market` never sees raw strings.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    PlaceOrder {
        market: String,
        account_id: i64,
        side: Side,
        kind: OrderKind,
        price: Option<i64>,
        amount: i64,
    },
    CancelOrder {
        market: String,
        account_id: i64,
        order_id: i64,
    },
    Deposit {
        account_id: i64,
        asset_id: i64,
        amount: i64,
    },
    Withdraw {
        account_id: i64,
        asset_id: i64,
        amount: i64,
    },
}

/// The result of dispatching a single event.
#[derive(Debug, Default)]
pub struct EventResult {
    pub trades: Vec<Trade>,
    pub ledger_entries: Vec<LedgerEntry>,
    pub assigned_order_id: Option<i64>,
}

/// A persisted monotonic id counter, one file per market.
struct IdGenerator {
    path: PathBuf,
    next: i64,
}

impl IdGenerator {
    fn open(path: PathBuf) -> Result<Self, MarketError> {
        let next = fs::read_to_string(&path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(1);
        Ok(IdGenerator { path, next })
    }

    fn next_id(&mut self) -> Result<i64, MarketError> {
        let id = self.next;
        self.next += 1;
        fs::write(&self.path, self.next.to_string())
            .map_err(|e| MarketError::StoreCorruption(e.into()))?;
        Ok(id)
    }
}

/// Owns every durable and in-memory component for one market.
pub struct Market {
    pub code: String,
    store: MmapBookStore,
    bids: OrderList,
    asks: OrderList,
    tape: TradeTape,
    ledger: LedgerWriter,
    fee_schedule: FeeSchedule,
    volume_lookup: Box<dyn VolumeLookup>,
    id_gen: IdGenerator,
    config: Config,
    last_flush_ms: i64,
    /// Running balances for every `(account_id, asset_id)` pair this
    /// market has touched. Lives for the process's lifetime rather than
    /// a single event: nothing else in this crate durably stores
    /// balances, so this cache is the balance ledger's only home
    /// (it resets on restart, same as the upstream system's stubbed
    /// balance table).
    balance_cache: BalanceCache,
}

impl Market {
    /// Open (or create) a market, rehydrating both `OrderList`s from
    /// the durable store per `spec.md` §7's recovery contract.
    pub fn open(code: &str, config: Config) -> Result<Self, MarketError> {
        let market_dir = config.market_dir(code);
        fs::create_dir_all(&market_dir).map_err(|e| MarketError::StoreCorruption(e.into()))?;

        let store = MmapBookStore::open(&market_dir).map_err(MarketError::from)?;
        let bids = OrderList::prime(Side::Bid, config.working_set_limit, &store)
            .map_err(MarketError::from)?;
        let asks = OrderList::prime(Side::Ask, config.working_set_limit, &store)
            .map_err(MarketError::from)?;
        let tape = TradeTape::new(config.trades_dir(code))
            .map_err(|e| MarketError::StoreCorruption(e.into()))?;
        let id_gen = IdGenerator::open(market_dir.join("next_id"))?;

        info!(market = code, "market opened, working sets rehydrated");

        Ok(Market {
            code: code.to_string(),
            store,
            bids,
            asks,
            tape,
            // account 0 is the exchange's fee-collection account, asset
            // ids 1 (base) / 2 (quote) are placeholders a deployment
            // overrides per market via `with_assets`.
            ledger: LedgerWriter::new(0, 1, 2),
            fee_schedule: FeeSchedule::flat(0, 0),
            volume_lookup: Box::new(ZeroVolumeLookup),
            id_gen,
            config,
            last_flush_ms: now_millis(),
            balance_cache: BalanceCache::new(),
        })
    }

    pub fn with_assets(mut self, exchange_account_id: i64, base_asset_id: i64, quote_asset_id: i64) -> Self {
        self.ledger = LedgerWriter::new(exchange_account_id, base_asset_id, quote_asset_id);
        self
    }

    pub fn with_fee_schedule(mut self, schedule: FeeSchedule) -> Self {
        self.fee_schedule = schedule;
        self
    }

    pub fn with_volume_lookup(mut self, lookup: Box<dyn VolumeLookup>) -> Self {
        self.volume_lookup = lookup;
        self
    }

    /// Process one event to completion, applying flush policy
    /// afterward. See `spec.md` §4.7.
    pub fn dispatch(&mut self, event: InboundEvent) -> Result<EventResult, MarketError> {
        let result = match event {
            InboundEvent::PlaceOrder {
                market,
                account_id,
                side,
                kind,
                price,
                amount,
            } => {
                self.check_market(&market)?;
                self.place_order(account_id, side, kind, price, amount)?
            }
            InboundEvent::CancelOrder {
                market,
                account_id: _,
                order_id,
            } => {
                self.check_market(&market)?;
                self.cancel_order(order_id)?
            }
            InboundEvent::Deposit {
                account_id,
                asset_id,
                amount,
            } => self.deposit_or_withdraw(account_id, asset_id, amount, LedgerKind::Deposit)?,
            InboundEvent::Withdraw {
                account_id,
                asset_id,
                amount,
            } => self.deposit_or_withdraw(account_id, asset_id, -amount, LedgerKind::Withdraw)?,
        };

        self.maybe_flush()?;
        Ok(result)
    }

    /// Reject an event whose declared market does not match this one
    /// (`spec.md` §7's "unknown market" validation case).
    fn check_market(&self, market: &str) -> Result<(), MarketError> {
        if market != self.code {
            return Err(MarketError::Validation(format!(
                "unknown market \"{market}\" (this dispatcher serves \"{}\")",
                self.code
            )));
        }
        Ok(())
    }

    fn place_order(
        &mut self,
        account_id: i64,
        side: Side,
        kind: OrderKind,
        price: Option<i64>,
        amount: i64,
    ) -> Result<EventResult, MarketError> {
        let id = self.id_gen.next_id()?;
        let quote = Quote {
            id,
            kind,
            side,
            price,
            qty: amount,
            account_id,
        };
        quote.validate().map_err(MarketError::Validation)?;

        let (opposite, same_side) = match side {
            Side::Bid => (&mut self.asks, &mut self.bids),
            Side::Ask => (&mut self.bids, &mut self.asks),
        };

        let fee_engine = FeeEngine::new(&self.fee_schedule, self.volume_lookup.as_ref());

        let outcome = crate::orderbook::matching::MatchingEngine::process(
            &quote,
            opposite,
            same_side,
            &self.store,
            &self.ledger,
            &fee_engine,
            &mut self.balance_cache,
        )
        .map_err(MarketError::from)?;

        for trade in &outcome.trades {
            self.tape.record(trade.clone());
        }

        Ok(EventResult {
            trades: outcome.trades,
            ledger_entries: outcome.ledger_entries,
            assigned_order_id: Some(id),
        })
    }

    fn cancel_order(&mut self, order_id: i64) -> Result<EventResult, MarketError> {
        let stored = self.store.get_id(order_id).map_err(MarketError::from)?;

        let side = if let Some((side, _)) = stored {
            side
        } else if self.bids.get(order_id).is_some() {
            Side::Bid
        } else if self.asks.get(order_id).is_some() {
            Side::Ask
        } else {
            return Err(MarketError::UnknownOrder { id: order_id });
        };

        let list = match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };

        let stored_key = stored.map(|(_, key)| key);
        if !list.cancel(order_id, stored_key) {
            return Err(MarketError::UnknownOrder { id: order_id });
        }
        list.apply_deletes();

        Ok(EventResult {
            assigned_order_id: Some(order_id),
            ..Default::default()
        })
    }

    fn deposit_or_withdraw(
        &mut self,
        account_id: i64,
        asset_id: i64,
        signed_amount: i64,
        kind: LedgerKind,
    ) -> Result<EventResult, MarketError> {
        let entry = self
            .ledger
            .deposit_or_withdraw(&mut self.balance_cache, account_id, asset_id, signed_amount, kind);
        Ok(EventResult {
            ledger_entries: vec![entry],
            ..Default::default()
        })
    }

    /// Apply the flush policy: trigger if either threshold in
    /// `spec.md` §4.5 has been reached.
    fn maybe_flush(&mut self) -> Result<bool, MarketError> {
        let pending = self.bids.pending_count() + self.asks.pending_count();
        let elapsed = now_millis() - self.last_flush_ms;
        if pending >= self.config.flush_count || elapsed >= self.config.flush_interval_ms {
            self.flush()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Force a flush regardless of policy thresholds (the CLI's
    /// `flush <market_code>` surface, `spec.md` §6).
    pub fn flush(&mut self) -> Result<(), MarketError> {
        let bid_ops = self.bids.drain_flush_ops();
        let ask_ops = self.asks.drain_flush_ops();

        let inserted_bid_ids: Vec<i64> = bid_ops
            .iter()
            .filter_map(|op| match op {
                FlushOp::Insert(_, o) => Some(o.id),
                _ => None,
            })
            .collect();
        let inserted_ask_ids: Vec<i64> = ask_ops
            .iter()
            .filter_map(|op| match op {
                FlushOp::Insert(_, o) => Some(o.id),
                _ => None,
            })
            .collect();

        let mut ops = bid_ops;
        ops.extend(ask_ops);

        if !ops.is_empty() {
            self.store.apply_flush(ops).map_err(MarketError::from)?;
            for id in inserted_bid_ids {
                self.bids.mark_in_store(id);
            }
            for id in inserted_ask_ids {
                self.asks.mark_in_store(id);
            }
        }

        if let Err(e) = self.tape.drain(crate::utils::now_micros()) {
            warn!(market = %self.code, error = %e, "trade tape write failed, retaining pending trades");
        }

        self.last_flush_ms = now_millis();
        info!(market = %self.code, "flush complete");
        Ok(())
    }

    pub fn trades_dir(&self) -> &Path {
        self.tape.dir()
    }
}
