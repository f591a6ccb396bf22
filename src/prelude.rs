//! Prelude module that re-exports commonly used types and traits.
//!
//! ```rust
//! use mock_exchange_engine::prelude::*;
//! ```

pub use crate::config::Config;
pub use crate::orderbook::{
    BalanceCache, BookStore, Command, Dispatcher, EventResult, FeeEngine, FeeSchedule, FeeTier,
    FlushOp, InboundEvent, LedgerEntry, LedgerKind, LedgerWriter, Market, MarketError,
    MatchOutcome, MatchingEngine, MmapBookStore, Op, Order, OrderKind, OrderList, Quote, Side,
    StoreError, Trade, TradeTape, VolumeLookup, ZeroVolumeLookup,
};
pub use crate::utils::{now_micros, now_millis};
