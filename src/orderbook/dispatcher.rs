//! Per-market single-threaded consumer loop.
//!
//! Channel/thread shape grounded in the teacher's `BookManagerStd`
//! (`std::sync::mpsc` + a dedicated `thread::spawn` loop body, logged
//! with `tracing::{info, error}`). One `Dispatcher` owns exactly one
//! market, matching `spec.md` §5's "independent single-threaded
//! consumer bound to its own queue" scheduling model.

use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread::{self, JoinHandle};

use tracing::{error, info, warn};

use crate::config::Config;
use crate::orderbook::error::MarketError;
use crate::orderbook::market::{EventResult, InboundEvent, Market};

/// A command sent to a running dispatcher loop.
pub enum Command {
    Event(InboundEvent),
    /// Force an out-of-band flush (the CLI's `flush <market_code>`).
    Flush,
    Shutdown,
}

/// Handle to a running per-market consumer thread.
pub struct Dispatcher {
    sender: Sender<Command>,
    handle: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Open `market_code` and spawn its consumer thread.
    pub fn spawn(market_code: &str, config: Config) -> Result<Self, MarketError> {
        let market = Market::open(market_code, config)?;
        let (sender, receiver) = channel();
        let code = market_code.to_string();
        let handle = thread::spawn(move || run_loop(market, receiver));
        info!(market = %code, "dispatcher thread started");
        Ok(Dispatcher {
            sender,
            handle: Some(handle),
        })
    }

    pub fn send(&self, event: InboundEvent) -> Result<(), MarketError> {
        self.sender
            .send(Command::Event(event))
            .map_err(|_| MarketError::Validation("dispatcher loop has exited".into()))
    }

    pub fn force_flush(&self) -> Result<(), MarketError> {
        self.sender
            .send(Command::Flush)
            .map_err(|_| MarketError::Validation("dispatcher loop has exited".into()))
    }

    pub fn shutdown(mut self) {
        let _ = self.sender.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_loop(mut market: Market, receiver: Receiver<Command>) {
    for command in receiver.iter() {
        match command {
            Command::Event(event) => match market.dispatch(event) {
                Ok(EventResult { trades, .. }) if !trades.is_empty() => {
                    info!(market = %market.code, trades = trades.len(), "event produced trades");
                }
                Ok(_) => {}
                Err(e) => {
                    error!(market = %market.code, error = %e, "event rejected");
                }
            },
            Command::Flush => {
                if let Err(e) = market.flush() {
                    warn!(market = %market.code, error = %e, "forced flush failed");
                }
            }
            Command::Shutdown => {
                if let Err(e) = market.flush() {
                    error!(market = %market.code, error = %e, "final flush on shutdown failed");
                }
                break;
            }
        }
    }
    info!(market = %market.code, "dispatcher thread stopped");
}
