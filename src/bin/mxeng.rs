//! CLI surface for the per-market dispatcher host.
//!
//! ```text
//! mxeng run <market_code>
//! mxeng flush <market_code>
//! ```
//!
//! No CLI argument-parsing crate is pulled in: the surface is two
//! subcommands with one positional argument each, and hand-rolled
//! `std::env::args()` parsing covers that without adding a dependency
//! the rest of the stack doesn't otherwise need.

use std::io::{self, BufRead};
use std::process::ExitCode;

use tracing::{error, info};

use mock_exchange_engine::config::Config;
use mock_exchange_engine::orderbook::dispatcher::Dispatcher;
use mock_exchange_engine::orderbook::market::{InboundEvent, Market};
use mock_exchange_engine::orderbook::types::{OrderKind, Side};

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("run") => match args.get(2) {
            Some(market_code) => run(market_code),
            None => usage_error("run requires a <market_code> argument"),
        },
        Some("flush") => match args.get(2) {
            Some(market_code) => flush(market_code),
            None => usage_error("flush requires a <market_code> argument"),
        },
        _ => usage_error("usage: mxeng <run|flush> <market_code>"),
    }
}

fn usage_error(message: &str) -> ExitCode {
    eprintln!("{message}");
    ExitCode::from(1)
}

/// Start the consumer loop for one market. Events are read as
/// newline-delimited JSON from stdin, one per line, matching the
/// payload shapes in `spec.md` §6; the loop exits cleanly at EOF.
fn run(market_code: &str) -> ExitCode {
    let config = Config::from_env();
    let dispatcher = match Dispatcher::spawn(market_code, config) {
        Ok(d) => d,
        Err(e) => {
            error!(market = market_code, error = %e, "fatal init error");
            return ExitCode::from(1);
        }
    };

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                error!(market = market_code, error = %e, "queue read error");
                dispatcher.shutdown();
                return ExitCode::from(3);
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match parse_event(&line) {
            Ok(event) => {
                if let Err(e) = dispatcher.send(event) {
                    error!(market = market_code, error = %e, "queue dispatch error");
                    return ExitCode::from(3);
                }
            }
            Err(e) => {
                error!(market = market_code, error = %e, "malformed event rejected");
            }
        }
    }

    info!(market = market_code, "input closed, shutting down");
    dispatcher.shutdown();
    ExitCode::SUCCESS
}

/// Force a flush of a market's pending state without starting a
/// long-running consumer loop.
fn flush(market_code: &str) -> ExitCode {
    let config = Config::from_env();
    let mut market = match Market::open(market_code, config) {
        Ok(m) => m,
        Err(e) => {
            error!(market = market_code, error = %e, "fatal init error");
            return ExitCode::from(1);
        }
    };
    match market.flush() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(market = market_code, error = %e, "store corruption during flush");
            ExitCode::from(2)
        }
    }
}

/// Minimal JSON decoding for the four inbound payload shapes. Uses
/// `serde_json::Value` rather than typed structs per payload so a
/// single function stays the boundary between wire strings and
/// [`InboundEvent`].
fn parse_event(line: &str) -> Result<InboundEvent, String> {
    let value: serde_json::Value =
        serde_json::from_str(line).map_err(|e| format!("invalid json: {e}"))?;

    let method = value
        .get("method")
        .and_then(|v| v.as_str())
        .ok_or("missing \"method\" field")?;

    let account_id = value
        .get("account_id")
        .and_then(|v| v.as_i64())
        .ok_or("missing \"account_id\" field")?;

    match method {
        "place-order" => {
            let market = value
                .get("market")
                .and_then(|v| v.as_str())
                .ok_or("missing \"market\" field")?
                .to_string();
            let side = match value.get("side").and_then(|v| v.as_str()) {
                Some("buy") => Side::Bid,
                Some("sell") => Side::Ask,
                _ => return Err("side must be \"buy\" or \"sell\"".to_string()),
            };
            let kind = match value.get("type").and_then(|v| v.as_str()) {
                Some("limit") => OrderKind::Limit,
                Some("market") => OrderKind::Market,
                _ => return Err("type must be \"limit\" or \"market\"".to_string()),
            };
            let price = value.get("price").and_then(|v| v.as_i64());
            let amount = value
                .get("amount")
                .and_then(|v| v.as_i64())
                .ok_or("missing \"amount\" field")?;
            Ok(InboundEvent::PlaceOrder {
                market,
                account_id,
                side,
                kind,
                price,
                amount,
            })
        }
        "cancel-order" => {
            let market = value
                .get("market")
                .and_then(|v| v.as_str())
                .ok_or("missing \"market\" field")?
                .to_string();
            let order_id = value
                .get("order_uuid")
                .and_then(|v| v.as_i64())
                .ok_or("missing \"order_uuid\" field")?;
            Ok(InboundEvent::CancelOrder {
                market,
                account_id,
                order_id,
            })
        }
        "deposit" | "withdraw" => {
            let asset_id = value
                .get("asset_id")
                .and_then(|v| v.as_i64())
                .ok_or("missing \"asset_id\" field")?;
            let amount = value
                .get("amount")
                .and_then(|v| v.as_i64())
                .ok_or("missing \"amount\" field")?;
            if method == "deposit" {
                Ok(InboundEvent::Deposit {
                    account_id,
                    asset_id,
                    amount,
                })
            } else {
                Ok(InboundEvent::Withdraw {
                    account_id,
                    asset_id,
                    amount,
                })
            }
        }
        other => Err(format!("unknown method \"{other}\"")),
    }
}
