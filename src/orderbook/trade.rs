//! Trade records and the append-only trade tape.
//!
//! Tape rotation follows the teacher's temp-file + fsync + rename
//! discipline (`sequencer/file_journal.rs`); the field order of a tape
//! line is taken directly from the original system's trade tuple.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::orderbook::types::Side;

/// An immutable trade record, appended to the tape on each fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub ts_micros: i64,
    pub price: i64,
    pub qty: i64,
    pub maker_order_id: i64,
    pub maker_account_id: i64,
    pub taker_order_id: i64,
    pub taker_account_id: i64,
    /// The side of the book the *taker*'s quote was on.
    pub taker_side: Side,
}

impl Trade {
    /// Render one tape line: `time_us,price,qty,taker_side,
    /// maker_order_id,maker_account_id,taker_order_id,taker_account_id`.
    pub fn to_line(&self) -> String {
        let side = match self.taker_side {
            Side::Bid => "buy",
            Side::Ask => "sell",
        };
        format!(
            "{},{},{},{},{},{},{},{}",
            self.ts_micros,
            self.price,
            self.qty,
            side,
            self.maker_order_id,
            self.maker_account_id,
            self.taker_order_id,
            self.taker_account_id,
        )
    }
}

/// An in-memory deque of trades drained to a rotating file on flush.
pub struct TradeTape {
    dir: PathBuf,
    pending: Vec<Trade>,
}

impl TradeTape {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(TradeTape {
            dir,
            pending: Vec::new(),
        })
    }

    pub fn record(&mut self, trade: Trade) {
        self.pending.push(trade);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drain the in-memory deque to `trades/.tmp`, fsync, then rename
    /// to `trades/<ts_us>`. Atomic per file; on error the deque is left
    /// untouched so the caller can retry on the next flush.
    pub fn drain(&mut self, ts_micros: i64) -> std::io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let tmp_path = self.dir.join(".tmp");
        {
            let mut f: File = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            for trade in &self.pending {
                writeln!(f, "{}", trade.to_line())?;
            }
            f.flush()?;
            f.sync_all()?;
        }
        let final_path = self.dir.join(ts_micros.to_string());
        fs::rename(&tmp_path, &final_path)?;
        self.pending.clear();
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_trade() -> Trade {
        Trade {
            ts_micros: 1,
            price: 100,
            qty: 5,
            maker_order_id: 1,
            maker_account_id: 2,
            taker_order_id: 3,
            taker_account_id: 4,
            taker_side: Side::Bid,
        }
    }

    #[test]
    fn line_format_matches_fixed_field_order() {
        let line = sample_trade().to_line();
        assert_eq!(line, "1,100,5,buy,1,2,3,4");
    }

    #[test]
    fn drain_writes_named_file_and_clears_pending() {
        let dir = tempdir().unwrap();
        let mut tape = TradeTape::new(dir.path()).unwrap();
        tape.record(sample_trade());
        tape.drain(999).unwrap();
        assert_eq!(tape.pending_len(), 0);
        let contents = fs::read_to_string(dir.path().join("999")).unwrap();
        assert_eq!(contents, "1,100,5,buy,1,2,3,4\n");
        assert!(!dir.path().join(".tmp").exists());
    }

    #[test]
    fn drain_with_nothing_pending_is_a_noop() {
        let dir = tempdir().unwrap();
        let mut tape = TradeTape::new(dir.path()).unwrap();
        tape.drain(1).unwrap();
        assert!(!dir.path().join("1").exists());
    }
}
