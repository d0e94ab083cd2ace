// =============================================================================
// Trade journal — size-rotated JSON-lines audit log
// =============================================================================
//
// One JSON object per line in logs/trading.jsonl with a stable schema per
// event. Renderers (TUI, notifiers) subscribe by tailing the file; the
// engine itself never reads it back.
//
// Rotation: when the active file would exceed 10 MiB it is renamed to
// trading.jsonl.1 (existing backups shift up), keeping at most 30 backups.
// A failed journal write is logged and swallowed — audit output must never
// break a trade.
// =============================================================================

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::warn;

use crate::execution::performance::PerformanceStats;

const JOURNAL_FILE: &str = "trading.jsonl";
const MAX_BYTES: u64 = 10 * 1024 * 1024;
const BACKUP_COUNT: usize = 30;

/// Every journal line is one of these, tagged by `event`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalEvent {
    SessionStart {
        timestamp: DateTime<Utc>,
        mode: String,
        market: String,
        total_value: Decimal,
        cash_balance: Decimal,
    },
    SessionEnd {
        timestamp: DateTime<Utc>,
        market: String,
        total_value: Option<Decimal>,
    },
    EntryFilled {
        timestamp: DateTime<Utc>,
        symbol: String,
        name: String,
        market: String,
        system: Option<u8>,
        entry_price: Decimal,
        breakout_level: Option<Decimal>,
        quantity: u64,
        position_value: Decimal,
        stop_loss: Decimal,
        stop_loss_type: String,
        slippage_pct: Option<Decimal>,
    },
    PyramidFilled {
        timestamp: DateTime<Utc>,
        symbol: String,
        name: String,
        market: String,
        price: Decimal,
        additional_quantity: u64,
        new_units: u32,
        avg_entry_price: Decimal,
        new_stop_loss: Option<Decimal>,
    },
    PositionClosed {
        timestamp: DateTime<Utc>,
        symbol: String,
        name: String,
        market: String,
        exit_reason: String,
        entry_price: Decimal,
        exit_price: Decimal,
        quantity: u64,
        pnl: Decimal,
        pnl_percent: Decimal,
        holding_days: i64,
        win_rate: Option<Decimal>,
        total_trades: Option<usize>,
    },
    DailySummary {
        timestamp: DateTime<Utc>,
        market: String,
        total_value: Decimal,
        unrealized_pnl: Decimal,
        open_positions: usize,
        total_units: u32,
        stats: PerformanceStats,
    },
}

struct Inner {
    file: File,
    written: u64,
}

pub struct TradeJournal {
    dir: PathBuf,
    inner: Mutex<Option<Inner>>,
}

impl TradeJournal {
    /// Open (creating the directory if needed) the journal under `dir`.
    pub fn open(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(JOURNAL_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            dir,
            inner: Mutex::new(Some(Inner { file, written })),
        })
    }

    /// Append one event. Never fails the caller.
    pub fn record(&self, event: &JournalEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "journal serialization failed");
                return;
            }
        };
        if let Err(e) = self.append_line(&line) {
            warn!(error = %e, "journal write failed");
        }
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let mut guard = self.inner.lock();
        let needed = line.len() as u64 + 1;

        if let Some(inner) = guard.as_ref() {
            if inner.written + needed > MAX_BYTES {
                // Close the handle before rotating so the rename is clean on
                // every platform.
                *guard = None;
                self.rotate()?;
            }
        }

        if guard.is_none() {
            let path = self.dir.join(JOURNAL_FILE);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            let written = file.metadata()?.len();
            *guard = Some(Inner { file, written });
        }

        let inner = guard.as_mut().expect("journal file just opened");
        writeln!(inner.file, "{line}")?;
        inner.written += needed;
        Ok(())
    }

    /// Shift trading.jsonl.N -> .N+1 (dropping the oldest) and move the
    /// active file to .1.
    fn rotate(&self) -> std::io::Result<()> {
        let base = self.dir.join(JOURNAL_FILE);

        let backup = |n: usize| self.dir.join(format!("{JOURNAL_FILE}.{n}"));
        let oldest = backup(BACKUP_COUNT);
        if oldest.exists() {
            std::fs::remove_file(&oldest)?;
        }
        for n in (1..BACKUP_COUNT).rev() {
            let from = backup(n);
            if from.exists() {
                std::fs::rename(&from, backup(n + 1))?;
            }
        }
        if base.exists() {
            std::fs::rename(&base, backup(1))?;
        }
        Ok(())
    }

    #[cfg(test)]
    fn path(&self) -> PathBuf {
        self.dir.join(JOURNAL_FILE)
    }
}
