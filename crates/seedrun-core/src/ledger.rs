//! Ledger and raw-log output.
//!
//! Layout under the stats directory:
//!
//! ```text
//! stats/
//!   times.txt          one line per trial, completion order
//!   game_000000.txt    combined stdout/stderr of seed 0
//!   game_000001.txt    ...
//! ```
//!
//! Ledger line format (`??` marks an unknown field):
//!
//! ```text
//! seed 000042 code 0 wall 0.53 user 0.49 sys 0.02 mem 5120kb
//! seed 000043 code -15 wall ?? user ?? sys ?? mem ??kb
//! ```

use crate::error::{HarnessError, Result};
use crate::seed::Seed;
use crate::trial::TrialReport;
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

pub const LEDGER_FILE: &str = "times.txt";

/// Token written in place of any field that could not be measured.
pub const UNKNOWN: &str = "??";

/// Append-only ledger plus per-seed raw logs.
///
/// `record` may be called from any number of workers; each line goes out as
/// a single `write_all` on an `O_APPEND` handle under a mutex, so lines never
/// interleave.
#[derive(Debug)]
pub struct StatsSink {
    dir: PathBuf,
    ledger_path: PathBuf,
    ledger: Mutex<File>,
    written: AtomicU64,
}

impl StatsSink {
    /// Creates the stats directory if needed and opens the ledger for appending.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| HarnessError::StatsDir {
            path: dir.clone(),
            source,
        })?;

        let ledger_path = dir.join(LEDGER_FILE);
        let ledger = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&ledger_path)
            .map_err(|source| HarnessError::LedgerOpen {
                path: ledger_path.clone(),
                source,
            })?;

        tracing::debug!(path = %ledger_path.display(), "ledger opened");
        Ok(Self {
            dir,
            ledger_path,
            ledger: Mutex::new(ledger),
            written: AtomicU64::new(0),
        })
    }

    pub fn ledger_path(&self) -> &Path {
        &self.ledger_path
    }

    pub fn raw_log_path(&self, seed: Seed) -> PathBuf {
        self.dir.join(raw_log_name(seed))
    }

    /// Creates (or truncates) the raw log of `seed`.
    pub fn create_raw_log(&self, seed: Seed) -> Result<File> {
        let path = self.raw_log_path(seed);
        File::create(&path).map_err(|source| HarnessError::RawLog { path, source })
    }

    /// Appends one line for `report`.
    pub fn record(&self, report: &TrialReport) -> Result<()> {
        let line = format_record(report);
        {
            let mut ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
            ledger
                .write_all(line.as_bytes())
                .map_err(|source| HarnessError::LedgerWrite {
                    path: self.ledger_path.clone(),
                    source,
                })?;
        }
        self.written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Lines appended through this sink (not counting earlier runs).
    pub fn records_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }
}

pub fn raw_log_name(seed: Seed) -> String {
    format!("game_{seed:06}.txt")
}

/// Renders a ledger line, newline included.
pub fn format_record(report: &TrialReport) -> String {
    let m = &report.metrics;
    let mut line = String::with_capacity(80);
    let _ = write!(line, "seed {:06} code ", report.seed);
    match report.outcome.exit_code() {
        Some(code) => {
            let _ = write!(line, "{code}");
        }
        None => line.push_str(UNKNOWN),
    }
    line.push_str(" wall ");
    push_secs(&mut line, m.wall);
    line.push_str(" user ");
    push_secs(&mut line, m.user);
    line.push_str(" sys ");
    push_secs(&mut line, m.sys);
    line.push_str(" mem ");
    match m.max_rss_kib {
        Some(kib) => {
            let _ = write!(line, "{kib}");
        }
        None => line.push_str(UNKNOWN),
    }
    line.push_str("kb\n");
    line
}

fn push_secs(line: &mut String, value: Option<Duration>) {
    match value {
        Some(d) => {
            let _ = write!(line, "{:.2}", d.as_secs_f64());
        }
        None => line.push_str(UNKNOWN),
    }
}
