//! Infrastructure errors.
//!
//! Per-trial failures never show up here: a trial that cannot spawn, overruns
//! its deadline or has to be killed is an [`Outcome`](crate::trial::Outcome)
//! and gets recorded like any other. Everything in [`HarnessError`] means the
//! harness itself can no longer produce output and the run must stop.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// The stats directory could not be created.
    #[error("cannot create stats directory {path}: {source}")]
    StatsDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The ledger file could not be opened for appending.
    #[error("cannot open ledger {path}: {source}")]
    LedgerOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Appending a record to the ledger failed (disk full, revoked fd, ...).
    #[error("cannot append to ledger {path}: {source}")]
    LedgerWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A raw log file could not be created for a freshly allocated seed.
    #[error("cannot create raw log {path}: {source}")]
    RawLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The interrupt handler could not be registered.
    #[error("cannot install interrupt handler: {0}")]
    SignalHandler(#[source] std::io::Error),

    /// A worker task died without reaching its Stopped state.
    #[error("worker task failed: {0}")]
    WorkerPanicked(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, HarnessError>;
