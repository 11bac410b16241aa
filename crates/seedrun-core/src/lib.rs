//! Concurrent harness for seeded trials against an external program.
//!
//! A [`WorkerPool`] runs N workers that share one [`SeedAllocator`] and one
//! [`StatsSink`]. Every worker loops "allocate seed, run trial, record"
//! until the [`ShutdownController`] tells it to stop; the [`TrialRunner`]
//! bounds each trial with a deadline and a SIGTERM/SIGKILL ladder.

#[cfg(not(unix))]
compile_error!("seedrun supervises trials with POSIX process groups and wait4; only unix targets are supported");

pub mod config;
pub mod error;
pub mod ledger;
pub mod pool;
pub mod rusage;
pub mod seed;
pub mod shutdown;
pub mod trial;

pub use config::{default_worker_count, parse_duration, HarnessConfig};
pub use error::{HarnessError, Result};
pub use ledger::{format_record, StatsSink};
pub use pool::{OutcomeCounts, PoolSummary, WorkerPool, WorkerState};
pub use seed::{Seed, SeedAllocator};
pub use shutdown::{ShutdownController, ShutdownState, ShutdownToken};
pub use trial::{Outcome, TrialMetrics, TrialReport, TrialRunner};

use std::sync::Arc;

/// Validates `cfg`, opens the stats directory and runs the pool until
/// `shutdown` stops it.
pub async fn run_harness(cfg: &HarnessConfig, shutdown: &ShutdownController) -> Result<PoolSummary> {
    cfg.validate()?;
    let sink = Arc::new(StatsSink::open(&cfg.stats_dir)?);
    let allocator = Arc::new(SeedAllocator::new(cfg.start_seed));
    let runner = Arc::new(TrialRunner::from_config(cfg));
    WorkerPool::new(cfg.workers)
        .run(allocator, sink, runner, shutdown)
        .await
}
