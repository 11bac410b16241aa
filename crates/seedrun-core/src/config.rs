use crate::error::{HarnessError, Result};
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

/// CPUs left free for the rest of the machine when sizing the pool.
pub const RESERVED_CPUS: usize = 1;

/// Deadline carried over from the legacy `timeout 10` wrapper.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(10);

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(1);

pub const DEFAULT_BINARY: &str = "./freecell";

pub const DEFAULT_STATS_DIR: &str = "stats";

/// Everything a run needs, resolved from CLI flags and environment.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// External program invoked once per trial.
    pub binary: PathBuf,
    /// Extra arguments placed before the seed.
    pub binary_args: Vec<OsString>,
    pub stats_dir: PathBuf,
    pub start_seed: u64,
    pub workers: usize,
    pub deadline: Duration,
    pub grace_period: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_BINARY),
            binary_args: Vec::new(),
            stats_dir: PathBuf::from(DEFAULT_STATS_DIR),
            start_seed: 0,
            workers: default_worker_count(),
            deadline: DEFAULT_DEADLINE,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

impl HarnessConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(HarnessError::InvalidConfig(
                "worker count must be at least 1".into(),
            ));
        }
        if self.deadline.is_zero() {
            return Err(HarnessError::InvalidConfig(
                "deadline must be greater than zero".into(),
            ));
        }
        if self.binary.as_os_str().is_empty() {
            return Err(HarnessError::InvalidConfig(
                "binary path must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Host parallelism minus [`RESERVED_CPUS`], never below one.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .saturating_sub(RESERVED_CPUS)
        .max(1)
}

/// Parses `"500ms"`, `"2s"`, `"1m 30s"` or a bare number of seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).map_err(|_| {
            HarnessError::InvalidConfig(format!(
                "duration must be a non-negative number of seconds: {s}"
            ))
        });
    }
    humantime::parse_duration(s)
        .map_err(|e| HarnessError::InvalidConfig(format!("invalid duration '{s}': {e}")))
}
