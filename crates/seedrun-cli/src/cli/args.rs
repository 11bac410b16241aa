use clap::Parser;
use seedrun_core::config::{DEFAULT_BINARY, DEFAULT_STATS_DIR};
use seedrun_core::{default_worker_count, HarnessConfig};
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "seedrun",
    version,
    about = "Run an external program once per seed, in parallel, until interrupted",
    long_about = "Run an external program once per seed, in parallel, until interrupted.\n\n\
        Each trial is invoked as `<binary> [ARG..] <seed>` and bounded by a deadline; \
        overrunning trials get SIGTERM, then SIGKILL after the grace period. Outcomes \
        are appended to <stats-dir>/times.txt and raw output goes to \
        <stats-dir>/game_<seed>.txt.\n\n\
        Ctrl-C once: stop allocating seeds and terminate running trials. \
        Ctrl-C twice: kill them without waiting out the grace period. \
        Interrupted trials are still recorded."
)]
pub struct Cli {
    /// First seed to allocate
    #[arg(value_name = "START_SEED", default_value_t = 0)]
    pub start_seed: u64,

    /// External program run for every trial
    #[arg(long, env = "SEEDRUN_BINARY", default_value = DEFAULT_BINARY)]
    pub binary: PathBuf,

    /// Extra argument passed before the seed (repeatable)
    #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true)]
    pub binary_args: Vec<OsString>,

    /// Directory holding the ledger and raw logs
    #[arg(long, env = "SEEDRUN_STATS_DIR", default_value = DEFAULT_STATS_DIR)]
    pub stats_dir: PathBuf,

    /// Concurrent workers [default: available CPUs minus one]
    #[arg(long, env = "SEEDRUN_WORKERS")]
    pub workers: Option<usize>,

    /// Wall-clock budget per trial (e.g. "10s", "500ms")
    #[arg(long, env = "SEEDRUN_DEADLINE", default_value = "10s", value_parser = parse_duration_arg)]
    pub deadline: Duration,

    /// Wait between SIGTERM and SIGKILL for overrunning trials
    #[arg(long, env = "SEEDRUN_GRACE", default_value = "1s", value_parser = parse_duration_arg)]
    pub grace: Duration,
}

impl Cli {
    pub fn into_config(self) -> HarnessConfig {
        HarnessConfig {
            binary: self.binary,
            binary_args: self.binary_args,
            stats_dir: self.stats_dir,
            start_seed: self.start_seed,
            workers: self.workers.unwrap_or_else(default_worker_count),
            deadline: self.deadline,
            grace_period: self.grace,
        }
    }
}

fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    seedrun_core::parse_duration(s).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn canonical_form_uses_defaults() {
        let cli = Cli::try_parse_from(["seedrun"]).unwrap();
        assert_eq!(cli.start_seed, 0);
        let cfg = cli.into_config();
        assert_eq!(cfg.binary, PathBuf::from(DEFAULT_BINARY));
        assert_eq!(cfg.stats_dir, PathBuf::from(DEFAULT_STATS_DIR));
        assert_eq!(cfg.deadline, Duration::from_secs(10));
        assert_eq!(cfg.grace_period, Duration::from_secs(1));
        assert_eq!(cfg.workers, default_worker_count());
    }

    #[test]
    fn positional_start_seed() {
        let cli = Cli::try_parse_from(["seedrun", "1234"]).unwrap();
        assert_eq!(cli.into_config().start_seed, 1234);
    }

    #[test]
    fn negative_start_seed_is_rejected() {
        assert!(Cli::try_parse_from(["seedrun", "-3"]).is_err());
    }

    #[test]
    fn binary_args_accept_hyphen_values() {
        let cli = Cli::try_parse_from([
            "seedrun",
            "--binary",
            "/bin/sh",
            "--arg",
            "-c",
            "--arg",
            "exit 0",
            "--arg",
            "stub",
            "--workers",
            "3",
            "--deadline",
            "500ms",
            "--grace",
            "0.2",
            "9",
        ])
        .unwrap();
        let cfg = cli.into_config();
        assert_eq!(cfg.binary_args, ["-c", "exit 0", "stub"].map(OsString::from));
        assert_eq!(cfg.workers, 3);
        assert_eq!(cfg.deadline, Duration::from_millis(500));
        assert_eq!(cfg.grace_period, Duration::from_millis(200));
        assert_eq!(cfg.start_seed, 9);
    }

    #[test]
    fn bad_duration_is_a_usage_error() {
        let err = Cli::try_parse_from(["seedrun", "--deadline", "soon"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }
}
