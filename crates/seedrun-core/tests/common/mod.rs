#![allow(dead_code)]

use seedrun_core::TrialRunner;
use std::path::Path;
use std::time::{Duration, Instant};

pub const DEADLINE: Duration = Duration::from_secs(1);
pub const GRACE: Duration = Duration::from_millis(200);

/// Runner whose "external program" is an inline shell script; the seed
/// arrives as `$1`.
pub fn sh_runner(script: &str) -> TrialRunner {
    TrialRunner::new("/bin/sh")
        .with_args(["-c", script, "stub"])
        .with_deadline(DEADLINE)
        .with_grace_period(GRACE)
}

pub fn ledger_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_owned)
        .collect()
}

/// Seed column of a ledger line.
pub fn seed_of(line: &str) -> u64 {
    line.split(' ')
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| panic!("malformed ledger line: {line:?}"))
}

pub async fn wait_for_line(path: &Path, needle: &str, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if ledger_lines(path).iter().any(|l| l.starts_with(needle)) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
