use assert_cmd::prelude::*;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use predicates::prelude::*;
use std::collections::BTreeSet;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

fn seedrun() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_seedrun"));
    cmd.env_remove("SEEDRUN_BINARY")
        .env_remove("SEEDRUN_STATS_DIR")
        .env_remove("SEEDRUN_WORKERS")
        .env_remove("SEEDRUN_DEADLINE")
        .env_remove("SEEDRUN_GRACE");
    cmd
}

/// `seedrun` wired to an inline shell script as the external program.
fn seedrun_with_script(stats: &Path, script: &str) -> Command {
    let mut cmd = seedrun();
    cmd.arg("--binary")
        .arg("/bin/sh")
        .args(["--arg", "-c", "--arg", script, "--arg", "stub"])
        .arg("--stats-dir")
        .arg(stats);
    cmd
}

fn ledger(stats: &Path) -> Vec<String> {
    std::fs::read_to_string(stats.join("times.txt"))
        .unwrap_or_default()
        .lines()
        .map(str::to_owned)
        .collect()
}

fn interrupt(child: &Child) {
    kill(Pid::from_raw(child.id() as i32), Signal::SIGINT).expect("send SIGINT");
}

fn wait_timeout(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().expect("try_wait") {
            return Some(status);
        }
        if start.elapsed() >= timeout {
            return None;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}

#[test]
fn help_mentions_start_seed() {
    seedrun()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("START_SEED"));
}

#[test]
fn zero_workers_is_a_config_error() {
    let tmp = tempfile::tempdir().unwrap();
    seedrun()
        .args(["--workers", "0", "--stats-dir"])
        .arg(tmp.path().join("stats"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("worker count must be at least 1"));
    assert!(!tmp.path().join("stats").exists());
}

#[test]
fn unusable_stats_dir_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let blocker = tmp.path().join("stats");
    std::fs::write(&blocker, "file in the way").unwrap();

    seedrun_with_script(&blocker, "exit 0")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("cannot create stats directory"));
}

#[test]
fn interrupt_drains_and_exits_cleanly() {
    let tmp = tempfile::tempdir().unwrap();
    let stats = tmp.path().join("stats");

    let mut child = seedrun_with_script(&stats, r#"echo "seed $1"; sleep 0.05"#)
        .args(["--workers", "2", "7"])
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn seedrun");

    assert!(
        wait_until(Duration::from_secs(10), || ledger(&stats).len() >= 4),
        "no progress in ledger"
    );
    interrupt(&child);
    let status = wait_timeout(&mut child, Duration::from_secs(10)).expect("seedrun did not exit");
    assert_eq!(status.code(), Some(0));

    let lines = ledger(&stats);
    let seeds: Vec<u64> = lines
        .iter()
        .map(|l| l.split(' ').nth(1).unwrap().parse().unwrap())
        .collect();
    let unique: BTreeSet<u64> = seeds.iter().copied().collect();
    assert_eq!(unique.len(), seeds.len(), "duplicate seed in {lines:?}");
    let expected: BTreeSet<u64> = (7..7 + seeds.len() as u64).collect();
    assert_eq!(unique, expected, "issued seeds must all be recorded");

    // trials caught mid-run by the interrupt are terminated, not waited out
    let mut completed = 0;
    for line in &lines {
        let seed: u64 = line.split(' ').nth(1).unwrap().parse().unwrap();
        assert!(stats.join(format!("game_{seed:06}.txt")).exists(), "{line}");
        if line.contains(" code 0 wall ") {
            completed += 1;
            let raw =
                std::fs::read_to_string(stats.join(format!("game_{seed:06}.txt"))).unwrap();
            assert_eq!(raw.trim(), format!("seed {seed}"));
        } else {
            assert!(line.contains(" code -15 wall "), "{line}");
        }
    }
    assert!(completed >= 4, "{lines:?}");
}

#[test]
fn interrupt_terminates_a_hung_trial_within_the_grace_period() {
    let tmp = tempfile::tempdir().unwrap();
    let stats = tmp.path().join("stats");

    let mut child = seedrun_with_script(&stats, "trap '' TERM; sleep 1000")
        .args(["--workers", "1", "--deadline", "60s", "--grace", "200ms"])
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn seedrun");

    assert!(
        wait_until(Duration::from_secs(10), || stats
            .join("game_000000.txt")
            .exists()),
        "trial never started"
    );
    std::thread::sleep(Duration::from_millis(200));

    let interrupted = Instant::now();
    interrupt(&child);
    let status = wait_timeout(&mut child, Duration::from_secs(5)).expect("seedrun did not exit");
    assert_eq!(status.code(), Some(0));
    assert!(
        interrupted.elapsed() < Duration::from_millis(1500),
        "{:?}",
        interrupted.elapsed()
    );

    assert_eq!(
        ledger(&stats),
        ["seed 000000 code -15 wall ?? user ?? sys ?? mem ??kb"]
    );
}

#[test]
fn second_interrupt_kills_without_waiting_for_grace() {
    let tmp = tempfile::tempdir().unwrap();
    let stats = tmp.path().join("stats");

    let mut child = seedrun_with_script(&stats, "trap '' TERM; sleep 1000")
        .args(["--workers", "1", "--deadline", "60s", "--grace", "30s"])
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn seedrun");

    assert!(
        wait_until(Duration::from_secs(10), || stats
            .join("game_000000.txt")
            .exists()),
        "trial never started"
    );
    std::thread::sleep(Duration::from_millis(200));

    interrupt(&child);
    // the hung trial sits out its grace period after the first interrupt
    assert!(wait_timeout(&mut child, Duration::from_millis(500)).is_none());
    assert!(ledger(&stats).is_empty());

    let second = Instant::now();
    interrupt(&child);
    let status = wait_timeout(&mut child, Duration::from_secs(5)).expect("seedrun did not exit");
    assert_eq!(status.code(), Some(0));
    assert!(second.elapsed() < Duration::from_secs(2), "{:?}", second.elapsed());

    assert_eq!(
        ledger(&stats),
        ["seed 000000 code -15 wall ?? user ?? sys ?? mem ??kb"]
    );
}
