//! Supervised execution of one trial.
//!
//! The external program runs as `<binary> [args..] <seed>` in its own process
//! group, with stdout and stderr both going to the seed's raw log. A blocking
//! `wait4` task reaps it and collects resource usage, and that task is raced
//! against the deadline (and against a drain request):
//!
//! ```text
//! exit before deadline  -> Completed(code), measured metrics
//! deadline / drain      -> SIGTERM to the group, wait grace period
//!   exit within grace   -> TimedOut (-15), measured metrics
//!   still alive / abort -> SIGKILL to the group -> Killed (-15), unknown metrics
//! spawn failure         -> SpawnError, unknown metrics
//! ```
//!
//! Exactly one [`TrialReport`] comes back per call and the call never takes
//! longer than [`TrialRunner::max_occupancy`].

use crate::config::HarnessConfig;
use crate::rusage::{self, ChildExit, ProcUsage};
use crate::seed::Seed;
use crate::shutdown::ShutdownToken;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::ffi::OsString;
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Exit code recorded for trials the harness had to terminate.
pub const TERMINATED_CODE: i32 = -15;

/// Upper bound on how long reaping takes after SIGKILL.
pub const KILL_OVERHEAD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Exited on its own before the deadline. Signal deaths carry the
    /// negated signal number.
    Completed(i32),
    /// Terminated by the harness and exited within the grace period. The
    /// trigger is the deadline, or an operator interrupt that drains
    /// in-flight trials early; the ledger does not distinguish the two.
    TimedOut,
    /// Terminated by the harness and still alive when the grace period ran
    /// out, or when a second interrupt cut it short.
    Killed,
    /// The program could not be started.
    SpawnError,
}

impl Outcome {
    /// Code written to the ledger; `None` when there is no meaningful one.
    pub fn exit_code(self) -> Option<i32> {
        match self {
            Outcome::Completed(code) => Some(code),
            Outcome::TimedOut | Outcome::Killed => Some(TERMINATED_CODE),
            Outcome::SpawnError => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Completed(_) => "completed",
            Outcome::TimedOut => "timed_out",
            Outcome::Killed => "killed",
            Outcome::SpawnError => "spawn_error",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Completed(code) => write!(f, "completed({code})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Timing and memory for one trial. `None` means unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrialMetrics {
    pub wall: Option<Duration>,
    pub user: Option<Duration>,
    pub sys: Option<Duration>,
    pub max_rss_kib: Option<u64>,
}

impl TrialMetrics {
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn measured(wall: Duration, usage: ProcUsage) -> Self {
        Self {
            wall: Some(wall),
            user: Some(usage.user_time),
            sys: Some(usage.sys_time),
            max_rss_kib: Some(usage.max_rss_kib),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialReport {
    pub seed: Seed,
    pub outcome: Outcome,
    pub metrics: TrialMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escalation {
    Deadline,
    Drain,
}

type Reaper = JoinHandle<io::Result<ChildExit>>;

#[derive(Debug, Clone)]
pub struct TrialRunner {
    program: PathBuf,
    args: Vec<OsString>,
    deadline: Duration,
    grace_period: Duration,
}

impl TrialRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            deadline: crate::config::DEFAULT_DEADLINE,
            grace_period: crate::config::DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn from_config(cfg: &HarnessConfig) -> Self {
        Self::new(cfg.binary.clone())
            .with_args(cfg.binary_args.iter().cloned())
            .with_deadline(cfg.deadline)
            .with_grace_period(cfg.grace_period)
    }

    /// Arguments passed before the seed.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Longest a single call to [`run`](Self::run) can occupy a worker.
    pub fn max_occupancy(&self) -> Duration {
        self.deadline + self.grace_period + KILL_OVERHEAD
    }

    /// Runs one trial, writing its combined output to `raw_log`.
    pub async fn run(&self, seed: Seed, raw_log: File, shutdown: &mut ShutdownToken) -> TrialReport {
        let started = Instant::now();

        let pid = match self.spawn(seed, &raw_log) {
            Ok(pid) => pid,
            Err(e) => {
                tracing::warn!(seed, program = %self.program.display(), error = %e, "spawn failed");
                let mut raw_log = raw_log;
                let _ = writeln!(
                    raw_log,
                    "seedrun: failed to spawn {}: {e}",
                    self.program.display()
                );
                return TrialReport {
                    seed,
                    outcome: Outcome::SpawnError,
                    metrics: TrialMetrics::unknown(),
                };
            }
        };
        drop(raw_log);
        tracing::debug!(seed, pid, "trial started");

        let mut reaper: Reaper = tokio::task::spawn_blocking(move || rusage::wait_child(pid));
        let deadline = tokio::time::sleep(self.deadline);
        tokio::pin!(deadline);

        let trigger = tokio::select! {
            biased;
            joined = &mut reaper => {
                return match flatten(joined) {
                    Ok(exit) => {
                        let report = TrialReport {
                            seed,
                            outcome: Outcome::Completed(exit.kind.code()),
                            metrics: TrialMetrics::measured(started.elapsed(), exit.usage),
                        };
                        tracing::debug!(seed, outcome = %report.outcome, "trial finished");
                        report
                    }
                    Err(e) => self.lost_child(seed, pid, e),
                };
            }
            _ = &mut deadline => Escalation::Deadline,
            _ = shutdown.drained() => Escalation::Drain,
        };

        self.escalate(seed, pid, trigger, started, reaper, shutdown)
            .await
    }

    fn spawn(&self, seed: Seed, raw_log: &File) -> io::Result<u32> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(seed.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::from(raw_log.try_clone()?))
            .stderr(Stdio::from(raw_log.try_clone()?))
            .process_group(0);
        // The std handle is dropped without waiting; the reaper task owns reaping.
        let child = cmd.spawn()?;
        Ok(child.id())
    }

    async fn escalate(
        &self,
        seed: Seed,
        pid: u32,
        trigger: Escalation,
        started: Instant,
        mut reaper: Reaper,
        shutdown: &mut ShutdownToken,
    ) -> TrialReport {
        tracing::warn!(
            seed,
            pid,
            ?trigger,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "escalating trial, sending SIGTERM"
        );
        signal_group(pid, Signal::SIGTERM, &reaper);

        let graced = tokio::select! {
            biased;
            joined = &mut reaper => Some(joined),
            _ = tokio::time::sleep(self.grace_period) => None,
            _ = shutdown.aborted() => {
                tracing::warn!(seed, pid, "abort requested, skipping the rest of the grace period");
                None
            }
        };

        if let Some(joined) = graced {
            return match flatten(joined) {
                Ok(exit) => {
                    tracing::info!(seed, ?trigger, "trial exited within grace period");
                    TrialReport {
                        seed,
                        outcome: Outcome::TimedOut,
                        metrics: TrialMetrics::measured(started.elapsed(), exit.usage),
                    }
                }
                Err(e) => self.lost_child(seed, pid, e),
            };
        }

        tracing::warn!(seed, pid, ?trigger, "trial still alive, sending SIGKILL");
        signal_group(pid, Signal::SIGKILL, &reaper);
        match tokio::time::timeout(KILL_OVERHEAD, &mut reaper).await {
            Ok(joined) => {
                if let Err(e) = flatten(joined) {
                    tracing::error!(seed, pid, error = %e, "reaping killed trial failed");
                }
            }
            Err(_) => {
                // the blocking reaper keeps waiting and reaps it eventually
                tracing::error!(seed, pid, "killed trial not reaped within kill overhead");
            }
        }

        TrialReport {
            seed,
            outcome: Outcome::Killed,
            metrics: TrialMetrics::unknown(),
        }
    }

    /// The reaper failed, so the exit status is gone. Make sure nothing of
    /// the group survives and account the trial as killed.
    fn lost_child(&self, seed: Seed, pid: u32, err: io::Error) -> TrialReport {
        tracing::error!(seed, pid, error = %err, "waiting for trial failed");
        if err.raw_os_error() != Some(libc::ECHILD) {
            send(pid, Signal::SIGKILL);
        }
        TrialReport {
            seed,
            outcome: Outcome::Killed,
            metrics: TrialMetrics::unknown(),
        }
    }
}

fn flatten(joined: Result<io::Result<ChildExit>, tokio::task::JoinError>) -> io::Result<ChildExit> {
    match joined {
        Ok(res) => res,
        Err(e) => Err(io::Error::new(io::ErrorKind::Other, e.to_string())),
    }
}

/// Signals the trial's process group unless the leader has already been
/// reaped, in which case the id may belong to someone else by now.
fn signal_group(pid: u32, signal: Signal, reaper: &Reaper) {
    if reaper.is_finished() {
        tracing::debug!(pid, ?signal, "trial already reaped, not signalling");
        return;
    }
    send(pid, signal);
}

fn send(pid: u32, signal: Signal) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) => {}
        Err(Errno::ESRCH) => tracing::debug!(pid, ?signal, "process group already gone"),
        Err(e) => tracing::warn!(pid, ?signal, error = %e, "signalling trial failed"),
    }
}
