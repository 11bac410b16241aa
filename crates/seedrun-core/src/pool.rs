//! Fixed-size pool of sequential trial workers.
//!
//! Each worker is a small state machine:
//!
//! ```text
//!          stop requested
//!   Idle -----------------> Stopped
//!    |  ^
//!    |  | recorded
//!    v  |
//!   Running --drain observed--> Draining --recorded--> Stopped
//! ```
//!
//! The shutdown token is only consulted at two checkpoints: in `Idle` before
//! allocating a seed, and after a trial returns. A trial that has started is
//! always recorded, so `records_written == seeds_issued` once `run` returns
//! without an infrastructure error.

use crate::error::{HarnessError, Result};
use crate::ledger::StatsSink;
use crate::seed::{Seed, SeedAllocator};
use crate::shutdown::{ShutdownController, ShutdownToken};
use crate::trial::{Outcome, TrialReport, TrialRunner};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::Instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running(Seed),
    Draining(TrialReport),
    Stopped,
}

/// Per-outcome tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub completed: u64,
    /// Completed trials with a non-zero code.
    pub failed: u64,
    pub timed_out: u64,
    pub killed: u64,
    pub spawn_errors: u64,
}

impl OutcomeCounts {
    pub fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Completed(code) => {
                self.completed += 1;
                if code != 0 {
                    self.failed += 1;
                }
            }
            Outcome::TimedOut => self.timed_out += 1,
            Outcome::Killed => self.killed += 1,
            Outcome::SpawnError => self.spawn_errors += 1,
        }
    }

    pub fn merge(&mut self, other: &OutcomeCounts) {
        self.completed += other.completed;
        self.failed += other.failed;
        self.timed_out += other.timed_out;
        self.killed += other.killed;
        self.spawn_errors += other.spawn_errors;
    }

    pub fn total(&self) -> u64 {
        self.completed + self.timed_out + self.killed + self.spawn_errors
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSummary {
    pub workers: usize,
    pub seeds_issued: u64,
    pub records_written: u64,
    pub outcomes: OutcomeCounts,
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self { workers }
    }

    /// Runs until `shutdown` stops the pool or a worker hits an
    /// infrastructure error, then waits for every worker to stop.
    ///
    /// On the first fatal error the pool requests a stop so the remaining
    /// workers finish their current trial and exit; that first error is
    /// returned.
    pub async fn run(
        &self,
        allocator: Arc<SeedAllocator>,
        sink: Arc<StatsSink>,
        runner: Arc<TrialRunner>,
        shutdown: &ShutdownController,
    ) -> Result<PoolSummary> {
        if self.workers == 0 {
            return Err(HarnessError::InvalidConfig(
                "worker count must be at least 1".into(),
            ));
        }

        tracing::info!(
            workers = self.workers,
            start_seed = allocator.peek(),
            deadline = ?runner.deadline(),
            grace = ?runner.grace_period(),
            "starting worker pool"
        );

        let mut join_set = JoinSet::new();
        for id in 0..self.workers {
            let worker = Worker {
                id,
                allocator: Arc::clone(&allocator),
                sink: Arc::clone(&sink),
                runner: Arc::clone(&runner),
                token: shutdown.token(),
            };
            join_set.spawn(worker.run().instrument(tracing::info_span!("worker", id)));
        }

        let mut outcomes = OutcomeCounts::default();
        let mut first_error: Option<HarnessError> = None;
        while let Some(joined) = join_set.join_next().await {
            let result = match joined {
                Ok(res) => res,
                Err(e) => Err(HarnessError::WorkerPanicked(e.to_string())),
            };
            match result {
                Ok(tally) => outcomes.merge(&tally),
                Err(e) => {
                    tracing::error!(error = %e, "worker failed, stopping the pool");
                    shutdown.request_stop();
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        let summary = PoolSummary {
            workers: self.workers,
            seeds_issued: allocator.issued(),
            records_written: sink.records_written(),
            outcomes,
        };
        tracing::info!(
            seeds = summary.seeds_issued,
            records = summary.records_written,
            completed = outcomes.completed,
            timed_out = outcomes.timed_out,
            killed = outcomes.killed,
            spawn_errors = outcomes.spawn_errors,
            "worker pool stopped"
        );
        Ok(summary)
    }
}

struct Worker {
    id: usize,
    allocator: Arc<SeedAllocator>,
    sink: Arc<StatsSink>,
    runner: Arc<TrialRunner>,
    token: ShutdownToken,
}

impl Worker {
    async fn run(mut self) -> Result<OutcomeCounts> {
        let mut tally = OutcomeCounts::default();
        let mut state = WorkerState::Idle;

        loop {
            state = match state {
                WorkerState::Idle => {
                    if self.token.is_stopping() {
                        WorkerState::Stopped
                    } else {
                        WorkerState::Running(self.allocator.next())
                    }
                }
                WorkerState::Running(seed) => {
                    let report = self.run_trial(seed).await?;
                    if self.token.is_draining() {
                        WorkerState::Draining(report)
                    } else {
                        self.sink.record(&report)?;
                        tally.add(report.outcome);
                        WorkerState::Idle
                    }
                }
                WorkerState::Draining(report) => {
                    self.sink.record(&report)?;
                    tally.add(report.outcome);
                    WorkerState::Stopped
                }
                WorkerState::Stopped => break,
            };
        }

        tracing::debug!(worker = self.id, trials = tally.total(), "worker stopped");
        Ok(tally)
    }

    async fn run_trial(&mut self, seed: Seed) -> Result<TrialReport> {
        let raw_log = self.sink.create_raw_log(seed)?;
        Ok(self.runner.run(seed, raw_log, &mut self.token).await)
    }
}
