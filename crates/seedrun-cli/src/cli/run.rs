use crate::cli::args::Cli;
use crate::exit_codes;
use anyhow::{Context, Result};
use seedrun_core::ShutdownController;

pub async fn run(cli: Cli) -> Result<i32> {
    let cfg = cli.into_config();
    cfg.validate()?;

    tracing::info!(
        binary = %cfg.binary.display(),
        stats_dir = %cfg.stats_dir.display(),
        start_seed = cfg.start_seed,
        workers = cfg.workers,
        "seedrun starting (Ctrl-C to stop, twice to kill running trials at once)"
    );

    let shutdown = ShutdownController::new();
    shutdown
        .install()
        .context("failed to install interrupt handler")?;

    let summary = seedrun_core::run_harness(&cfg, &shutdown)
        .await
        .with_context(|| format!("trial run aborted (stats dir {})", cfg.stats_dir.display()))?;

    let o = &summary.outcomes;
    eprintln!(
        "seedrun: {} trials recorded ({} completed, {} non-zero, {} timed out, {} killed, {} spawn errors)",
        summary.records_written, o.completed, o.failed, o.timed_out, o.killed, o.spawn_errors
    );
    Ok(exit_codes::SUCCESS)
}
