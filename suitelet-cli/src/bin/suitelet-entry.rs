//! suitelet-entry: worker entry point run inside the host application.
//!
//! Reads WorkerArgs from `SUITELET_WORKER_ARGS`, runs them with the suite runner named
//! by `SUITELET_RUNNER`, and writes the outcome to `SUITELET_OUTCOME_FILE`.

use std::process;

use anyhow::Context;
use suitelet::config::RUNNER_ENV;
use suitelet::{CommandSuiteRunner, Environment, SessionOutcome, run_entry};

fn main() {
    suitelet_cli::init_tracing();

    match run() {
        Ok(outcome) => process::exit(outcome.exit_code()),
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Worker entry failed to start");
            eprintln!("error: {e:#}");
            process::exit(1);
        }
    }
}

fn run() -> anyhow::Result<SessionOutcome> {
    let env = Environment::inherited();
    let runner = env
        .get(RUNNER_ENV)
        .and_then(CommandSuiteRunner::from_command_line)
        .with_context(|| format!("{RUNNER_ENV} is not set"))?;
    let base_dir = std::env::current_dir().context("cannot determine working directory")?;

    let runtime = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;
    Ok(runtime.block_on(run_entry(runner, &base_dir, env)))
}
