//! Shared startup plumbing for the suitelet binaries.

use std::path::PathBuf;

use anyhow::{Context, bail};
use suitelet::{
    CommandLauncher, CommandSuiteRunner, Executor, HostLaunchAdapter, InProcessExecutor,
    NetworkOptions, SessionConfig, SessionOutcome, run_worker,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_ENV: &str = "SUITELET_LOG";
pub const ENTRY_BINARY: &str = "suitelet-entry";

const USAGE: &str = r#"Usage: suitelet '{"role":"listen"|"connect","port":<n>,"host":"<h>"}'"#;

/// Filter directives for a `SUITELET_LOG` value.
pub fn filter_directives(level: Option<&str>) -> String {
    let level = match level {
        Some("debug") => "debug",
        Some("warn") | Some("warning") => "warn",
        Some("error") => "error",
        _ => "info",
    };
    format!("suitelet={level},suitelet_cli={level}")
}

/// Log to stderr. `RUST_LOG` wins over `SUITELET_LOG`; `LOG_FORMAT=json` for JSON lines.
pub fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(filter_directives(std::env::var(LOG_ENV).ok().as_deref()))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

/// The entry binary installed next to the running executable.
pub fn default_entry() -> PathBuf {
    let name = format!("{ENTRY_BINARY}{}", std::env::consts::EXE_SUFFIX);
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&name)))
        .unwrap_or_else(|| PathBuf::from(name))
}

/// Host launch when a host executable is configured, otherwise a direct suite runner.
pub fn build_executor(
    config: &SessionConfig,
    network: &NetworkOptions,
) -> anyhow::Result<Box<dyn Executor>> {
    let cwd = std::env::current_dir().context("cannot determine working directory")?;

    if let Some(executable) = &config.host_executable {
        tracing::debug!(executable = %executable.display(), "Using host launch adapter");
        let host = config.host_config(cwd, default_entry());
        let launcher = CommandLauncher::new(executable);
        return Ok(Box::new(HostLaunchAdapter::new(launcher, host, network.clone())));
    }

    if let Some(runner) = config
        .runner_command
        .as_deref()
        .and_then(CommandSuiteRunner::from_command_line)
    {
        tracing::debug!(program = %runner.program().display(), "Using in-process suite runner");
        return Ok(Box::new(InProcessExecutor::new(runner, cwd)));
    }

    bail!("nothing to execute: set SUITELET_HOST_EXECUTABLE or SUITELET_RUNNER")
}

/// Run the launcher for the raw argv[1] and return the process exit code.
///
/// Invalid network options exit 1 before any socket is opened.
pub fn launch(arg: Option<&str>) -> i32 {
    let network = match NetworkOptions::from_arg(arg) {
        Ok(network) => network,
        Err(e) => {
            tracing::error!(error = %e, "Cannot start session");
            eprintln!("error: {e}");
            eprintln!();
            eprintln!("{USAGE}");
            return 1;
        }
    };

    match run(&network) {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Launcher failed");
            eprintln!("error: {e:#}");
            1
        }
    }
}

fn run(network: &NetworkOptions) -> anyhow::Result<SessionOutcome> {
    let config = SessionConfig::from_env();
    tracing::debug!(?config, role = %network.role, port = network.port.get(), "Launcher starting");

    let executor = build_executor(&config, network)?;
    let runtime = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;

    let outcome = runtime.block_on(run_worker(&*executor, network, &config.worker_config()));
    match &outcome {
        SessionOutcome::Finished { failure_count } => {
            tracing::info!(failure_count, "Launcher finished");
        }
        SessionOutcome::Failed { error, detail } => {
            tracing::error!(%error, %detail, "Launcher failed");
        }
    }
    Ok(outcome)
}
