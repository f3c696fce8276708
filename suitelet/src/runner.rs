//! Suite runner seam and the in-process executor.
//!
//! The suite runner is an external capability: it loads test definitions for discovery
//! and runs them, reporting how many failed. [`InProcessExecutor`] resolves WorkerArgs
//! (environment overlay, file expansion) and hands the result to a runner.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::bridge::protocol::{Action, SessionId, WorkerArgs};
use crate::environment::Environment;
use crate::error::SessionError;
use crate::files;
use crate::worker::Executor;

pub const RUNNER_ACTION_ENV: &str = "SUITELET_RUNNER_ACTION";
pub const RUNNER_OPTIONS_ENV: &str = "SUITELET_RUNNER_OPTIONS";
pub const RUN_IDS_ENV: &str = "SUITELET_RUN_IDS";

// Shell conventions for a command that was found but not executable, or not found.
const CANNOT_EXECUTE: i32 = 126;
const NOT_FOUND: i32 = 127;

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("failed to start suite runner: {0}")]
    Spawn(#[from] io::Error),

    #[error("failed to load test files: {0}")]
    Load(String),

    #[error("suite runner terminated abnormally: {0}")]
    Abnormal(String),

    #[error("{0}")]
    Other(String),
}

/// What to execute and how.
#[derive(Debug, Clone, Copy)]
pub struct RunRequest<'a> {
    pub files: &'a [PathBuf],
    /// Opaque runner configuration from the driver.
    pub options: &'a serde_json::Value,
    /// Restrict execution to these test ids.
    pub run_ids: Option<&'a [String]>,
    /// Complete environment for the run (inherited environment with the overlay applied).
    pub env: &'a Environment,
}

#[async_trait]
pub trait SuiteRunner: Send + Sync {
    /// Load every file for discovery without executing tests. Any failure fails the whole load.
    async fn load(&self, files: &[PathBuf]) -> Result<(), RunnerError>;

    /// Execute the suite and return the number of failed tests.
    async fn run(&self, request: RunRequest<'_>) -> Result<usize, RunnerError>;
}

/// Runs WorkerArgs directly against a suite runner.
pub struct InProcessExecutor<R> {
    runner: R,
    base_dir: PathBuf,
    base_env: Environment,
}

impl<R: SuiteRunner> InProcessExecutor<R> {
    /// `base_dir` anchors relative file patterns.
    pub fn new(runner: R, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            base_dir: base_dir.into(),
            base_env: Environment::inherited(),
        }
    }

    /// Replace the environment the overlay is applied to.
    pub fn with_environment(mut self, env: Environment) -> Self {
        self.base_env = env;
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Environment for a run: base environment with the driver's overlay applied.
    pub fn run_environment(&self, args: &WorkerArgs) -> Environment {
        let mut env = self.base_env.clone();
        env.apply(&args.env);
        env
    }
}

#[async_trait]
impl<R: SuiteRunner> Executor for InProcessExecutor<R> {
    async fn load(&self, session: SessionId, args: &WorkerArgs) -> Result<(), SessionError> {
        let files = files::expand(&args.files, &self.base_dir)?;
        tracing::info!(
            session_id = %session,
            files = files.len(),
            "Loading test files for discovery"
        );
        self.runner.load(&files).await?;
        Ok(())
    }

    async fn run(&self, session: SessionId, args: &WorkerArgs) -> Result<usize, SessionError> {
        let env = self.run_environment(args);
        let files = files::expand(&args.files, &self.base_dir)?;
        tracing::info!(
            session_id = %session,
            files = files.len(),
            run_ids = args.run_ids.as_ref().map(Vec::len),
            "Running test suite"
        );

        let failure_count = self
            .runner
            .run(RunRequest {
                files: &files,
                options: &args.runner_options,
                run_ids: args.run_ids.as_deref(),
                env: &env,
            })
            .await?;

        tracing::info!(session_id = %session, failure_count, "Suite run complete");
        Ok(failure_count)
    }
}

/// Suite runner backed by an external command.
///
/// The command receives the resolved files as trailing arguments, the action in
/// `SUITELET_RUNNER_ACTION`, the runner options as JSON in `SUITELET_RUNNER_OPTIONS`,
/// and the run-id filter (if any) as a JSON array in `SUITELET_RUN_IDS`. For `run`, the
/// exit code is the failure count.
#[derive(Debug, Clone)]
pub struct CommandSuiteRunner {
    program: String,
    args: Vec<String>,
}

impl CommandSuiteRunner {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a whitespace-separated command line. `None` if it is blank.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    fn command(&self, action: Action, files: &[PathBuf]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .args(files.iter().map(|p| p.as_os_str()))
            .env(RUNNER_ACTION_ENV, action.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd
    }

    pub fn program(&self) -> &Path {
        Path::new(&self.program)
    }
}

#[async_trait]
impl SuiteRunner for CommandSuiteRunner {
    async fn load(&self, files: &[PathBuf]) -> Result<(), RunnerError> {
        let status = self.command(Action::Load, files).status().await?;
        if status.success() {
            Ok(())
        } else {
            Err(RunnerError::Load(format!("runner {status}")))
        }
    }

    async fn run(&self, request: RunRequest<'_>) -> Result<usize, RunnerError> {
        let options = serde_json::to_string(request.options)
            .map_err(|e| RunnerError::Other(format!("unserializable runner options: {e}")))?;

        let mut cmd = self.command(Action::Run, request.files);
        cmd.env_clear()
            .envs(request.env.iter())
            .env(RUNNER_ACTION_ENV, Action::Run.as_str())
            .env(RUNNER_OPTIONS_ENV, options);
        if let Some(ids) = request.run_ids {
            let ids = serde_json::to_string(ids)
                .map_err(|e| RunnerError::Other(format!("unserializable run ids: {e}")))?;
            cmd.env(RUN_IDS_ENV, ids);
        }

        let status = cmd.status().await?;
        match status.code() {
            Some(code @ (CANNOT_EXECUTE | NOT_FOUND)) => Err(RunnerError::Abnormal(format!(
                "runner could not be executed (exit code {code})"
            ))),
            Some(code) => usize::try_from(code)
                .map_err(|_| RunnerError::Abnormal(format!("negative exit code {code}"))),
            None => Err(RunnerError::Abnormal(status.to_string())),
        }
    }
}
