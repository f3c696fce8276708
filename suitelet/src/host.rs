//! Host launch adapter.
//!
//! Turns WorkerArgs plus the session's network options into one launch of the host
//! application, which runs the worker entry point inside it. The entry point reports
//! back through an outcome file; the adapter reconciles that with the host's exit.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::process::Command;

use crate::bridge::codec::ProtocolError;
use crate::bridge::protocol::{Action, NetworkOptions, SessionId, SessionOutcome, WorkerArgs};
use crate::config::{DEFAULT_HOST_VERSION, HOST_VERSION_ENV, INSPECT_PORT_ENV, parse_port};
use crate::environment::Environment;
use crate::error::SessionError;
use crate::worker::Executor;

pub const WORKER_ARGS_ENV: &str = "SUITELET_WORKER_ARGS";
pub const IPC_HOST_ENV: &str = "SUITELET_IPC_HOST";
pub const IPC_PORT_ENV: &str = "SUITELET_IPC_PORT";
pub const IPC_ROLE_ENV: &str = "SUITELET_IPC_ROLE";
pub const OUTCOME_FILE_ENV: &str = "SUITELET_OUTCOME_FILE";
pub const SESSION_ID_ENV: &str = "SUITELET_SESSION_ID";

/// Parameters for one host application run.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub dev_path: PathBuf,
    pub entry: PathBuf,
    pub version: String,
    pub launch_args: Vec<String>,
    /// Complete environment for the host process.
    pub env: Environment,
}

/// How the host process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitSignal {
    Exited(i32),
    /// Killed by a signal or otherwise without an exit code.
    Terminated(String),
}

impl ExitSignal {
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

impl From<ExitStatus> for ExitSignal {
    fn from(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => Self::Exited(code),
            None => Self::Terminated(status.to_string()),
        }
    }
}

impl fmt::Display for ExitSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit code {code}"),
            Self::Terminated(how) => f.write_str(how),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed waiting for host process: {0}")]
    Wait(#[source] io::Error),

    #[error("{0}")]
    Other(String),
}

/// Starts the host application and waits for it to exit.
#[async_trait]
pub trait HostLauncher: Send + Sync {
    async fn launch(&self, options: LaunchOptions) -> Result<ExitSignal, LaunchError>;
}

/// Launches a host executable directly.
///
/// The executable receives the launch arguments followed by
/// `--extensionDevelopmentPath=<dev>` and `--extensionTestsPath=<entry>`. Its
/// environment is exactly the one in [`LaunchOptions`].
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    executable: PathBuf,
}

impl CommandLauncher {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

#[async_trait]
impl HostLauncher for CommandLauncher {
    async fn launch(&self, options: LaunchOptions) -> Result<ExitSignal, LaunchError> {
        tracing::info!(
            executable = %self.executable.display(),
            entry = %options.entry.display(),
            version = %options.version,
            "Launching host application"
        );

        let mut child = Command::new(&self.executable)
            .args(&options.launch_args)
            .arg(format!("--extensionDevelopmentPath={}", options.dev_path.display()))
            .arg(format!("--extensionTestsPath={}", options.entry.display()))
            .env_clear()
            .envs(options.env.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: self.executable.display().to_string(),
                source,
            })?;

        tracing::debug!(pid = ?child.id(), "Host application started");
        let status = child.wait().await.map_err(LaunchError::Wait)?;
        let exit = ExitSignal::from(status);
        tracing::info!(%exit, "Host application exited");
        Ok(exit)
    }
}

/// Static launch settings.
#[derive(Debug, Clone, PartialEq)]
pub struct HostConfig {
    dev_path: PathBuf,
    load_entry: PathBuf,
    run_entry: PathBuf,
    version: Option<String>,
    inspect_port: Option<u16>,
    launch_args: Vec<String>,
}

impl HostConfig {
    /// `entry` is used for both actions until overridden.
    pub fn new(dev_path: impl Into<PathBuf>, entry: impl Into<PathBuf>) -> Self {
        let entry = entry.into();
        Self {
            dev_path: dev_path.into(),
            load_entry: entry.clone(),
            run_entry: entry,
            version: None,
            inspect_port: None,
            launch_args: Vec::new(),
        }
    }

    pub fn with_load_entry(mut self, entry: impl Into<PathBuf>) -> Self {
        self.load_entry = entry.into();
        self
    }

    pub fn with_run_entry(mut self, entry: impl Into<PathBuf>) -> Self {
        self.run_entry = entry.into();
        self
    }

    /// Pin the host version. Takes precedence over any version in WorkerArgs.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Pin the debug port. Takes precedence over any port in WorkerArgs.
    pub fn with_inspect_port(mut self, port: u16) -> Self {
        self.inspect_port = Some(port);
        self
    }

    pub fn with_launch_args(mut self, args: Vec<String>) -> Self {
        self.launch_args = args;
        self
    }

    pub fn dev_path(&self) -> &Path {
        &self.dev_path
    }

    pub fn load_entry(&self) -> &Path {
        &self.load_entry
    }

    pub fn run_entry(&self) -> &Path {
        &self.run_entry
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn inspect_port(&self) -> Option<u16> {
        self.inspect_port
    }

    pub fn entry_for(&self, action: Action) -> &Path {
        match action {
            Action::Load => &self.load_entry,
            Action::Run => &self.run_entry,
        }
    }
}

/// Scratch file the entry point writes its outcome to. Removed on drop.
pub struct OutcomeFile {
    path: PathBuf,
}

impl OutcomeFile {
    pub fn new(session: SessionId) -> Self {
        let name = format!("suitelet-{}-{session}.outcome.json", std::process::id());
        Self {
            path: std::env::temp_dir().join(name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The recorded outcome, if the entry point wrote a well-formed one.
    pub async fn read(&self) -> Option<SessionOutcome> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Cannot read outcome file");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Ignoring malformed outcome file"
                );
                None
            }
        }
    }
}

impl Drop for OutcomeFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::trace!(path = %self.path.display(), "Removed outcome file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "Failed to remove outcome file")
            }
        }
    }
}

/// Executes WorkerArgs by launching the host application once per session.
pub struct HostLaunchAdapter<L> {
    launcher: L,
    config: HostConfig,
    network: NetworkOptions,
    base_env: Environment,
}

impl<L: HostLauncher> HostLaunchAdapter<L> {
    pub fn new(launcher: L, config: HostConfig, network: NetworkOptions) -> Self {
        Self {
            launcher,
            config,
            network,
            base_env: Environment::inherited(),
        }
    }

    /// Replace the environment the overlay is applied to.
    pub fn with_environment(mut self, env: Environment) -> Self {
        self.base_env = env;
        self
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Resolve everything the launcher needs for `args`.
    pub fn launch_options(
        &self,
        session: SessionId,
        args: &WorkerArgs,
        outcome_file: &Path,
    ) -> Result<LaunchOptions, SessionError> {
        let mut env = self.base_env.clone();
        env.apply(&args.env);

        let encoded = serde_json::to_string(args).map_err(ProtocolError::Malformed)?;
        env.set(WORKER_ARGS_ENV, encoded);
        env.set(IPC_HOST_ENV, self.network.resolved_host());
        env.set(IPC_PORT_ENV, self.network.port.to_string());
        env.set(IPC_ROLE_ENV, self.network.role.as_str());
        env.set(OUTCOME_FILE_ENV, outcome_file.to_string_lossy());
        env.set(SESSION_ID_ENV, session.to_string());

        let version = self
            .config
            .version
            .clone()
            .or_else(|| args.env.get(HOST_VERSION_ENV).flatten())
            .unwrap_or_else(|| DEFAULT_HOST_VERSION.to_string());

        let mut launch_args = self.config.launch_args.clone();
        let inspect_port = self.config.inspect_port.or_else(|| {
            args.env
                .get(INSPECT_PORT_ENV)
                .flatten()
                .and_then(|v| parse_port(INSPECT_PORT_ENV, &v))
        });
        if let Some(port) = inspect_port {
            launch_args.push(format!("--inspect-extensions={port}"));
        }

        Ok(LaunchOptions {
            dev_path: self.config.dev_path.clone(),
            entry: self.config.entry_for(args.action).to_path_buf(),
            version,
            launch_args,
            env,
        })
    }

    async fn supervise(
        &self,
        session: SessionId,
        args: &WorkerArgs,
    ) -> Result<usize, SessionError> {
        let outcome_file = OutcomeFile::new(session);
        let options = self.launch_options(session, args, outcome_file.path())?;
        tracing::debug!(
            session_id = %session,
            action = %args.action,
            entry = %options.entry.display(),
            outcome_file = %outcome_file.path().display(),
            "Handing off to host application"
        );

        let exit = self
            .launcher
            .launch(options)
            .await
            .map_err(|e| SessionError::HostProcess(format!("launch failed: {e}")))?;

        match outcome_file.read().await {
            Some(outcome) => {
                if !exit.success() {
                    tracing::debug!(%exit, "Host exited abnormally after recording an outcome");
                }
                match outcome {
                    SessionOutcome::Finished { failure_count } => Ok(failure_count),
                    SessionOutcome::Failed { error, detail } => {
                        Err(SessionError::Entry { kind: error, detail })
                    }
                }
            }
            None if exit.success() => Ok(0),
            None => Err(SessionError::HostProcess(format!(
                "terminated with {exit} before reporting an outcome"
            ))),
        }
    }
}

#[async_trait]
impl<L: HostLauncher> Executor for HostLaunchAdapter<L> {
    async fn load(&self, session: SessionId, args: &WorkerArgs) -> Result<(), SessionError> {
        self.supervise(session, args).await.map(|_| ())
    }

    async fn run(&self, session: SessionId, args: &WorkerArgs) -> Result<usize, SessionError> {
        self.supervise(session, args).await
    }
}
