//! Launcher configuration from environment variables.
//!
//! None of these are required. Malformed values are logged and ignored.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::debug::{NoDebug, PauseHook};
use crate::host::HostConfig;
use crate::worker::WorkerConfig;

pub const IPC_TIMEOUT_ENV: &str = "SUITELET_IPC_TIMEOUT";
pub const RETRY_INTERVAL_ENV: &str = "SUITELET_RETRY_INTERVAL";
pub const STOP_AFTER_HANDSHAKE_ENV: &str = "SUITELET_STOP_AFTER_HANDSHAKE";
pub const DEBUG_WORKER_ENV: &str = "SUITELET_DEBUG_WORKER";
pub const INSPECT_PORT_ENV: &str = "SUITELET_INSPECT_PORT";
pub const HOST_EXECUTABLE_ENV: &str = "SUITELET_HOST_EXECUTABLE";
pub const HOST_VERSION_ENV: &str = "SUITELET_HOST_VERSION";
pub const DEV_PATH_ENV: &str = "SUITELET_DEV_PATH";
pub const LOAD_ENTRY_ENV: &str = "SUITELET_LOAD_ENTRY";
pub const RUN_ENTRY_ENV: &str = "SUITELET_RUN_ENTRY";
pub const RUNNER_ENV: &str = "SUITELET_RUNNER";

pub const DEFAULT_IPC_TIMEOUT: Duration = Duration::from_millis(60_000);
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_HOST_VERSION: &str = "stable";

/// Everything the launcher reads from its environment.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub ipc_timeout: Duration,
    pub retry_interval: Duration,
    pub stop_after_handshake: bool,
    pub debug_worker: bool,
    pub inspect_port: Option<u16>,
    pub host_executable: Option<PathBuf>,
    /// `None` means "not set by the launcher"; WorkerArgs may then supply one.
    pub host_version: Option<String>,
    pub dev_path: Option<PathBuf>,
    pub load_entry: Option<PathBuf>,
    pub run_entry: Option<PathBuf>,
    pub runner_command: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ipc_timeout: DEFAULT_IPC_TIMEOUT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            stop_after_handshake: false,
            debug_worker: false,
            inspect_port: None,
            host_executable: None,
            host_version: None,
            dev_path: None,
            load_entry: None,
            run_entry: None,
            runner_command: None,
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Self {
            ipc_timeout: get(IPC_TIMEOUT_ENV)
                .and_then(|v| parse_millis(IPC_TIMEOUT_ENV, &v))
                .unwrap_or(defaults.ipc_timeout),
            retry_interval: get(RETRY_INTERVAL_ENV)
                .and_then(|v| parse_millis(RETRY_INTERVAL_ENV, &v))
                .unwrap_or(defaults.retry_interval),
            stop_after_handshake: get(STOP_AFTER_HANDSHAKE_ENV).is_some_and(|v| is_truthy(&v)),
            debug_worker: get(DEBUG_WORKER_ENV).is_some_and(|v| is_truthy(&v)),
            inspect_port: get(INSPECT_PORT_ENV).and_then(|v| parse_port(INSPECT_PORT_ENV, &v)),
            host_executable: get(HOST_EXECUTABLE_ENV).map(PathBuf::from),
            host_version: get(HOST_VERSION_ENV),
            dev_path: get(DEV_PATH_ENV).map(PathBuf::from),
            load_entry: get(LOAD_ENTRY_ENV).map(PathBuf::from),
            run_entry: get(RUN_ENTRY_ENV).map(PathBuf::from),
            runner_command: get(RUNNER_ENV),
        }
    }

    pub fn with_ipc_timeout(mut self, timeout: Duration) -> Self {
        self.ipc_timeout = timeout;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_host_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.host_executable = Some(path.into());
        self
    }

    pub fn with_runner_command(mut self, command: impl Into<String>) -> Self {
        self.runner_command = Some(command.into());
        self
    }

    pub fn worker_config(&self) -> WorkerConfig {
        let hook = PauseHook::new(self.stop_after_handshake, self.debug_worker);
        let config = WorkerConfig::default()
            .with_handshake_timeout(self.ipc_timeout)
            .with_retry_interval(self.retry_interval);
        if hook.is_enabled() {
            config.with_debug_hook(Arc::new(hook))
        } else {
            config.with_debug_hook(Arc::new(NoDebug))
        }
    }

    /// Host launch settings. `default_entry` fills in whichever entry script is unset.
    pub fn host_config(&self, dev_path: PathBuf, default_entry: PathBuf) -> HostConfig {
        let mut config = HostConfig::new(self.dev_path.clone().unwrap_or(dev_path), default_entry);
        if let Some(entry) = &self.load_entry {
            config = config.with_load_entry(entry.clone());
        }
        if let Some(entry) = &self.run_entry {
            config = config.with_run_entry(entry.clone());
        }
        if let Some(version) = &self.host_version {
            config = config.with_version(version.clone());
        }
        if let Some(port) = self.inspect_port {
            config = config.with_inspect_port(port);
        }
        config
    }
}

fn parse_millis(key: &str, value: &str) -> Option<Duration> {
    match value.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Some(Duration::from_millis(ms)),
        _ => {
            tracing::warn!(key, value, "Ignoring invalid duration, expected milliseconds > 0");
            None
        }
    }
}

pub(crate) fn parse_port(key: &str, value: &str) -> Option<u16> {
    match value.trim().parse::<u16>() {
        Ok(port) if port > 0 => Some(port),
        _ => {
            tracing::warn!(key, value, "Ignoring invalid port");
            None
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
