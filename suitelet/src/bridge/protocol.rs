//! Wire protocol types for driver-worker communication.
//!
//! One channel per session:
//! - **Driver → worker**: exactly one [`WorkerArgs`] message, always first
//! - **Worker → driver**: one best-effort [`ControlMessage`] before close

use std::fmt;
use std::num::NonZeroU16;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::environment::EnvOverlay;
use crate::error::SessionError;
use crate::files::DEFAULT_TEST_GLOB;

/// Literal loopback address used instead of ambiguous local host names.
pub const LOOPBACK_HOST: &str = "127.0.0.1";

/// Unique identifier for a worker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Which end of the rendezvous the process holding the options takes.
///
/// This is the only place the role vocabulary is mapped to a transport direction.
/// `listen`/`connect` describe the holder directly. The driver-side names are
/// accepted as aliases: a driver that calls itself `server` is listening, so the
/// holder connects; a driver that calls itself `client` dials, so the holder listens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "listen", alias = "client")]
    Listen,
    #[serde(rename = "connect", alias = "server")]
    Connect,
}

impl Role {
    /// Role the other end of the channel must take.
    pub fn peer(self) -> Self {
        match self {
            Self::Listen => Self::Connect,
            Self::Connect => Self::Listen,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Listen => "listen",
            Self::Connect => "connect",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rendezvous parameters handed to the worker on its command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkOptions {
    pub role: Role,
    pub port: NonZeroU16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl NetworkOptions {
    pub fn new(role: Role, port: NonZeroU16) -> Self {
        Self {
            role,
            port,
            host: None,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Parse the JSON command-line argument. A missing or malformed argument is fatal.
    pub fn from_arg(arg: Option<&str>) -> Result<Self, SessionError> {
        let raw = arg.ok_or_else(|| {
            SessionError::ArgumentParse("missing network options argument".to_string())
        })?;
        serde_json::from_str(raw).map_err(|e| SessionError::ArgumentParse(e.to_string()))
    }

    /// Host to dial, with loopback aliases pinned to IPv4.
    pub fn resolved_host(&self) -> String {
        normalize_host(self.host.as_deref())
    }

    /// Options for the other end of the same rendezvous.
    pub fn peer(&self) -> Self {
        Self {
            role: self.role.peer(),
            port: self.port,
            host: self.host.clone(),
        }
    }
}

/// `localhost` and `::1` resolve ambiguously on some platforms; always dial IPv4 loopback.
pub fn normalize_host(host: Option<&str>) -> String {
    match host {
        None | Some("localhost") | Some("::1") => LOOPBACK_HOST.to_string(),
        Some(other) => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Discovery: load test definitions without executing them.
    Load,
    /// Execution.
    Run,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Run => "run",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One glob pattern or an ordered list of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilePatterns {
    One(String),
    Many(Vec<String>),
}

impl FilePatterns {
    pub fn as_slice(&self) -> &[String] {
        match self {
            Self::One(pattern) => std::slice::from_ref(pattern),
            Self::Many(patterns) => patterns,
        }
    }
}

impl Default for FilePatterns {
    fn default() -> Self {
        Self::One(DEFAULT_TEST_GLOB.to_string())
    }
}

/// First message on the channel: what the worker should load or run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerArgs {
    pub action: Action,
    #[serde(default)]
    pub files: FilePatterns,
    /// Passed to the suite runner untouched.
    #[serde(
        default,
        alias = "mochaOptions",
        skip_serializing_if = "serde_json::Value::is_null"
    )]
    pub runner_options: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "EnvOverlay::is_empty")]
    pub env: EnvOverlay,
}

impl WorkerArgs {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            files: FilePatterns::default(),
            runner_options: serde_json::Value::Null,
            run_ids: None,
            env: EnvOverlay::default(),
        }
    }

    pub fn with_files(mut self, files: FilePatterns) -> Self {
        self.files = files;
        self
    }

    pub fn with_runner_options(mut self, options: serde_json::Value) -> Self {
        self.runner_options = options;
        self
    }

    pub fn with_run_ids(mut self, run_ids: Vec<String>) -> Self {
        self.run_ids = Some(run_ids);
        self
    }

    pub fn with_env(mut self, env: EnvOverlay) -> Self {
        self.env = env;
        self
    }
}

/// Wire-level failure category carried by outcomes and relay messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ArgumentParse,
    ChannelTimeout,
    HandshakeTimeout,
    Protocol,
    HostProcess,
    FileExpansion,
    Runner,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ArgumentParse => "argument_parse",
            Self::ChannelTimeout => "channel_timeout",
            Self::HandshakeTimeout => "handshake_timeout",
            Self::Protocol => "protocol",
            Self::HostProcess => "host_process",
            Self::FileExpansion => "file_expansion",
            Self::Runner => "runner",
            Self::Io => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of one session.
///
/// A non-zero `failure_count` is a normal outcome: tests ran and some failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SessionOutcome {
    #[serde(rename_all = "camelCase")]
    Finished { failure_count: usize },
    Failed { error: ErrorKind, detail: String },
}

impl SessionOutcome {
    pub fn finished(failure_count: usize) -> Self {
        Self::Finished { failure_count }
    }

    pub fn failed(error: &SessionError) -> Self {
        Self::Failed {
            error: error.kind(),
            detail: error.to_string(),
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished { .. })
    }

    pub fn failure_count(&self) -> Option<usize> {
        match self {
            Self::Finished { failure_count } => Some(*failure_count),
            Self::Failed { .. } => None,
        }
    }

    /// Process exit code: test failures still exit 0.
    pub fn exit_code(&self) -> i32 {
        if self.is_finished() { 0 } else { 1 }
    }
}

/// Messages from worker to driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    #[serde(rename_all = "camelCase")]
    Finished { failure_count: usize },
    Failed { error: ErrorKind, detail: String },
}

impl From<&SessionOutcome> for ControlMessage {
    fn from(outcome: &SessionOutcome) -> Self {
        match outcome {
            SessionOutcome::Finished { failure_count } => Self::Finished {
                failure_count: *failure_count,
            },
            SessionOutcome::Failed { error, detail } => Self::Failed {
                error: *error,
                detail: detail.clone(),
            },
        }
    }
}

impl From<ControlMessage> for SessionOutcome {
    fn from(message: ControlMessage) -> Self {
        match message {
            ControlMessage::Finished { failure_count } => Self::Finished { failure_count },
            ControlMessage::Failed { error, detail } => Self::Failed { error, detail },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_accepts_canonical_and_driver_names() {
        let listen: Role = serde_json::from_str(r#""listen""#).unwrap();
        let connect: Role = serde_json::from_str(r#""connect""#).unwrap();
        assert_eq!(listen, Role::Listen);
        assert_eq!(connect, Role::Connect);

        // Driver calls itself the server: it listens, so we dial.
        let server: Role = serde_json::from_str(r#""server""#).unwrap();
        let client: Role = serde_json::from_str(r#""client""#).unwrap();
        assert_eq!(server, Role::Connect);
        assert_eq!(client, Role::Listen);

        assert_eq!(Role::Listen.peer(), Role::Connect);
        assert_eq!(serde_json::to_string(&Role::Connect).unwrap(), r#""connect""#);
    }

    #[test]
    fn network_options_parse() {
        let opts =
            NetworkOptions::from_arg(Some(r#"{"role":"connect","port":9455,"host":"localhost"}"#))
                .unwrap();
        assert_eq!(opts.role, Role::Connect);
        assert_eq!(opts.port.get(), 9455);
        assert_eq!(opts.resolved_host(), "127.0.0.1");
    }

    #[test]
    fn network_options_rejects_bad_input() {
        for raw in [
            r#"{"role":"connect","port":94"#,
            r#"{"role":"connect","port":0}"#,
            r#"{"role":"sideways","port":9455}"#,
            r#"{"port":9455}"#,
            "",
        ] {
            let err = NetworkOptions::from_arg(Some(raw)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ArgumentParse, "input: {raw}");
        }

        let err = NetworkOptions::from_arg(None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentParse);
    }

    #[test]
    fn host_normalization() {
        assert_eq!(normalize_host(None), "127.0.0.1");
        assert_eq!(normalize_host(Some("localhost")), "127.0.0.1");
        assert_eq!(normalize_host(Some("::1")), "127.0.0.1");
        assert_eq!(normalize_host(Some("10.0.0.7")), "10.0.0.7");
    }

    #[test]
    fn worker_args_minimal() {
        let args: WorkerArgs = serde_json::from_str(r#"{"action":"load"}"#).unwrap();
        assert_eq!(args.action, Action::Load);
        assert_eq!(args.files.as_slice(), [DEFAULT_TEST_GLOB.to_string()]);
        assert!(args.runner_options.is_null());
        assert!(args.run_ids.is_none());
        assert!(args.env.is_empty());
    }

    #[test]
    fn worker_args_full() {
        let args: WorkerArgs = serde_json::from_str(
            r#"{
                "action": "run",
                "files": ["out/a/**/*.js", "out/b/**/*.js"],
                "mochaOptions": {"ui": "bdd", "timeout": 30000},
                "runIds": ["suite.test one"],
                "env": {"FOO": "bar", "BAZ": null}
            }"#,
        )
        .unwrap();
        assert_eq!(args.action, Action::Run);
        assert_eq!(args.files.as_slice().len(), 2);
        assert_eq!(args.runner_options["ui"], "bdd");
        assert_eq!(args.run_ids, Some(vec!["suite.test one".to_string()]));
        assert!(!args.env.is_empty());
    }

    #[test]
    fn worker_args_rejects_unknown_action() {
        let result = serde_json::from_str::<WorkerArgs>(r#"{"action":"explode"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn control_message_finished_shape() {
        let msg = ControlMessage::from(&SessionOutcome::finished(3));
        insta::assert_json_snapshot!(msg, @r#"
        {
          "type": "finished",
          "failureCount": 3
        }
        "#);
    }

    #[test]
    fn control_message_failed_shape() {
        let msg = ControlMessage::Failed {
            error: ErrorKind::HandshakeTimeout,
            detail: "no worker arguments".to_string(),
        };
        insta::assert_json_snapshot!(msg, @r#"
        {
          "type": "failed",
          "error": "handshake_timeout",
          "detail": "no worker arguments"
        }
        "#);
    }

    #[test]
    fn session_outcome_parses_both_shapes() {
        let finished: SessionOutcome = serde_json::from_str(r#"{"failureCount":2}"#).unwrap();
        assert_eq!(finished, SessionOutcome::finished(2));
        assert_eq!(finished.exit_code(), 0);

        let failed: SessionOutcome =
            serde_json::from_str(r#"{"error":"runner","detail":"boom"}"#).unwrap();
        assert_eq!(failed.failure_count(), None);
        assert_eq!(failed.exit_code(), 1);
    }
}
