//! suitelet: isolated test-suite worker.
//!
//! A launcher rendezvouses with a remote driver over TCP, receives WorkerArgs, and
//! either runs the suite directly or hands it to a host application, then reports
//! a single outcome back.

pub mod bridge;
pub mod config;
pub mod debug;
pub mod driver;
pub mod entry;
pub mod environment;
mod error;
pub mod files;
pub mod handshake;
pub mod host;
pub mod runner;
pub mod worker;

pub use bridge::protocol::{
    Action, ControlMessage, ErrorKind, FilePatterns, NetworkOptions, Role, SessionId,
    SessionOutcome, WorkerArgs,
};
pub use config::SessionConfig;
pub use debug::{DebugHook, NoDebug, PauseHook};
pub use driver::{Driver, DriverError};
pub use entry::run_entry;
pub use environment::{EnvOverlay, Environment};
pub use error::{Result, SessionError};
pub use host::{CommandLauncher, HostConfig, HostLaunchAdapter, HostLauncher, LaunchError};
pub use runner::{CommandSuiteRunner, InProcessExecutor, RunnerError, SuiteRunner};
pub use worker::{Executor, SessionState, WorkerConfig, run_worker, serve_channel};
