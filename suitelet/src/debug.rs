//! Debug attachment hooks.
//!
//! Invoked by the worker controller at two fixed points: right after the channel is
//! negotiated, and right before the suite is loaded or run.

use async_trait::async_trait;

use crate::bridge::protocol::{NetworkOptions, WorkerArgs};

#[async_trait]
pub trait DebugHook: Send + Sync {
    async fn after_negotiation(&self, _network: &NetworkOptions) {}

    async fn before_launch(&self, _args: &WorkerArgs) {}
}

/// No pauses.
pub struct NoDebug;

impl DebugHook for NoDebug {}

/// Pauses at the enabled points until the process receives `SIGUSR1`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PauseHook {
    pub after_negotiation: bool,
    pub before_launch: bool,
}

impl PauseHook {
    pub fn new(after_negotiation: bool, before_launch: bool) -> Self {
        Self {
            after_negotiation,
            before_launch,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.after_negotiation || self.before_launch
    }
}

#[async_trait]
impl DebugHook for PauseHook {
    async fn after_negotiation(&self, network: &NetworkOptions) {
        if self.after_negotiation {
            tracing::info!(role = %network.role, port = network.port.get(), "Channel negotiated");
            wait_for_resume("after_negotiation").await;
        }
    }

    async fn before_launch(&self, args: &WorkerArgs) {
        if self.before_launch {
            tracing::info!(action = %args.action, "About to start suite");
            wait_for_resume("before_launch").await;
        }
    }
}

#[cfg(unix)]
async fn wait_for_resume(point: &str) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut resume = match signal(SignalKind::user_defined1()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, point, "Cannot install SIGUSR1 handler, not pausing");
            return;
        }
    };
    tracing::warn!(
        pid = std::process::id(),
        point,
        "Paused for debugger; send SIGUSR1 to resume"
    );
    resume.recv().await;
    tracing::info!(point, "Resumed");
}

#[cfg(not(unix))]
async fn wait_for_resume(point: &str) {
    tracing::warn!(point, "Debug pause is only supported on unix, continuing");
}
