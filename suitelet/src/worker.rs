//! Worker lifecycle controller.
//!
//! One session per call to [`run_worker`]:
//!
//! ```text
//! Connecting -> AwaitingArgs -> Loading | Running -> Finished
//!      \______________\______________\_____________-> Failed
//! ```
//!
//! The controller owns the channel from the handshake onwards and closes it exactly
//! once on the way out, after a best-effort completion relay.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::bridge::channel::Channel;
use crate::bridge::protocol::{
    Action, ControlMessage, NetworkOptions, SessionId, SessionOutcome, WorkerArgs,
};
use crate::bridge::transport;
use crate::debug::{DebugHook, NoDebug};
use crate::error::SessionError;
use crate::handshake::await_worker_args;

/// Upper bound on the completion relay so a stalled peer cannot hold the session open.
const RELAY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    AwaitingArgs,
    Loading,
    Running,
    Finished,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::AwaitingArgs => "awaiting_args",
            Self::Loading => "loading",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Carries out the requested action once WorkerArgs are known.
///
/// Test failures are a count, not an error. Errors here are infrastructure failures.
/// `session` is the id the lifecycle logs under.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Discovery: load test definitions without running them.
    async fn load(&self, session: SessionId, args: &WorkerArgs) -> Result<(), SessionError>;

    /// Execution: returns the number of failed tests.
    async fn run(&self, session: SessionId, args: &WorkerArgs) -> Result<usize, SessionError>;
}

pub struct WorkerConfig {
    /// Bound on the rendezvous and, separately, on the handshake.
    pub handshake_timeout: Duration,
    /// Pause between connect attempts.
    pub retry_interval: Duration,
    pub debug_hook: Arc<dyn DebugHook>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(60),
            retry_interval: Duration::from_millis(100),
            debug_hook: Arc::new(NoDebug),
        }
    }
}

impl WorkerConfig {
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_debug_hook(mut self, hook: Arc<dyn DebugHook>) -> Self {
        self.debug_hook = hook;
        self
    }
}

/// Tracks the current state and logs every transition under the session's id.
struct Lifecycle {
    session_id: SessionId,
    state: SessionState,
}

impl Lifecycle {
    fn new() -> Self {
        let session_id = SessionId::new();
        tracing::debug!(%session_id, state = %SessionState::Connecting, "Session started");
        Self {
            session_id,
            state: SessionState::Connecting,
        }
    }

    fn enter(&mut self, next: SessionState) {
        tracing::debug!(
            session_id = %self.session_id,
            from = %self.state,
            to = %next,
            "Session state transition"
        );
        self.state = next;
    }

    fn finish(&mut self, result: Result<usize, SessionError>) -> SessionOutcome {
        match result {
            Ok(failure_count) => {
                self.enter(SessionState::Finished);
                tracing::info!(session_id = %self.session_id, failure_count, "Session finished");
                SessionOutcome::finished(failure_count)
            }
            Err(e) => {
                tracing::error!(
                    session_id = %self.session_id,
                    state = %self.state,
                    error = %e,
                    kind = %e.kind(),
                    "Session failed"
                );
                self.enter(SessionState::Failed);
                SessionOutcome::failed(&e)
            }
        }
    }
}

/// Run one complete worker session against the peer described by `network`.
///
/// Never returns an error: every failure becomes a `Failed` outcome.
pub async fn run_worker<E>(
    executor: &E,
    network: &NetworkOptions,
    config: &WorkerConfig,
) -> SessionOutcome
where
    E: Executor + ?Sized,
{
    let mut lifecycle = Lifecycle::new();

    let mut channel = match transport::establish(
        network,
        config.handshake_timeout,
        config.retry_interval,
    )
    .await
    {
        Ok(channel) => channel,
        Err(e) => return lifecycle.finish(Err(e.into())),
    };
    config.debug_hook.after_negotiation(network).await;

    drive_session(&mut lifecycle, executor, &mut channel, config).await
}

/// Everything after the rendezvous: handshake, action, relay, close.
pub async fn serve_channel<E, S>(
    executor: &E,
    channel: &mut Channel<S>,
    config: &WorkerConfig,
) -> SessionOutcome
where
    E: Executor + ?Sized,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut lifecycle = Lifecycle::new();
    drive_session(&mut lifecycle, executor, channel, config).await
}

async fn drive_session<E, S>(
    lifecycle: &mut Lifecycle,
    executor: &E,
    channel: &mut Channel<S>,
    config: &WorkerConfig,
) -> SessionOutcome
where
    E: Executor + ?Sized,
    S: AsyncRead + AsyncWrite + Unpin,
{
    lifecycle.enter(SessionState::AwaitingArgs);
    let result = match await_worker_args(channel, config.handshake_timeout).await {
        Ok(args) => {
            config.debug_hook.before_launch(&args).await;
            execute(lifecycle, executor, &args).await
        }
        Err(e) => Err(e),
    };
    let outcome = lifecycle.finish(result);

    relay(channel, &outcome).await;
    channel.close().await;
    outcome
}

async fn execute<E: Executor + ?Sized>(
    lifecycle: &mut Lifecycle,
    executor: &E,
    args: &WorkerArgs,
) -> Result<usize, SessionError> {
    match args.action {
        Action::Load => {
            lifecycle.enter(SessionState::Loading);
            executor.load(lifecycle.session_id, args).await?;
            Ok(0)
        }
        Action::Run => {
            lifecycle.enter(SessionState::Running);
            executor.run(lifecycle.session_id, args).await
        }
    }
}

/// Send the completion message. Failure here never changes the outcome.
async fn relay<S>(channel: &mut Channel<S>, outcome: &SessionOutcome)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let message = ControlMessage::from(outcome);
    match tokio::time::timeout(RELAY_TIMEOUT, channel.send(&message)).await {
        Ok(Ok(())) => tracing::trace!("Completion relayed"),
        Ok(Err(e)) => tracing::debug!(error = %e, "Completion relay failed"),
        Err(_) => tracing::debug!("Completion relay timed out"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::bridge::protocol::ErrorKind;
    use crate::runner::RunnerError;

    #[derive(Default)]
    struct FakeExecutor {
        failures: usize,
        fail_with: Option<&'static str>,
        loads: AtomicUsize,
        runs: Mutex<Vec<WorkerArgs>>,
        sessions: Mutex<Vec<SessionId>>,
    }

    #[async_trait]
    impl Executor for FakeExecutor {
        async fn load(&self, session: SessionId, _args: &WorkerArgs) -> Result<(), SessionError> {
            self.sessions.lock().unwrap().push(session);
            self.loads.fetch_add(1, Ordering::SeqCst);
            match self.fail_with {
                Some(msg) => Err(RunnerError::Load(msg.to_string()).into()),
                None => Ok(()),
            }
        }

        async fn run(&self, session: SessionId, args: &WorkerArgs) -> Result<usize, SessionError> {
            self.sessions.lock().unwrap().push(session);
            self.runs.lock().unwrap().push(args.clone());
            match self.fail_with {
                Some(msg) => Err(RunnerError::Other(msg.to_string()).into()),
                None => Ok(self.failures),
            }
        }
    }

    fn quick() -> WorkerConfig {
        WorkerConfig::default()
            .with_handshake_timeout(Duration::from_millis(200))
            .with_retry_interval(Duration::from_millis(10))
    }

    async fn session(
        executor: &FakeExecutor,
        first: Option<serde_json::Value>,
    ) -> (SessionOutcome, Option<ControlMessage>) {
        let (a, b) = tokio::io::duplex(1024);
        let mut driver = Channel::new(a);
        let mut worker = Channel::new(b);

        if let Some(first) = first {
            driver.send(&first).await.unwrap();
        }
        let outcome = serve_channel(executor, &mut worker, &quick()).await;

        let relayed = match driver.recv().await.unwrap() {
            Some(Ok(value)) => Some(serde_json::from_value(value).unwrap()),
            _ => None,
        };
        (outcome, relayed)
    }

    #[tokio::test]
    async fn run_with_test_failures_is_still_finished() {
        let executor = FakeExecutor {
            failures: 4,
            ..Default::default()
        };
        let first = serde_json::json!({"action": "run"});
        let (outcome, relayed) = session(&executor, Some(first)).await;

        assert_eq!(outcome, SessionOutcome::finished(4));
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(relayed, Some(ControlMessage::Finished { failure_count: 4 }));
        assert_eq!(executor.runs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn load_finishes_with_zero_and_never_runs() {
        let executor = FakeExecutor::default();
        let first = serde_json::json!({"action": "load"});
        let (outcome, relayed) = session(&executor, Some(first)).await;

        assert_eq!(outcome, SessionOutcome::finished(0));
        assert_eq!(relayed, Some(ControlMessage::Finished { failure_count: 0 }));
        assert_eq!(executor.loads.load(Ordering::SeqCst), 1);
        assert!(executor.runs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn each_session_hands_its_own_id_to_the_executor() {
        let executor = FakeExecutor::default();
        session(&executor, Some(serde_json::json!({"action": "run"}))).await;
        session(&executor, Some(serde_json::json!({"action": "load"}))).await;

        let sessions = executor.sessions.lock().unwrap();
        assert_eq!(sessions.len(), 2);
        assert_ne!(sessions[0], sessions[1]);
    }

    #[tokio::test]
    async fn executor_error_fails_the_session_and_is_relayed() {
        let executor = FakeExecutor {
            fail_with: Some("runner could not be constructed"),
            ..Default::default()
        };
        let first = serde_json::json!({"action": "run"});
        let (outcome, relayed) = session(&executor, Some(first)).await;

        assert_eq!(outcome.exit_code(), 1);
        match relayed {
            Some(ControlMessage::Failed { error, detail }) => {
                assert_eq!(error, ErrorKind::Runner);
                assert!(detail.contains("runner could not be constructed"));
            }
            other => panic!("expected failed relay, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn silent_driver_is_a_handshake_timeout() {
        let executor = FakeExecutor::default();
        let (outcome, relayed) = session(&executor, None).await;

        assert!(matches!(
            outcome,
            SessionOutcome::Failed { error: ErrorKind::HandshakeTimeout, .. }
        ));
        assert!(matches!(relayed, Some(ControlMessage::Failed { .. })));
        assert_eq!(executor.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn relay_failure_does_not_mask_the_outcome() {
        let (a, b) = tokio::io::duplex(1024);
        let mut driver = Channel::new(a);
        let mut worker = Channel::new(b);
        driver.send(&serde_json::json!({"action": "run"})).await.unwrap();
        drop(driver);

        let executor = FakeExecutor {
            failures: 1,
            ..Default::default()
        };
        let outcome = serve_channel(&executor, &mut worker, &quick()).await;

        assert_eq!(outcome, SessionOutcome::finished(1));
        assert!(worker.is_closed());
    }

    #[tokio::test]
    async fn no_peer_is_a_channel_timeout() {
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let raw = format!(r#"{{"role":"connect","port":{port}}}"#);
        let network = NetworkOptions::from_arg(Some(&raw)).unwrap();
        let config = quick().with_handshake_timeout(Duration::from_millis(50));

        let executor = FakeExecutor::default();
        let started = tokio::time::Instant::now();
        let outcome = run_worker(&executor, &network, &config).await;

        assert!(matches!(
            outcome,
            SessionOutcome::Failed { error: ErrorKind::ChannelTimeout, .. }
        ));
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn terminal_states() {
        assert!(SessionState::Finished.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::Running.is_terminal());
        assert_eq!(SessionState::AwaitingArgs.to_string(), "awaiting_args");
    }
}
