//! Worker entry point, run inside the host application.
//!
//! Reads the WorkerArgs the adapter placed in the environment, executes them against a
//! suite runner, and records the outcome where the adapter will look for it.

use std::path::{Path, PathBuf};

use crate::bridge::protocol::{Action, SessionId, SessionOutcome, WorkerArgs};
use crate::environment::Environment;
use crate::error::SessionError;
use crate::host::{OUTCOME_FILE_ENV, SESSION_ID_ENV, WORKER_ARGS_ENV};
use crate::runner::{InProcessExecutor, SuiteRunner};
use crate::worker::Executor;

/// WorkerArgs as handed over by the launcher.
pub fn worker_args_from(env: &Environment) -> Result<WorkerArgs, SessionError> {
    let raw = env
        .get(WORKER_ARGS_ENV)
        .ok_or_else(|| SessionError::ArgumentParse(format!("{WORKER_ARGS_ENV} is not set")))?;
    serde_json::from_str(raw)
        .map_err(|e| SessionError::ArgumentParse(format!("{WORKER_ARGS_ENV}: {e}")))
}

/// The launcher's session id, or a fresh one when run standalone.
pub fn session_id_from(env: &Environment) -> SessionId {
    match env.get(SESSION_ID_ENV).map(str::parse::<SessionId>) {
        Some(Ok(session)) => session,
        Some(Err(e)) => {
            tracing::warn!(error = %e, "Ignoring malformed {SESSION_ID_ENV}");
            SessionId::new()
        }
        None => SessionId::new(),
    }
}

/// Run the entry point to completion. The outcome is also written to the outcome file
/// when the launcher asked for one.
pub async fn run_entry<R: SuiteRunner>(
    runner: R,
    base_dir: &Path,
    env: Environment,
) -> SessionOutcome {
    let outcome_file = env.get(OUTCOME_FILE_ENV).map(PathBuf::from);

    let outcome = match execute(runner, base_dir, env).await {
        Ok(failure_count) => SessionOutcome::finished(failure_count),
        Err(e) => {
            tracing::error!(error = %e, kind = %e.kind(), "Worker entry failed");
            SessionOutcome::failed(&e)
        }
    };

    if let Some(path) = outcome_file {
        record(&path, &outcome).await;
    }
    outcome
}

async fn execute<R: SuiteRunner>(
    runner: R,
    base_dir: &Path,
    env: Environment,
) -> Result<usize, SessionError> {
    let session = session_id_from(&env);
    let args = worker_args_from(&env)?;
    tracing::info!(
        session_id = %session,
        action = %args.action,
        base_dir = %base_dir.display(),
        "Worker entry starting"
    );

    let executor = InProcessExecutor::new(runner, base_dir).with_environment(env);
    match args.action {
        Action::Load => executor.load(session, &args).await.map(|()| 0),
        Action::Run => executor.run(session, &args).await,
    }
}

async fn record(path: &Path, outcome: &SessionOutcome) {
    let body = match serde_json::to_vec(outcome) {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(error = %e, "Cannot encode outcome");
            return;
        }
    };
    if let Err(e) = tokio::fs::write(path, body).await {
        tracing::warn!(path = %path.display(), error = %e, "Cannot write outcome file");
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use async_trait::async_trait;

    use super::*;
    use crate::bridge::protocol::ErrorKind;
    use crate::environment::EnvOverlay;
    use crate::runner::{RunRequest, RunnerError};

    #[derive(Default)]
    struct CountingRunner {
        failures: usize,
    }

    #[async_trait]
    impl SuiteRunner for CountingRunner {
        async fn load(&self, _files: &[PathBuf]) -> Result<(), RunnerError> {
            Ok(())
        }

        async fn run(&self, request: RunRequest<'_>) -> Result<usize, RunnerError> {
            assert_eq!(request.env.get("FOO"), Some("bar"));
            Ok(self.failures)
        }
    }

    fn env_with(args: &WorkerArgs, outcome_file: &Path) -> Environment {
        [
            (WORKER_ARGS_ENV.to_string(), serde_json::to_string(args).unwrap()),
            (OUTCOME_FILE_ENV.to_string(), outcome_file.display().to_string()),
        ]
        .into_iter()
        .collect()
    }

    #[tokio::test]
    async fn run_records_failure_count() {
        let dir = tempfile::tempdir().unwrap();
        let outcome_path = dir.path().join("outcome.json");
        let args = WorkerArgs::new(Action::Run).with_env(EnvOverlay::new().set("FOO", "bar"));
        let runner = CountingRunner { failures: 5 };

        let outcome = run_entry(runner, dir.path(), env_with(&args, &outcome_path)).await;

        assert_eq!(outcome, SessionOutcome::finished(5));
        let written: SessionOutcome =
            serde_json::from_str(&fs::read_to_string(&outcome_path).unwrap()).unwrap();
        assert_eq!(written, outcome);
    }

    #[tokio::test]
    async fn missing_worker_args_is_recorded_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let outcome_path = dir.path().join("outcome.json");
        let env: Environment = [(OUTCOME_FILE_ENV, outcome_path.display().to_string())]
            .into_iter()
            .collect();

        let outcome = run_entry(CountingRunner::default(), dir.path(), env).await;

        assert!(matches!(
            outcome,
            SessionOutcome::Failed { error: ErrorKind::ArgumentParse, .. }
        ));
        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&outcome_path).unwrap()).unwrap();
        insta::assert_json_snapshot!(written, @r#"
        {
          "detail": "invalid arguments: SUITELET_WORKER_ARGS is not set",
          "error": "argument_parse"
        }
        "#);
    }

    #[test]
    fn session_id_comes_from_the_launcher() {
        let session = SessionId::new();
        let env: Environment = [(SESSION_ID_ENV, session.to_string())].into_iter().collect();
        assert_eq!(session_id_from(&env), session);

        let garbled: Environment = [(SESSION_ID_ENV, "not-a-uuid")].into_iter().collect();
        assert_ne!(session_id_from(&garbled), session);
    }

    #[tokio::test]
    async fn load_without_outcome_file() {
        let dir = tempfile::tempdir().unwrap();
        let args = WorkerArgs::new(Action::Load);
        let env: Environment = [(WORKER_ARGS_ENV, serde_json::to_string(&args).unwrap())]
            .into_iter()
            .collect();

        let outcome = run_entry(CountingRunner::default(), dir.path(), env).await;
        assert_eq!(outcome, SessionOutcome::finished(0));
    }
}
