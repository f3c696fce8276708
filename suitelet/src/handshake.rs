//! Handshake: the first message on a fresh channel is the WorkerArgs.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::bridge::channel::Channel;
use crate::bridge::codec::ProtocolError;
use crate::bridge::protocol::WorkerArgs;
use crate::error::SessionError;

/// Wait for the first decoded message and interpret it as [`WorkerArgs`].
///
/// Resolves at most once: whichever of the first frame, end-of-stream, or the timeout
/// comes first decides the result. A malformed first frame is fatal. The caller owns
/// the channel and closes it on error.
pub async fn await_worker_args<S>(
    channel: &mut Channel<S>,
    timeout: Duration,
) -> Result<WorkerArgs, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tracing::debug!(?timeout, "Waiting for worker arguments");

    let first = match tokio::time::timeout(timeout, channel.recv()).await {
        Ok(received) => received?,
        Err(_) => return Err(SessionError::HandshakeTimeout(timeout)),
    };

    let message = match first {
        Some(Ok(message)) => message,
        Some(Err(e)) => return Err(e.into()),
        None => return Err(ProtocolError::Closed("worker arguments").into()),
    };

    let args: WorkerArgs = serde_json::from_value(message).map_err(ProtocolError::Malformed)?;
    tracing::info!(
        action = %args.action,
        patterns = args.files.as_slice().len(),
        overlay = !args.env.is_empty(),
        "Received worker arguments"
    );
    Ok(args)
}
