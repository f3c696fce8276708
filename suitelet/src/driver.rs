//! Driving side of the protocol.
//!
//! Takes the role opposite the worker's, sends WorkerArgs as the first message, and
//! waits for the completion relay.

use std::io;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::bridge::channel::{Channel, MessageHandler};
use crate::bridge::protocol::{ControlMessage, NetworkOptions, SessionOutcome, WorkerArgs};
use crate::bridge::transport::{self, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to send worker arguments: {0}")]
    Send(#[source] io::Error),

    #[error("channel failed while waiting for completion: {0}")]
    Receive(#[source] io::Error),

    #[error("worker closed the channel without reporting an outcome")]
    NoOutcome,
}

/// Picks the first completion message out of the stream.
#[derive(Debug, Default)]
pub struct OutcomeCollector {
    outcome: Option<SessionOutcome>,
}

impl OutcomeCollector {
    pub fn into_outcome(self) -> Option<SessionOutcome> {
        self.outcome
    }
}

impl MessageHandler for OutcomeCollector {
    fn on_message(&mut self, message: serde_json::Value) -> ControlFlow<()> {
        match serde_json::from_value::<ControlMessage>(message) {
            Ok(control) => {
                self.outcome = Some(control.into());
                ControlFlow::Break(())
            }
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring non-completion message");
                ControlFlow::Continue(())
            }
        }
    }
}

pub struct Driver<S = TcpStream> {
    channel: Channel<S>,
}

impl Driver<TcpStream> {
    /// Rendezvous with a worker started with `worker` as its network options.
    pub async fn rendezvous(
        worker: &NetworkOptions,
        timeout: Duration,
        retry_interval: Duration,
    ) -> Result<Self, DriverError> {
        let channel = transport::establish(&worker.peer(), timeout, retry_interval).await?;
        Ok(Self::new(channel))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Driver<S> {
    pub fn new(channel: Channel<S>) -> Self {
        Self { channel }
    }

    /// Send `args` and wait for the worker's outcome. Consumes the driver; the channel
    /// is closed on return.
    pub async fn drive(mut self, args: &WorkerArgs) -> Result<SessionOutcome, DriverError> {
        tracing::debug!(action = %args.action, "Sending worker arguments");
        if let Err(e) = self.channel.send(args).await {
            self.channel.close().await;
            return Err(DriverError::Send(e));
        }

        let mut collector = OutcomeCollector::default();
        let received = self.channel.on_message(&mut collector).await;
        self.channel.close().await;
        received.map_err(DriverError::Receive)?;

        let outcome = collector.into_outcome().ok_or(DriverError::NoOutcome)?;
        tracing::info!(finished = outcome.is_finished(), "Worker reported outcome");
        Ok(outcome)
    }
}
