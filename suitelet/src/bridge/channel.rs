//! Duplex message channel between driver and worker.
//!
//! Exactly one channel exists per session. It is owned by one stage at a time and
//! closed exactly once; later closes are no-ops.

use std::io;
use std::ops::ControlFlow;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use super::codec::{JsonCodec, ProtocolError};

/// Receives decoded messages from [`Channel::on_message`], one at a time, in arrival order.
pub trait MessageHandler {
    /// Handle one message. Return `Break` to stop the subscription.
    fn on_message(&mut self, message: serde_json::Value) -> ControlFlow<()>;

    /// A frame arrived but its payload was not valid JSON. The channel stays usable.
    fn on_error(&mut self, error: ProtocolError) {
        tracing::warn!(error = %error, "Dropping malformed message");
    }
}

pub struct Channel<S = TcpStream> {
    framed: Option<Framed<S, JsonCodec<serde_json::Value>>>,
}

impl Channel<TcpStream> {
    pub fn from_tcp(stream: TcpStream) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "Failed to disable Nagle on channel socket");
        }
        Self::new(stream)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Channel<S> {
    pub fn new(stream: S) -> Self {
        Self {
            framed: Some(Framed::new(stream, JsonCodec::new())),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.framed.is_none()
    }

    pub async fn send<M: Serialize>(&mut self, message: &M) -> io::Result<()> {
        let framed = self
            .framed
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "channel closed"))?;
        framed.send(message).await
    }

    /// Next message in arrival order.
    ///
    /// `Ok(None)` once the peer has closed (or this side closed the channel). The inner
    /// `Err` is a malformed payload; the channel stays usable after it. The outer `Err`
    /// is a transport failure.
    pub async fn recv(&mut self) -> io::Result<Option<Result<serde_json::Value, ProtocolError>>> {
        let Some(framed) = self.framed.as_mut() else {
            return Ok(None);
        };
        framed.next().await.transpose()
    }

    /// Deliver every message to `handler` until the channel closes or the handler breaks.
    pub async fn on_message<H: MessageHandler>(&mut self, handler: &mut H) -> io::Result<()> {
        loop {
            match self.recv().await? {
                Some(Ok(message)) => {
                    if handler.on_message(message).is_break() {
                        return Ok(());
                    }
                }
                Some(Err(e)) => handler.on_error(e),
                None => return Ok(()),
            }
        }
    }

    /// Flush pending writes and shut the stream down. Closing twice is a no-op.
    pub async fn close(&mut self) {
        let Some(mut framed) = self.framed.take() else {
            return;
        };
        if let Err(e) = SinkExt::<serde_json::Value>::close(&mut framed).await {
            tracing::debug!(error = %e, "Error while closing channel");
        }
        tracing::trace!("Channel closed");
    }
}
