use std::time::Duration;

use thiserror::Error;

use crate::bridge::codec::ProtocolError;
use crate::bridge::protocol::ErrorKind;
use crate::bridge::transport::TransportError;
use crate::files::ExpandError;
use crate::runner::RunnerError;

/// Everything that can end a session in the `Failed` state.
///
/// Test failures are not errors; they are reported as a failure count.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid arguments: {0}")]
    ArgumentParse(String),

    #[error("no peer on port {port} within {timeout:?}")]
    ChannelTimeout { port: u16, timeout: Duration },

    #[error("no worker arguments received within {0:?}")]
    HandshakeTimeout(Duration),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("host application {0}")]
    HostProcess(String),

    #[error(transparent)]
    FileExpansion(#[from] ExpandError),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    /// Failure reported by the worker entry point inside the host application.
    #[error("worker entry failed ({kind}): {detail}")]
    Entry { kind: ErrorKind, detail: String },

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ArgumentParse(_) => ErrorKind::ArgumentParse,
            Self::ChannelTimeout { .. } => ErrorKind::ChannelTimeout,
            Self::HandshakeTimeout(_) => ErrorKind::HandshakeTimeout,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::HostProcess(_) => ErrorKind::HostProcess,
            Self::FileExpansion(_) => ErrorKind::FileExpansion,
            Self::Runner(_) => ErrorKind::Runner,
            Self::Entry { kind, .. } => *kind,
            Self::Io(_) => ErrorKind::Io,
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout { port, timeout, .. } => Self::ChannelTimeout { port, timeout },
            TransportError::Bind { port, source } => Self::Io(std::io::Error::new(
                source.kind(),
                format!("failed to bind port {port}: {source}"),
            )),
            TransportError::Accept(source) => Self::Io(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
