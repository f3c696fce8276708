//! Rendezvous transport: resolves NetworkOptions into one established Channel.
//!
//! - **Connect**: dial `host:port`, retrying at a fixed interval until the timeout
//! - **Listen**: bind all interfaces on `port`, accept exactly one connection
//!
//! Pending connect/accept futures are dropped on timeout, which releases their sockets.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use super::channel::Channel;
use super::protocol::{NetworkOptions, Role};

/// Bind address for the listening role.
pub const LISTEN_ADDR: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

/// Floor for the connect retry interval.
pub const MIN_RETRY_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("rendezvous ({role}) on port {port} timed out after {timeout:?}")]
    Timeout {
        role: Role,
        port: u16,
        timeout: Duration,
    },

    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),
}

/// Establish the session's single channel according to `opts.role`.
pub async fn establish(
    opts: &NetworkOptions,
    timeout: Duration,
    retry_interval: Duration,
) -> Result<Channel, TransportError> {
    let port = opts.port.get();
    tracing::debug!(role = %opts.role, port, host = ?opts.host, "Establishing channel");
    match opts.role {
        Role::Connect => connect(&opts.resolved_host(), port, timeout, retry_interval).await,
        Role::Listen => Listener::bind(port).await?.accept(timeout).await,
    }
}

/// Dial until a connection succeeds or `timeout` elapses.
pub async fn connect(
    host: &str,
    port: u16,
    timeout: Duration,
    retry_interval: Duration,
) -> Result<Channel, TransportError> {
    let retry_interval = retry_delay(retry_interval);
    tracing::debug!(%host, port, ?timeout, ?retry_interval, "Connecting to peer");

    let dial = async {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match TcpStream::connect((host, port)).await {
                Ok(stream) => return (stream, attempt),
                Err(e) => {
                    tracing::trace!(attempt, error = %e, "Connect attempt failed");
                    tokio::time::sleep(retry_interval).await;
                }
            }
        }
    };

    match tokio::time::timeout(timeout, dial).await {
        Ok((stream, attempts)) => {
            tracing::info!(%host, port, attempts, "Connected to peer");
            Ok(Channel::from_tcp(stream))
        }
        Err(_) => Err(TransportError::Timeout {
            role: Role::Connect,
            port,
            timeout,
        }),
    }
}

fn retry_delay(interval: Duration) -> Duration {
    interval.max(MIN_RETRY_INTERVAL)
}

/// Listening side of the rendezvous. Consumed by [`Listener::accept`].
pub struct Listener {
    inner: TcpListener,
    port: u16,
}

impl Listener {
    pub async fn bind(port: u16) -> Result<Self, TransportError> {
        let inner = TcpListener::bind((LISTEN_ADDR, port))
            .await
            .map_err(|source| TransportError::Bind { port, source })?;
        let port = inner.local_addr().map(|a| a.port()).unwrap_or(port);
        tracing::trace!(port, "Bound rendezvous listener");
        Ok(Self { inner, port })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Accept exactly one connection. The listener is closed afterwards either way.
    pub async fn accept(self, timeout: Duration) -> Result<Channel, TransportError> {
        tracing::debug!(port = self.port, ?timeout, "Waiting for peer connection");
        match tokio::time::timeout(timeout, self.inner.accept()).await {
            Ok(Ok((stream, peer))) => {
                tracing::info!(port = self.port, %peer, "Peer connected");
                Ok(Channel::from_tcp(stream))
            }
            Ok(Err(e)) => Err(TransportError::Accept(e)),
            Err(_) => Err(TransportError::Timeout {
                role: Role::Listen,
                port: self.port,
                timeout,
            }),
        }
    }
}
