//! Channel between the driving process and the worker.
//!
//! # Architecture
//!
//! - **protocol**: Message types (NetworkOptions, WorkerArgs, ControlMessage, SessionOutcome)
//! - **codec**: Length-prefixed JSON framing codec for AsyncRead/AsyncWrite
//! - **channel**: Owned duplex message channel, closed exactly once
//! - **transport**: Connect/listen rendezvous producing the channel

pub mod channel;
pub mod codec;
pub mod protocol;
pub mod transport;
