//! Framed codec for driver-worker communication.
//!
//! Uses LengthDelimitedCodec for framing (4-byte big-endian length) + serde_json for
//! serialization. Works over any AsyncRead/AsyncWrite.
//!
//! A frame whose payload is not valid JSON is consumed whole and yielded as a
//! [`ProtocolError`] item, so the stream stays aligned for the next frame. Only
//! framing/transport failures surface as `io::Error` and end the stream.

use std::io;
use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("channel closed before {0}")]
    Closed(&'static str),
}

/// Codec that frames messages with length prefix and serializes with JSON.
pub struct JsonCodec<T> {
    inner: LengthDelimitedCodec,
    _phantom: PhantomData<T>,
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .length_field_length(4)
                .new_codec(),
            _phantom: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Decoder for JsonCodec<T> {
    type Item = Result<T, ProtocolError>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src)? {
            Some(bytes) => {
                tracing::trace!(frame_size_bytes = bytes.len(), "Decoded frame");
                Ok(Some(
                    serde_json::from_slice(&bytes).map_err(ProtocolError::from),
                ))
            }
            None => Ok(None),
        }
    }
}

impl<T, M: Serialize> Encoder<M> for JsonCodec<T> {
    type Error = io::Error;

    fn encode(&mut self, item: M, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json =
            serde_json::to_vec(&item).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        tracing::trace!(frame_size_bytes = json.len(), "Encoding frame");
        self.inner.encode(Bytes::from(json), dst)
    }
}
