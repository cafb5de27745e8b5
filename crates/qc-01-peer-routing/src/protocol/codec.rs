//! Length-prefixed framing for protocol streams.
//!
//! Wire format: `[length: u32 BE][bincode-encoded message]`.

use std::marker::PhantomData;

use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder, Framed};

use crate::domain::{CodecError, ProtocolError, DEFAULT_MAX_FRAME_SIZE};
use crate::ports::StreamHandle;

use super::guard::AbortOnDrop;

/// Length prefix size (4 bytes).
const LENGTH_PREFIX_SIZE: usize = 4;

/// A protocol stream framed with [`MessageCodec`].
pub type FramedStream<T> = Framed<AbortOnDrop, MessageCodec<T>>;

/// Frame a stream for messages of type `T`.
///
/// Dropping the result before `close` or `abort` aborts the stream.
pub fn framed<T>(stream: StreamHandle, max_frame_size: usize) -> FramedStream<T> {
    Framed::new(AbortOnDrop::new(stream), MessageCodec::new(max_frame_size))
}

/// Codec for one message family.
///
/// Rejects frames whose declared length exceeds `max_frame_size` before
/// buffering the body.
#[derive(Debug)]
pub struct MessageCodec<T> {
    max_frame_size: usize,
    pending_length: Option<usize>,
    _message: PhantomData<fn() -> T>,
}

impl<T> MessageCodec<T> {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            pending_length: None,
            _message: PhantomData,
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl<T> Default for MessageCodec<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

/// Encode a message body without framing.
pub fn encode_message<T: Serialize>(msg: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serialize(msg).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Decode a message body without framing.
pub fn decode_message<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    bincode::deserialize(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
}

impl<T: DeserializeOwned> Decoder for MessageCodec<T> {
    type Item = T;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let length = match self.pending_length {
            Some(length) => length,
            None => {
                if src.len() < LENGTH_PREFIX_SIZE {
                    return Ok(None);
                }
                let length = src.get_u32() as usize;
                if length > self.max_frame_size {
                    return Err(ProtocolError::FrameTooLarge {
                        size: length,
                        max: self.max_frame_size,
                    }
                    .into());
                }
                self.pending_length = Some(length);
                length
            }
        };

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        self.pending_length = None;
        let payload = src.split_to(length);
        Ok(Some(decode_message(&payload)?))
    }
}

impl<T: Serialize> Encoder<T> for MessageCodec<T> {
    type Error = CodecError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = encode_message(&item)?;
        if payload.len() > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len(),
                max: self.max_frame_size,
            }
            .into());
        }

        dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.put_slice(&payload);
        Ok(())
    }
}
