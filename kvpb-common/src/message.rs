//! # Message Codec
//!
//! Purpose: Define the seam between the framing layer and the payload schema.
//! The frame codec never looks inside a payload; it only asks a `Message` to
//! turn itself into bytes and back.
//!
//! ## Design Principles
//! 1. **Pluggable Schema**: Any type implementing `Message` can travel in a
//!    frame, regardless of how it serializes.
//! 2. **Empty Instances**: `Message: Default` gives the client a way to build
//!    a fresh response value for body-less replies and streamed frames.
//! 3. **Struct-as-Map**: The bundled `MsgPackCodec` uses `to_vec_named` so
//!    optional fields can be omitted and added without breaking peers.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CodecError, CodecResult};

/// A payload that can be carried inside a frame.
pub trait Message: Default + Send + Sized {
    /// Serializes the message into payload bytes.
    fn encode(&self) -> CodecResult<Vec<u8>>;

    /// Deserializes payload bytes into a message.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

/// A response type that may arrive as one of several frames.
///
/// The server marks the final frame of a stream with a "done" flag.
pub trait StreamedMessage: Message {
    /// Returns true when this frame terminates the stream.
    fn is_done(&self) -> bool;
}

/// Message with no payload at all, for body-less requests and responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Empty;

impl Message for Empty {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        Ok(Vec::new())
    }

    fn decode(_bytes: &[u8]) -> CodecResult<Self> {
        Ok(Empty)
    }
}

/// MessagePack codec for serde types.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MessagePack bytes (struct-as-map).
    #[inline]
    pub fn encode<T: Serialize>(value: &T) -> CodecResult<Vec<u8>> {
        rmp_serde::to_vec_named(value).map_err(|err| CodecError::Serialization(err.to_string()))
    }

    /// Decode MessagePack bytes to a value.
    ///
    /// An empty payload decodes to `T::default()`: servers omit the body
    /// entirely when every field holds its default.
    #[inline]
    pub fn decode<T: DeserializeOwned + Default>(bytes: &[u8]) -> CodecResult<T> {
        if bytes.is_empty() {
            return Ok(T::default());
        }
        rmp_serde::from_slice(bytes).map_err(|err| CodecError::Deserialization(err.to_string()))
    }
}

/// Implements `Message` for serde types through `MsgPackCodec`.
///
/// ```
/// use kvpb_common::{msgpack_message, Message};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
/// struct Note {
///     text: String,
/// }
///
/// msgpack_message!(Note);
///
/// let note = Note { text: "hi".to_string() };
/// let bytes = note.encode().unwrap();
/// assert_eq!(Note::decode(&bytes).unwrap(), note);
/// ```
#[macro_export]
macro_rules! msgpack_message {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::message::Message for $ty {
                fn encode(&self) -> $crate::error::CodecResult<Vec<u8>> {
                    $crate::message::MsgPackCodec::encode(self)
                }

                fn decode(bytes: &[u8]) -> $crate::error::CodecResult<Self> {
                    $crate::message::MsgPackCodec::decode(bytes)
                }
            }
        )+
    };
}

/// Fails with `CodecError::Serialization` when a required byte field is empty.
pub fn require_field(value: &[u8], field: &str) -> CodecResult<()> {
    if value.is_empty() {
        return Err(CodecError::Serialization(format!("required field {} not set", field)));
    }
    Ok(())
}
