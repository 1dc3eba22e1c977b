//! # Frame Codec
//!
//! Purpose: Turn an opcode plus a message into the length-prefixed wire unit,
//! and turn a received frame body back into an outcome. No I/O happens here.
//!
//! ## Design Principles
//!
//! 1. **Bit-Exact Framing**: The length prefix counts the opcode byte plus the
//!    payload, never the 4 prefix bytes themselves.
//! 2. **Buffer Reuse**: `encode_frame_into` appends to a caller-owned
//!    `BytesMut` so connections can keep one write buffer for their lifetime.
//! 3. **Registry-Driven Decoding**: Which codes mean "error" or "no body" is
//!    looked up in an `OpcodeRegistry`, never hard-coded in the decoder.
//!
//! ## Memory Layout Example
//!
//! ```text
//! Frame (4 + L bytes total):
//! +-------------+-----------+----------------------+
//! | length:4B   | opcode:1B | payload:(L-1)B       |
//! | (u32, BE)   |           |                      |
//! +-------------+-----------+----------------------+
//!
//! Ping request (5 bytes total):
//! +-------------+------+
//! | 00 00 00 01 | 01   |
//! +-------------+------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{CodecError, CodecResult};
use crate::message::Message;
use crate::messages::ErrorResp;
use crate::opcode::OpcodeRegistry;

/// Size of the big-endian length prefix.
pub const FRAME_HEADER_LEN: usize = 4;

/// Encodes `message` under `code` and appends the full frame to `out`.
///
/// # Errors
/// Returns `CodecError::Serialization` when the message refuses to
/// serialize or the frame would not fit a 32-bit length.
pub fn encode_frame_into<M: Message>(code: u8, message: &M, out: &mut BytesMut) -> CodecResult<()> {
    let payload = message.encode()?;
    let body_len = u32::try_from(payload.len() + 1)
        .map_err(|_| CodecError::Serialization(format!("payload of {} bytes exceeds frame limit", payload.len())))?;

    out.reserve(FRAME_HEADER_LEN + body_len as usize);
    out.put_u32(body_len);
    out.put_u8(code);
    out.extend_from_slice(&payload);
    Ok(())
}

/// Encodes a complete frame into a fresh buffer.
pub fn encode_frame<M: Message>(code: u8, message: &M) -> CodecResult<Bytes> {
    let mut out = BytesMut::new();
    encode_frame_into(code, message, &mut out)?;
    Ok(out.freeze())
}

/// Reads the body length out of a 4-byte frame header.
#[inline]
pub fn body_len(header: [u8; FRAME_HEADER_LEN]) -> usize {
    u32::from_be_bytes(header) as usize
}

/// Decodes a frame body (opcode + payload, without the length prefix).
///
/// Returns `Ok(None)` for responses the registry marks as body-less, no
/// matter which `M` the caller expected.
///
/// # Errors
/// - `InvalidResponseCode` when `body` is empty.
/// - `Server` when the opcode is the registry's error code.
/// - `Deserialization` when the payload does not decode as `M` (or as
///   `ErrorResp` for error frames).
pub fn decode_body<M: Message>(body: &[u8], registry: &OpcodeRegistry) -> CodecResult<Option<M>> {
    let (&code, payload) = body.split_first().ok_or(CodecError::InvalidResponseCode)?;

    if registry.is_error(code) {
        let resp = ErrorResp::decode(payload)?;
        return Err(CodecError::Server(resp.message()));
    }

    if registry.is_empty_response(code) {
        return Ok(None);
    }

    M::decode(payload).map(Some)
}

/// Returns the opcode of a frame body, if any.
#[inline]
pub fn body_code(body: &[u8]) -> Option<u8> {
    body.first().copied()
}
