// CLASSIFICATION: COMMUNITY
// Filename: wire/mod.rs · fat9p v0.1
// Author: Lukas Bower
//
// The codec subsystem: framing, the cursor primitives, the typed message
// model, and the top-level decode/encode entry points a `Session` drives.

pub mod cursor;
pub mod framing;
pub mod message;
pub mod types;

pub use framing::FrameStatus;
pub use message::{decode_request, encode_response, Envelope, MessageType, Request, Response};
pub use types::{CodecError, Qid, QidType, Stat, DEFAULT_MSIZE, MAX_MSIZE, NOFID, NOTAG, VERSION};

use cursor::{Reader, Writer};

/// Decode one complete frame (as identified by `framing::check`) into a
/// tagged request. `frame` is the full `len` bytes including the 7-byte
/// header.
pub fn decode_frame(frame: &[u8]) -> Result<Envelope<Request>, CodecError> {
    let mut header = Reader::new(frame);
    let size = header.u32()?;
    if size as usize != frame.len() {
        return Err(CodecError::LengthMismatch {
            declared: size,
            actual: frame.len(),
        });
    }
    let raw_type = header.u8()?;
    let tag = header.u16()?;
    let ty = MessageType::try_from(raw_type)?;
    let body = decode_request(ty, &frame[header.position()..])?;
    Ok(Envelope { tag, body })
}

/// Encode a tagged response into a complete frame: reserve the 7-byte
/// header, write the payload, then back-patch `size`.
pub fn encode_frame(tag: u16, resp: &Response, capacity: usize) -> Result<Vec<u8>, CodecError> {
    let payload = encode_response(resp, capacity.saturating_sub(7))?;
    let total = 7 + payload.len();
    let mut w = Writer::with_capacity(total);
    w.u32(total as u32)?;
    w.u8(resp.message_type() as u8)?;
    w.u16(tag)?;
    w.bytes(&payload)?;
    Ok(w.into_inner())
}

/// Read the tag out of a frame that is known to be at least 7 bytes
/// long (guaranteed once `framing::check` reports `OneComplete`), even
/// when the body fails to decode.
pub fn peek_tag(frame: &[u8]) -> u16 {
    u16::from_le_bytes([frame[5], frame[6]])
}

/// The fixed `Rerror` string for a codec-level decode failure.
pub fn error_message(e: &CodecError) -> &'static str {
    match e {
        CodecError::TooSmall => "message too small",
        CodecError::TooLarge => "message too large",
        CodecError::Truncated => "malformed message",
        CodecError::Unsupported(_) => "unknown message type",
        CodecError::InvalidUtf8 => "malformed message",
        CodecError::LengthMismatch { .. } => "malformed message",
    }
}

/// Build an `Rerror` frame carrying `message`, echoing `tag`.
pub fn encode_error_frame(tag: u16, message: &str, capacity: usize) -> Result<Vec<u8>, CodecError> {
    encode_frame(
        tag,
        &Response::Error {
            ename: message.to_string(),
        },
        capacity,
    )
}
