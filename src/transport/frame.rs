//! Chat frame encoding.
//!
//! Wire format:
//! ```text
//! <body (UTF-8)> U+241F <sender (UTF-8)>
//! ```
//!
//! There is no length prefix. One frame is expected per read, so the receiver
//! decodes exactly the bytes a single read returned.

use crate::core::constants::{FRAME_DELIMITER, FRAME_DELIMITER_BYTES};
use crate::core::{FrameError, Message};

/// Encode a message for the wire.
pub fn encode(message: &Message) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(message));
    out.extend_from_slice(message.body.as_bytes());
    out.extend_from_slice(FRAME_DELIMITER_BYTES);
    out.extend_from_slice(message.sender.as_bytes());
    out
}

/// Size of [`encode`]'s output.
pub fn encoded_len(message: &Message) -> usize {
    message.body.len() + FRAME_DELIMITER_BYTES.len() + message.sender.len()
}

/// Decode a frame, reporting why it was rejected.
///
/// Splits on the first delimiter only, so a sender label may itself contain
/// the delimiter.
pub fn decode_frame(data: &[u8], from_local: bool) -> Result<Message, FrameError> {
    let text = std::str::from_utf8(data)?;
    let (body, sender) = text
        .split_once(FRAME_DELIMITER)
        .ok_or(FrameError::MissingDelimiter)?;

    let body = body.trim();
    if body.is_empty() {
        return Err(FrameError::EmptyBody);
    }

    let sender = sender.trim();
    if sender.is_empty() {
        return Err(FrameError::EmptySender);
    }

    Ok(Message::new(body, sender, from_local))
}

/// Decode a frame, `None` if malformed.
pub fn decode(data: &[u8], from_local: bool) -> Option<Message> {
    decode_frame(data, from_local).ok()
}
