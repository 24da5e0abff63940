//! Application wire format.
//!
//! Every message travels in a frame: a 4-byte big-endian payload length
//! followed by the payload. Payloads are UTF-8 text whose fields are
//! separated by [`DELIMITER`]; the first field names the message.
//!
//! - [`frame`]: length-prefixed framing and incremental decoding,
//! - [`request`]: typed client requests,
//! - [`reply`]: reply codes and server replies.

pub mod frame;
pub mod reply;
pub mod request;

pub use frame::{DEFAULT_MAX_FRAME_LEN, FrameDecoder, HEADER_LEN};
pub use reply::{Reply, ReplyCode};
pub use request::Request;

use thiserror::Error;

/// Separator between the fields of a payload.
pub const DELIMITER: char = '\n';

/// Errors raised while framing or parsing messages.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("empty payload")]
    Empty,

    #[error("unknown message tag {0:?}")]
    UnknownTag(String),

    #[error("{tag} expects {expected} fields, got {found}")]
    FieldCount {
        tag: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("invalid {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },
}

impl ProtocolError {
    /// Whether the byte stream can no longer be split into frames.
    ///
    /// Only a bad frame header is fatal; a bad payload leaves the stream
    /// aligned on the next frame.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProtocolError::FrameTooLarge { .. })
    }
}

/// Splits a payload into its fields.
///
/// Trailing empty fields are dropped, so a payload ending in a delimiter
/// parses like one that does not.
pub(crate) fn fields(payload: &[u8]) -> Result<Vec<&str>, ProtocolError> {
    let text = std::str::from_utf8(payload).map_err(|_| ProtocolError::InvalidUtf8)?;

    let mut fields: Vec<&str> = text.split(DELIMITER).collect();
    while fields.last().is_some_and(|f| f.is_empty()) {
        fields.pop();
    }

    if fields.is_empty() {
        return Err(ProtocolError::Empty);
    }

    Ok(fields)
}

/// Joins fields with [`DELIMITER`].
pub(crate) fn join<S: AsRef<str>>(fields: &[S]) -> Vec<u8> {
    let mut payload = String::new();

    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            payload.push(DELIMITER);
        }
        payload.push_str(field.as_ref());
    }

    payload.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_delimiters_are_ignored() {
        assert_eq!(fields(b"LOGIN\na@b.c\nx\n\n").unwrap(), ["LOGIN", "a@b.c", "x"]);
        assert_eq!(fields(b"\n\n"), Err(ProtocolError::Empty));
        assert_eq!(fields(&[0xff, 0xfe]), Err(ProtocolError::InvalidUtf8));
    }

    #[test]
    fn inner_empty_fields_are_kept() {
        assert_eq!(fields(b"A\n\nB").unwrap(), ["A", "", "B"]);
        assert_eq!(join(&["A", "", "B"]), b"A\n\nB");
    }

    #[test]
    fn only_oversized_frames_are_fatal() {
        assert!(ProtocolError::FrameTooLarge { len: 9, max: 8 }.is_fatal());
        assert!(!ProtocolError::UnknownTag("X".into()).is_fatal());
        assert!(!ProtocolError::Empty.is_fatal());
    }
}
