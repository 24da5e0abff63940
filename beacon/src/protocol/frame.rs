use super::ProtocolError;
use crate::utils::ByteBuffer;

/// Size of the length prefix.
pub const HEADER_LEN: usize = 4;

/// Default upper bound on a payload.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Prefixes `payload` with its length.
///
/// # Panics
///
/// Panics if the payload does not fit a 32-bit length.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let len = u32::try_from(payload.len()).expect("payload length exceeds u32");

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Incremental decoder for length-prefixed frames.
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    max_frame_len: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    /// Takes one complete frame off the front of `buf`.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched while the frame is
    /// incomplete. A header announcing more than the configured maximum is
    /// an error; the stream cannot be resynchronised after it.
    pub fn decode(&self, buf: &mut ByteBuffer) -> Result<Option<Vec<u8>>, ProtocolError> {
        let Some(len) = self.peek_len(buf.filled())? else {
            return Ok(None);
        };

        if buf.len() < HEADER_LEN + len {
            return Ok(None);
        }

        let payload = buf.filled()[HEADER_LEN..HEADER_LEN + len].to_vec();
        buf.consume(HEADER_LEN + len);

        Ok(Some(payload))
    }

    /// Whether `bytes` starts with a complete frame.
    pub fn has_frame(&self, bytes: &[u8]) -> Result<bool, ProtocolError> {
        Ok(self
            .peek_len(bytes)?
            .is_some_and(|len| bytes.len() >= HEADER_LEN + len))
    }

    fn peek_len(&self, bytes: &[u8]) -> Result<Option<usize>, ProtocolError> {
        let Some(header) = bytes.first_chunk::<HEADER_LEN>() else {
            return Ok(None);
        };

        let len = u32::from_be_bytes(*header) as usize;
        if len > self.max_frame_len {
            return Err(ProtocolError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }

        Ok(Some(len))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}
