use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::FrameError;

/// Line delimiter shared by every transport binding.
pub const DELIMITER: u8 = b'\n';

/// Default maximum line length (delimiter excluded): 512 bytes.
///
/// Embedded peers run with small receive buffers; both sides of a link must
/// agree on the budget.
pub const DEFAULT_MAX_LINE: usize = 512;

/// One decoded frame with the delimiter stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Zero-length line. Proves liveness, carries no data.
    Keepalive,
    /// Non-empty line: message ID header plus payload.
    Data(Bytes),
}

/// Splits a byte stream into delimited frames and back.
///
/// Handles partial reads internally — callers always get complete frames.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_line: usize,
    // Scan resume point, so repeated decodes stay linear in input size.
    next_index: usize,
}

impl LineCodec {
    /// Create a codec with an explicit line length budget.
    pub fn new(max_line: usize) -> Self {
        Self {
            max_line,
            next_index: 0,
        }
    }

    /// Configured maximum line length.
    pub fn max_line(&self) -> usize {
        self.max_line
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE)
    }
}

impl Decoder for LineCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        let offset = src[self.next_index..]
            .iter()
            .position(|&b| b == DELIMITER);

        let Some(offset) = offset else {
            if src.len() > self.max_line {
                return Err(FrameError::LineTooLong {
                    size: src.len(),
                    max: self.max_line,
                });
            }
            self.next_index = src.len();
            return Ok(None);
        };

        let end = self.next_index + offset;
        self.next_index = 0;

        if end > self.max_line {
            return Err(FrameError::LineTooLong {
                size: end,
                max: self.max_line,
            });
        }

        let line = src.split_to(end).freeze();
        src.advance(1); // delimiter

        if line.is_empty() {
            Ok(Some(Frame::Keepalive))
        } else {
            Ok(Some(Frame::Data(line)))
        }
    }
}

impl Encoder<Frame> for LineCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        match item {
            Frame::Keepalive => {
                dst.reserve(1);
                dst.put_u8(DELIMITER);
            }
            Frame::Data(line) => {
                if line.contains(&DELIMITER) {
                    return Err(FrameError::EmbeddedDelimiter);
                }
                if line.len() > self.max_line {
                    return Err(FrameError::LineTooLong {
                        size: line.len(),
                        max: self.max_line,
                    });
                }
                dst.reserve(line.len() + 1);
                dst.put_slice(&line);
                dst.put_u8(DELIMITER);
            }
        }
        Ok(())
    }
}
