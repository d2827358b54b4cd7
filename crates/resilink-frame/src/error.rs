/// Errors that can occur during line framing and envelope handling.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload contains the delimiter somewhere other than the end.
    #[error("payload contains an embedded delimiter")]
    EmbeddedDelimiter,

    /// The line exceeds the configured maximum length.
    #[error("line too long ({size} bytes, max {max})")]
    LineTooLong { size: usize, max: usize },

    /// A data line is too short or its message ID header is not two hex digits.
    #[error("malformed message ID header")]
    BadHeader,

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
