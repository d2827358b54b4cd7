//! Newline-delimited message framing for the resilink transport.
//!
//! Every frame is one line terminated by `\n`:
//! - A zero-length line is a keepalive, proving link liveness.
//! - A data line starts with a two-hex-digit message ID header (`00` for
//!   best-effort frames, `01`-`ff` for QoS envelopes) followed by the payload.
//!
//! No partial reads, no embedded delimiters, bounded line length.

pub mod codec;
pub mod envelope;
pub mod error;

pub use codec::{Frame, LineCodec, DEFAULT_MAX_LINE, DELIMITER};
pub use envelope::{decode_envelope, encode_envelope, HEADER_LEN, MID_NONE};
pub use error::{FrameError, Result};
