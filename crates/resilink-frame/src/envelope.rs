use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::DELIMITER;
use crate::error::{FrameError, Result};

/// Message ID header value for best-effort frames.
///
/// Frames tagged `00` are never retransmitted and never deduplicated.
/// QoS envelopes use IDs 1..=255.
pub const MID_NONE: u8 = 0;

/// Length of the hex message ID header.
pub const HEADER_LEN: usize = 2;

/// Build a data line: two-hex-digit message ID header plus payload.
///
/// Rejects payloads containing the delimiter.
pub fn encode_envelope(mid: u8, payload: &[u8]) -> Result<Bytes> {
    if payload.contains(&DELIMITER) {
        return Err(FrameError::EmbeddedDelimiter);
    }
    let mut line = BytesMut::with_capacity(HEADER_LEN + payload.len());
    line.put_slice(format!("{mid:02x}").as_bytes());
    line.put_slice(payload);
    Ok(line.freeze())
}

/// Split a data line into its message ID and payload.
pub fn decode_envelope(line: &Bytes) -> Result<(u8, Bytes)> {
    if line.len() < HEADER_LEN {
        return Err(FrameError::BadHeader);
    }
    let header = std::str::from_utf8(&line[..HEADER_LEN]).map_err(|_| FrameError::BadHeader)?;
    let mid = u8::from_str_radix(header, 16).map_err(|_| FrameError::BadHeader)?;
    Ok((mid, line.slice(HEADER_LEN..)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_roundtrip() {
        let line = encode_envelope(0x2a, b"payload").unwrap();
        assert_eq!(&line[..], b"2apayload");

        let (mid, payload) = decode_envelope(&line).unwrap();
        assert_eq!(mid, 0x2a);
        assert_eq!(&payload[..], b"payload");
    }

    #[test]
    fn best_effort_header_is_zero() {
        let line = encode_envelope(MID_NONE, b"x").unwrap();
        assert_eq!(&line[..], b"00x");
    }

    #[test]
    fn empty_payload_allowed() {
        let line = encode_envelope(5, b"").unwrap();
        let (mid, payload) = decode_envelope(&line).unwrap();
        assert_eq!(mid, 5);
        assert!(payload.is_empty());
    }

    #[test]
    fn embedded_delimiter_rejected() {
        let err = encode_envelope(1, b"a\nb").unwrap_err();
        assert!(matches!(err, FrameError::EmbeddedDelimiter));
    }

    #[test]
    fn short_line_rejected() {
        let err = decode_envelope(&Bytes::from_static(b"a")).unwrap_err();
        assert!(matches!(err, FrameError::BadHeader));
    }

    #[test]
    fn non_hex_header_rejected() {
        let err = decode_envelope(&Bytes::from_static(b"zzpayload")).unwrap_err();
        assert!(matches!(err, FrameError::BadHeader));
    }
}
