//! Event-code framing
//!
//! A frame is the raw payload followed by one CRC-8 byte computed over the
//! payload only:
//!
//! ```text
//! +------------------+-----+
//! | payload (N bytes)| crc |
//! +------------------+-----+
//! ```

use super::checksum;
use thiserror::Error;

/// Minimum frame length: one payload byte plus the checksum
pub const MIN_FRAME_LEN: usize = 2;

/// Frame decode errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Not enough bytes for payload and checksum
    #[error("Frame too short: {0} bytes")]
    TooShort(usize),

    /// Trailing byte does not match the payload
    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch {
        /// Checksum computed over the received payload
        expected: u8,
        /// Checksum byte carried by the frame
        actual: u8,
    },
}

/// Build a frame from raw payload bytes
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 1);
    frame.extend_from_slice(payload);
    frame.push(checksum::calculate(payload));
    frame
}

/// Build a frame carrying an event code
pub fn encode_event_frame(code: &str) -> Vec<u8> {
    encode_frame(code.as_bytes())
}

/// Split a frame into its validated payload
pub fn decode_frame(frame: &[u8]) -> Result<&[u8], FrameError> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(FrameError::TooShort(frame.len()));
    }

    let (payload, tail) = frame.split_at(frame.len() - 1);
    let actual = tail[0];
    let expected = checksum::calculate(payload);

    if expected != actual {
        return Err(FrameError::ChecksumMismatch { expected, actual });
    }

    Ok(payload)
}

/// Decode a frame into its event code
///
/// Payload bytes are decoded as UTF-8; invalid sequences are replaced.
pub fn decode_event_frame(frame: &[u8]) -> Result<String, FrameError> {
    decode_frame(frame).map(|payload| String::from_utf8_lossy(payload).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_button_press_frame() {
        let frame = encode_event_frame("BUTTON_PRESS");
        assert_eq!(frame.len(), 13);
        assert!(checksum::validate(&frame[..12], frame[12]));
        assert_eq!(decode_event_frame(&frame).unwrap(), "BUTTON_PRESS");
    }

    #[test]
    fn test_corrupted_checksum() {
        let mut frame = encode_event_frame("BUTTON_PRESS");
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;

        match decode_event_frame(&frame) {
            Err(FrameError::ChecksumMismatch { expected, actual }) => {
                assert_eq!(expected ^ 0xFF, actual);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_corrupted_payload() {
        let mut frame = encode_event_frame("START");
        frame[0] = b'X';
        assert!(decode_event_frame(&frame).is_err());
    }

    #[test]
    fn test_short_frames() {
        assert_eq!(decode_frame(&[]), Err(FrameError::TooShort(0)));
        assert_eq!(decode_frame(&[0x00]), Err(FrameError::TooShort(1)));
    }
}
