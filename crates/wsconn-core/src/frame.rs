//! Frame validation and close-code classification.
//!
//! `FrameCodec` never touches wire bytes — actual RFC 6455 framing is the
//! transport driver's job (`tokio-tungstenite` in `wsconn-transport`). What
//! lives here is the protocol-level contract every driver must honor:
//! which frames are well-formed, and what a close code means.

use crate::error::{ProtocolError, ProtocolResult};

/// A logical WebSocket frame, independent of wire representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A UTF-8 text frame. Empty text is allowed.
    Text(String),
    /// A binary frame. Empty payloads are allowed.
    Binary(Vec<u8>),
    /// A ping control frame with no payload.
    Ping,
    /// A ping control frame carrying up to 125 bytes of payload.
    PingData(Vec<u8>),
    /// A pong control frame with no payload.
    Pong,
    /// A pong control frame carrying up to 125 bytes of payload.
    PongData(Vec<u8>),
    /// A close frame with no code or reason.
    Close,
    /// A close frame carrying a status code.
    CloseCode(u16),
    /// A close frame carrying a status code and a UTF-8 reason string.
    CloseWithReason(u16, String),
}

/// Codes reserved by RFC 6455 that must never be sent or accepted on the
/// wire, even though they fall inside the otherwise-valid range.
const RESERVED_CLOSE_CODES: [u16; 3] = [1004, 1005, 1006];

/// Stateless frame validation and close-code classification.
///
/// `encode`/`decode` are the identity function at this layer (the wire
/// format is the transport driver's concern); they exist so the round-trip
/// law `encode(decode(f)) == f` has somewhere to live and so callers have a
/// single place to route frames through validation.
pub struct FrameCodec;

impl FrameCodec {
    /// Validates a frame against the rules in the spec's §4.1 table.
    pub fn validate(frame: &Frame) -> ProtocolResult<()> {
        match frame {
            Frame::Text(_) | Frame::Binary(_) => Ok(()),
            Frame::Ping | Frame::Pong | Frame::Close => Ok(()),
            Frame::PingData(data) | Frame::PongData(data) => {
                if data.len() > 125 {
                    Err(ProtocolError::ControlFrameTooLarge { len: data.len() })
                } else {
                    Ok(())
                }
            }
            Frame::CloseCode(code) => Self::validate_close_code(*code),
            Frame::CloseWithReason(code, _) => Self::validate_close_code(*code),
        }
    }

    fn validate_close_code(code: u16) -> ProtocolResult<()> {
        if RESERVED_CLOSE_CODES.contains(&code) {
            return Err(ProtocolError::ReservedCloseCode(code));
        }
        if Self::is_valid_close_code(code) {
            Ok(())
        } else {
            Err(ProtocolError::InvalidCloseCode(code))
        }
    }

    /// Returns whether `code` is an acceptable WebSocket close code:
    /// `1000 <= code <= 4999` and not one of the reserved codes
    /// `{1004, 1005, 1006}`.
    pub fn is_valid_close_code(code: u16) -> bool {
        (1000..=4999).contains(&code) && !RESERVED_CLOSE_CODES.contains(&code)
    }

    /// A human-readable description of a standard close code, or
    /// `"Unknown close code"` for anything outside the 1000–1015 table.
    pub fn close_meaning(code: u16) -> &'static str {
        match code {
            1000 => "Normal Closure",
            1001 => "Going Away",
            1002 => "Protocol Error",
            1003 => "Unsupported Data",
            1004 => "Reserved",
            1005 => "No Status Received",
            1006 => "Abnormal Closure",
            1007 => "Invalid frame payload data",
            1008 => "Policy Violation",
            1009 => "Message Too Big",
            1010 => "Mandatory Extension",
            1011 => "Internal Server Error",
            1012 => "Service Restart",
            1013 => "Try Again Later",
            1014 => "Bad Gateway",
            1015 => "TLS Handshake",
            _ => "Unknown close code",
        }
    }

    /// Identity transform — frames are not re-encoded at this layer.
    /// Exists so the round-trip law has a stable entry point even though
    /// this codec is a validator, not a serializer.
    pub fn encode(frame: Frame) -> Frame {
        frame
    }

    /// Identity transform, paired with [`Self::encode`].
    pub fn decode(frame: Frame) -> ProtocolResult<Frame> {
        Self::validate(&frame)?;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_and_binary_allow_empty_payloads() {
        assert!(FrameCodec::validate(&Frame::Text(String::new())).is_ok());
        assert!(FrameCodec::validate(&Frame::Binary(Vec::new())).is_ok());
    }

    #[test]
    fn control_frame_over_125_bytes_rejected() {
        let payload = vec![0u8; 126];
        assert_eq!(
            FrameCodec::validate(&Frame::PingData(payload.clone())),
            Err(ProtocolError::ControlFrameTooLarge { len: 126 })
        );
        assert_eq!(
            FrameCodec::validate(&Frame::PongData(payload)),
            Err(ProtocolError::ControlFrameTooLarge { len: 126 })
        );
    }

    #[test]
    fn control_frame_at_125_bytes_allowed() {
        let payload = vec![0u8; 125];
        assert!(FrameCodec::validate(&Frame::PingData(payload)).is_ok());
    }

    #[test]
    fn reserved_close_codes_rejected() {
        assert_eq!(
            FrameCodec::validate(&Frame::CloseWithReason(1005, String::new())),
            Err(ProtocolError::ReservedCloseCode(1005))
        );
        assert_eq!(
            FrameCodec::validate(&Frame::CloseCode(1004)),
            Err(ProtocolError::ReservedCloseCode(1004))
        );
        assert_eq!(
            FrameCodec::validate(&Frame::CloseCode(1006)),
            Err(ProtocolError::ReservedCloseCode(1006))
        );
    }

    #[test]
    fn out_of_range_close_code_rejected() {
        assert_eq!(
            FrameCodec::validate(&Frame::CloseCode(999)),
            Err(ProtocolError::InvalidCloseCode(999))
        );
        assert_eq!(
            FrameCodec::validate(&Frame::CloseCode(5000)),
            Err(ProtocolError::InvalidCloseCode(5000))
        );
    }

    #[test]
    fn valid_close_codes_accepted() {
        for code in [1000u16, 1002, 1011, 3000, 4999] {
            assert!(FrameCodec::is_valid_close_code(code), "{code} should be valid");
        }
    }

    #[test]
    fn close_meaning_table_is_exhaustive_for_standard_codes() {
        assert_eq!(FrameCodec::close_meaning(1000), "Normal Closure");
        assert_eq!(FrameCodec::close_meaning(1015), "TLS Handshake");
        assert_eq!(FrameCodec::close_meaning(42), "Unknown close code");
    }

    #[test]
    fn encode_decode_round_trip() {
        let frames = vec![
            Frame::Text("hello".into()),
            Frame::Binary(vec![1, 2, 3]),
            Frame::Ping,
            Frame::PingData(vec![9, 9]),
            Frame::Pong,
            Frame::PongData(vec![]),
            Frame::Close,
            Frame::CloseCode(1000),
            Frame::CloseWithReason(1000, "bye".into()),
        ];
        for frame in frames {
            let decoded = FrameCodec::decode(FrameCodec::encode(frame.clone())).unwrap();
            assert_eq!(decoded, frame);
        }
    }
}
