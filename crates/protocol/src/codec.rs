//! Message codec for the JSON-framed control connection.
//!
//! Each protocol message travels as one WebSocket text frame containing a
//! JSON-serialized [`Envelope`]. The codec stamps outgoing envelopes with a
//! monotonic sequence number and checks version and size on decode.

use crate::error::{ProtocolError, Result};
use crate::messages::{Envelope, Message, PROTOCOL_VERSION};

/// Maximum encoded message size (1 MB).
///
/// Shell output is chunked well below this by the session read loop; anything
/// larger indicates a broken peer.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Encoder and decoder for enveloped messages.
#[derive(Debug, Default)]
pub struct MessageCodec {
    /// Sequence number for the next outgoing envelope.
    next_sequence: u64,
}

impl MessageCodec {
    /// Create a new codec starting at sequence zero.
    pub fn new() -> Self {
        Self { next_sequence: 0 }
    }

    /// Encode a message into a JSON text frame, stamping the next sequence.
    pub fn encode(&mut self, message: Message) -> Result<String> {
        let envelope = Envelope::new(self.next_sequence, message);
        self.next_sequence += 1;

        let text = serde_json::to_string(&envelope)?;
        if text.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: text.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        Ok(text)
    }

    /// Decode a JSON text frame into an envelope, checking size and version.
    pub fn decode(&self, text: &str) -> Result<Envelope> {
        if text.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: text.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        let envelope: Envelope = serde_json::from_str(text)?;
        if envelope.version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: envelope.version,
            });
        }
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{CloseSession, Ping};

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut codec = MessageCodec::new();
        let text = codec
            .encode(Message::Close(CloseSession {
                session_id: "s-1".to_string(),
            }))
            .unwrap();

        let envelope = codec.decode(&text).unwrap();
        assert_eq!(envelope.version, PROTOCOL_VERSION);
        assert_eq!(envelope.sequence, 0);
        assert_eq!(
            envelope.payload,
            Message::Close(CloseSession {
                session_id: "s-1".to_string(),
            })
        );
    }

    #[test]
    fn test_sequence_increments_per_message() {
        let mut codec = MessageCodec::new();
        for expected in 0..5u64 {
            let text = codec.encode(Message::Ping(Ping { timestamp: 0 })).unwrap();
            let envelope = codec.decode(&text).unwrap();
            assert_eq!(envelope.sequence, expected);
        }
    }

    #[test]
    fn test_decode_rejects_version_mismatch() {
        let codec = MessageCodec::new();
        let text = r#"{"version":99,"sequence":0,"payload":{"type":"Ping","data":{"timestamp":0}}}"#;
        let err = codec.decode(text).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::VersionMismatch { expected: 1, got: 99 }
        ));
    }

    #[test]
    fn test_decode_rejects_malformed_json() {
        let codec = MessageCodec::new();
        let err = codec.decode("{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Deserialization(_)));
    }

    #[test]
    fn test_decode_rejects_unknown_message_type() {
        let codec = MessageCodec::new();
        let text = r#"{"version":1,"sequence":0,"payload":{"type":"Reboot","data":{}}}"#;
        let err = codec.decode(text).unwrap_err();
        assert!(matches!(err, ProtocolError::Deserialization(_)));
    }

    #[test]
    fn test_decode_rejects_oversized_input() {
        let codec = MessageCodec::new();
        let text = "x".repeat(MAX_MESSAGE_SIZE + 1);
        let err = codec.decode(&text).unwrap_err();
        assert!(matches!(err, ProtocolError::MessageTooLarge { .. }));
    }
}
