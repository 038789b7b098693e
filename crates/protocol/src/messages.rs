//! Protocol message definitions for Fleetmux.
//!
//! This module defines all message types exchanged over the control
//! connection between the console and the server. All messages are
//! serialized as JSON text frames.

use serde::{Deserialize, Serialize};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Unique identifier for a remote session, generated server-side at open time.
pub type SessionId = String;

/// Envelope wrapper for all protocol messages.
///
/// The envelope provides versioning and sequence numbers for message ordering
/// diagnostics and compatibility checking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version for compatibility checking.
    pub version: u8,
    /// Sequence number, monotonic per sender.
    pub sequence: u64,
    /// The actual message payload.
    pub payload: Message,
}

impl Envelope {
    /// Create a new envelope with the current protocol version.
    pub fn new(sequence: u64, payload: Message) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sequence,
            payload,
        }
    }
}

/// Top-level message enum containing all message types.
///
/// One enum covers both directions; the server ignores server-to-client
/// notices arriving inbound and vice versa.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Message {
    // Console -> server requests
    /// Request to open a session against an inventory target.
    Open(OpenSession),
    /// Keystrokes for one session.
    Input(SessionInput),
    /// Terminal resize notification for one session.
    Resize(SessionResize),
    /// Request to close one session.
    Close(CloseSession),

    // Server -> console lifecycle notices
    /// A session was opened and is streaming.
    Opened(SessionOpened),
    /// A session could not be opened.
    OpenFailed(SessionOpenFailed),
    /// A session ended.
    Closed(SessionClosed),
    /// Tagged output belonging to one session.
    Output(OutputFrame),

    // Control messages
    /// Ping for keepalive.
    Ping(Ping),
    /// Pong response to ping.
    Pong(Pong),
    /// Error not tied to a live session (e.g. malformed request).
    Error(ErrorMessage),
}

// ============================================================================
// Session Messages
// ============================================================================

/// Request to open a remote-shell session against an inventory target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenSession {
    /// Inventory identifier of the target host.
    pub target_id: String,
    /// Account the target belongs to.
    pub account_id: String,
    /// Requested terminal columns.
    pub cols: u16,
    /// Requested terminal rows.
    pub rows: u16,
}

impl Default for OpenSession {
    fn default() -> Self {
        Self {
            target_id: String::new(),
            account_id: String::new(),
            cols: 80,
            rows: 24,
        }
    }
}

/// Notice that a session was opened successfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOpened {
    /// Fresh session identifier, unique for the channel lifetime.
    pub session_id: SessionId,
    /// The target the session is bound to.
    pub target_id: String,
    /// Human-readable name of the target, for pane titles.
    pub display_name: String,
}

/// Notice that a session could not be opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOpenFailed {
    /// The target the open request named.
    pub target_id: String,
    /// Structured failure reason.
    pub code: ErrorCode,
    /// Human-readable detail.
    pub message: String,
}

/// Keystrokes routed to one session's shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInput {
    /// Session the input belongs to.
    pub session_id: SessionId,
    /// The raw bytes, base64-encoded on the wire.
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Terminal resize notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResize {
    /// Session to resize.
    pub session_id: SessionId,
    /// New terminal columns.
    pub cols: u16,
    /// New terminal rows.
    pub rows: u16,
}

/// Request to close one session. Closing is idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseSession {
    /// Session to close.
    pub session_id: SessionId,
}

/// Notice that a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClosed {
    /// Session that ended.
    pub session_id: SessionId,
    /// Structured reason when the session failed; absent on clean close.
    pub code: Option<ErrorCode>,
    /// Human-readable reason for closure.
    pub reason: Option<String>,
}

// ============================================================================
// Output Frames
// ============================================================================

/// Kind of data an output frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameKind {
    /// Echo of input the server accepted for this session.
    InputEcho,
    /// Shell stdout data.
    Output,
    /// Shell stderr data.
    Error,
    /// Server-generated notice about the session (state changes, failures).
    System,
}

/// One unit of tagged, ordered output belonging to a specific session.
///
/// Frames of one session never reorder relative to each other; frames of
/// different sessions may interleave freely on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFrame {
    /// Session the frame belongs to.
    pub session_id: SessionId,
    /// What the payload is.
    pub kind: FrameKind,
    /// The payload bytes, base64-encoded on the wire.
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    /// Emission time, Unix epoch milliseconds.
    pub timestamp: u64,
}

// ============================================================================
// Control Messages
// ============================================================================

/// Ping for keepalive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    /// Sender timestamp, Unix epoch milliseconds.
    pub timestamp: u64,
}

/// Pong response to ping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    /// Timestamp echoed from the ping.
    pub timestamp: u64,
}

/// Structured error codes carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Transport could not be established within the timeout.
    ConnectTimeout,
    /// The remote host rejected the supplied key.
    AuthRejected,
    /// The remote host refused the shell channel request.
    ChannelRefused,
    /// The inventory has no such target.
    TargetNotFound,
    /// Key material for the target's credential reference was not found.
    KeyNotFound,
    /// The underlying transport closed unexpectedly.
    TransportClosed,
    /// The session is not in a state that accepts the operation.
    NotReady,
    /// The per-channel session limit was reached.
    SessionLimit,
    /// The client sent a malformed or unroutable message.
    ProtocolError,
    /// Unexpected server-side failure.
    Internal,
}

/// Error message for failures not scoped to a live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Structured error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional context, e.g. the offending session id.
    pub context: Option<String>,
}

// ============================================================================
// Serde helpers
// ============================================================================

/// Serde adapter encoding byte payloads as base64 strings in JSON.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
