//! # Fleetmux Protocol Library
//!
//! This crate provides the wire protocol for the Fleetmux remote-shell
//! multiplexer: the message types exchanged between console and server and
//! the JSON codec that frames them.
//!
//! ## Overview
//!
//! The control connection is one persistent WebSocket per console. Every
//! message is a JSON text frame wrapping an [`Envelope`]:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Application Messages             │  open / input / close /
//! ├─────────────────────────────────────────┤  opened / output frames ...
//! │             Envelope                    │  version + sequence
//! ├─────────────────────────────────────────┤
//! │          JSON text frame                │  serde_json
//! ├─────────────────────────────────────────┤
//! │        Transport (WebSocket)            │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Binary payloads (keystrokes, shell output) are base64-encoded inside the
//! JSON so frames stay valid UTF-8 text.
//!
//! ## Example
//!
//! ```rust
//! use protocol::{Message, MessageCodec};
//! use protocol::messages::OpenSession;
//!
//! let mut codec = MessageCodec::new();
//! let text = codec
//!     .encode(Message::Open(OpenSession {
//!         target_id: "i-0abc".to_string(),
//!         account_id: "prod".to_string(),
//!         ..OpenSession::default()
//!     }))
//!     .unwrap();
//!
//! let envelope = codec.decode(&text).unwrap();
//! assert_eq!(envelope.sequence, 0);
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: protocol message definitions
//! - [`codec`]: JSON envelope codec
//! - [`error`]: error types

pub mod codec;
pub mod error;
pub mod messages;

pub use codec::{MessageCodec, MAX_MESSAGE_SIZE};
pub use error::{ProtocolError, Result};
pub use messages::{
    Envelope, ErrorCode, ErrorMessage, FrameKind, Message, OutputFrame, SessionId,
    PROTOCOL_VERSION,
};
