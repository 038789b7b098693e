//! Outbound frame queue for one control connection.
//!
//! Every server-to-console message funnels through a single bounded queue
//! drained by the connection's writer task. A session driver pushes its
//! frames sequentially, so per-session emission order is preserved end to
//! end; frames of different sessions interleave freely.

use std::time::{SystemTime, UNIX_EPOCH};

use protocol::messages::{
    ErrorMessage, OutputFrame, SessionClosed, SessionOpenFailed, SessionOpened,
};
use protocol::{ErrorCode, FrameKind, Message, SessionId};
use tokio::sync::mpsc;

/// Default outbound queue capacity per connection.
pub const OUTBOUND_CAPACITY: usize = 256;

/// Returns the current Unix timestamp in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Cloneable sender half of a connection's outbound queue.
#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<Message>,
}

impl FrameSender {
    /// Create a sender/receiver pair with the default capacity.
    pub fn channel() -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        (Self { tx }, rx)
    }

    /// Queue a message for the console.
    ///
    /// Returns false when the connection is gone; callers treat that as a
    /// signal to wind down.
    pub async fn send(&self, message: Message) -> bool {
        self.tx.send(message).await.is_ok()
    }

    /// Queue an output frame for one session, stamped with the current time.
    pub async fn output(&self, session_id: &SessionId, kind: FrameKind, payload: Vec<u8>) -> bool {
        self.send(Message::Output(OutputFrame {
            session_id: session_id.clone(),
            kind,
            payload,
            timestamp: now_millis(),
        }))
        .await
    }

    /// Queue a `system` frame carrying a human-readable notice.
    pub async fn system(&self, session_id: &SessionId, text: &str) -> bool {
        self.output(session_id, FrameKind::System, text.as_bytes().to_vec())
            .await
    }

    /// Queue the opened notice for a fresh session.
    pub async fn opened(&self, session_id: &SessionId, target_id: &str, display_name: &str) -> bool {
        self.send(Message::Opened(SessionOpened {
            session_id: session_id.clone(),
            target_id: target_id.to_string(),
            display_name: display_name.to_string(),
        }))
        .await
    }

    /// Queue an open-failure notice for a target that never got a session.
    pub async fn open_failed(&self, target_id: &str, code: ErrorCode, message: String) -> bool {
        self.send(Message::OpenFailed(SessionOpenFailed {
            target_id: target_id.to_string(),
            code,
            message,
        }))
        .await
    }

    /// Queue the closed notice for a session.
    pub async fn closed(&self, session_id: &SessionId, code: Option<ErrorCode>, reason: String) -> bool {
        self.send(Message::Closed(SessionClosed {
            session_id: session_id.clone(),
            code,
            reason: Some(reason),
        }))
        .await
    }

    /// Queue a channel-level error message.
    pub async fn error(&self, code: ErrorCode, message: String, context: Option<String>) -> bool {
        self.send(Message::Error(ErrorMessage {
            code,
            message,
            context,
        }))
        .await
    }
}
