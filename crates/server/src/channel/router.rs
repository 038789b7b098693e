//! Message router for one control connection.
//!
//! Dispatches inbound client messages to the session registry and resolver.
//! Session opening is spawned per request so a slow resolution or
//! authentication never blocks dispatch for sibling sessions; everything
//! else routes inline off the connection's read loop.

use std::sync::Arc;

use protocol::messages::{CloseSession, OpenSession, Ping, Pong, SessionInput, SessionResize};
use protocol::{ErrorCode, FrameKind, Message};

use crate::channel::outbound::FrameSender;
use crate::config::SessionConfig;
use crate::inventory::{ResolverError, TargetResolver};
use crate::session::remote::{SessionError, SessionTimeouts, ShellConnector};
use crate::session::SessionRegistry;

/// Per-channel policy knobs derived from configuration.
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    /// Connect/authenticate timeouts for new sessions.
    pub timeouts: SessionTimeouts,
    /// Maximum concurrently open sessions on this channel.
    pub max_sessions: usize,
    /// Terminal type requested for remote PTYs.
    pub term: String,
}

impl From<&SessionConfig> for ChannelSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            timeouts: SessionTimeouts::from(config),
            max_sessions: config.max_sessions_per_channel,
            term: config.term.clone(),
        }
    }
}

/// Routes one control connection's messages to its sessions.
pub struct ChannelRouter<R: TargetResolver, C: ShellConnector> {
    resolver: Arc<R>,
    connector: Arc<C>,
    registry: Arc<SessionRegistry>,
    frames: FrameSender,
    settings: ChannelSettings,
}

impl<R: TargetResolver, C: ShellConnector> Clone for ChannelRouter<R, C> {
    fn clone(&self) -> Self {
        Self {
            resolver: Arc::clone(&self.resolver),
            connector: Arc::clone(&self.connector),
            registry: Arc::clone(&self.registry),
            frames: self.frames.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<R, C> ChannelRouter<R, C>
where
    R: TargetResolver + 'static,
    C: ShellConnector,
{
    /// Create a router for one connection.
    pub fn new(
        resolver: Arc<R>,
        connector: Arc<C>,
        registry: Arc<SessionRegistry>,
        frames: FrameSender,
        settings: ChannelSettings,
    ) -> Self {
        Self {
            resolver,
            connector,
            registry,
            frames,
            settings,
        }
    }

    /// The registry owning this channel's sessions.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Route one inbound message.
    pub async fn handle(&self, message: Message) {
        match message {
            Message::Open(open) => {
                // Opening dials and authenticates; run it on its own task so
                // siblings keep flowing.
                let router = self.clone();
                tokio::spawn(async move {
                    router.open_session(open).await;
                });
            }
            Message::Input(input) => self.handle_input(input).await,
            Message::Resize(resize) => self.handle_resize(resize).await,
            Message::Close(close) => self.handle_close(close).await,
            Message::Ping(ping) => self.handle_ping(ping).await,

            // Server-to-console notices are not valid requests; ignore them.
            Message::Opened(_)
            | Message::OpenFailed(_)
            | Message::Closed(_)
            | Message::Output(_)
            | Message::Pong(_)
            | Message::Error(_) => {
                tracing::debug!("Ignoring notice message received as request");
            }
        }
    }

    /// Tear down every session this channel owns.
    pub fn shutdown(&self) -> usize {
        self.registry.close_all()
    }

    async fn open_session(&self, open: OpenSession) {
        if self.registry.len() >= self.settings.max_sessions {
            tracing::warn!(
                target_id = %open.target_id,
                limit = self.settings.max_sessions,
                "Session limit reached"
            );
            self.frames
                .open_failed(
                    &open.target_id,
                    ErrorCode::SessionLimit,
                    format!(
                        "channel already has {} open sessions",
                        self.settings.max_sessions
                    ),
                )
                .await;
            return;
        }

        let target = match self
            .resolver
            .resolve_target(&open.account_id, &open.target_id)
            .await
        {
            Ok(target) => target,
            Err(err) => {
                tracing::warn!(
                    target_id = %open.target_id,
                    account_id = %open.account_id,
                    error = %err,
                    "Target resolution failed"
                );
                self.frames
                    .open_failed(&open.target_id, resolver_error_code(&err), err.to_string())
                    .await;
                return;
            }
        };

        let key = match self
            .resolver
            .fetch_key_material(&target.account_id, &target.key_id, &target.region)
            .await
        {
            Ok(key) => key,
            Err(err) => {
                tracing::warn!(
                    target_id = %target.target_id,
                    key_id = %target.key_id,
                    region = %target.region,
                    error = %err,
                    "Key retrieval failed"
                );
                self.frames
                    .open_failed(&open.target_id, resolver_error_code(&err), err.to_string())
                    .await;
                return;
            }
        };

        let (session, commands) = self.registry.register(target);
        tracing::info!(
            session_id = %session.id(),
            target_id = %open.target_id,
            "Session opened"
        );
        self.frames
            .opened(
                session.id(),
                &session.target().target_id,
                &session.target().display_name,
            )
            .await;

        // This task becomes the session driver; it ends when the session does.
        Arc::clone(&session)
            .run(
                commands,
                Arc::clone(&self.connector),
                key,
                self.settings.term.clone(),
                open.cols,
                open.rows,
                self.settings.timeouts,
                self.frames.clone(),
                Arc::clone(&self.registry),
            )
            .await;
    }

    async fn handle_input(&self, input: SessionInput) {
        match self.registry.lookup(&input.session_id) {
            Some(session) => match session.write(input.data) {
                Ok(()) => {}
                Err(SessionError::NotReady) => {
                    // Stale input for a session that is not streaming;
                    // dropped, not queued.
                    tracing::debug!(
                        session_id = %input.session_id,
                        state = ?session.state(),
                        "Dropped input for session that is not streaming"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        session_id = %input.session_id,
                        error = %err,
                        "Input write failed"
                    );
                }
            },
            None => self.unknown_session(&input.session_id).await,
        }
    }

    async fn handle_resize(&self, resize: SessionResize) {
        match self.registry.lookup(&resize.session_id) {
            Some(session) => {
                if let Err(err) = session.resize(resize.cols, resize.rows) {
                    tracing::debug!(
                        session_id = %resize.session_id,
                        error = %err,
                        "Resize dropped"
                    );
                }
            }
            None => self.unknown_session(&resize.session_id).await,
        }
    }

    async fn handle_close(&self, close: CloseSession) {
        if self.registry.unregister(&close.session_id) {
            // The driver emits the closed notice as its final frames.
            tracing::info!(session_id = %close.session_id, "Close requested");
        } else {
            // Closing is idempotent; acknowledge even when already gone.
            self.frames
                .closed(&close.session_id, None, "session already closed".to_string())
                .await;
        }
    }

    async fn handle_ping(&self, ping: Ping) {
        tracing::debug!(timestamp = ping.timestamp, "Ping");
        self.frames
            .send(Message::Pong(Pong {
                timestamp: ping.timestamp,
            }))
            .await;
    }

    /// Report a message that referenced a session this channel never opened
    /// or that is already gone. Non-fatal to the channel.
    async fn unknown_session(&self, session_id: &str) {
        tracing::debug!(session_id = %session_id, "Message for unknown session");
        self.frames
            .output(
                &session_id.to_string(),
                FrameKind::System,
                format!("unknown session: {}", session_id).into_bytes(),
            )
            .await;
    }
}

/// Map resolver failures onto wire-level codes.
fn resolver_error_code(err: &ResolverError) -> ErrorCode {
    match err {
        ResolverError::TargetNotFound(_) => ErrorCode::TargetNotFound,
        ResolverError::KeyNotFound(_) => ErrorCode::KeyNotFound,
        ResolverError::Unauthorized(_) | ResolverError::Backend(_) => ErrorCode::Internal,
    }
}
