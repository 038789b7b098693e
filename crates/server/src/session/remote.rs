//! Remote session state machine and driver loop.
//!
//! A [`RemoteSession`] owns exactly one authenticated shell connection to one
//! target. Connection establishment is expressed as explicit state
//! transitions (`Idle -> Connecting -> Authenticating -> ShellOpen ->
//! Streaming`) driven over the [`ShellConnector`] seam, so the whole machine
//! can be exercised by tests without a network socket. The driver loop runs
//! as an independent task per session; it never blocks dispatch for sibling
//! sessions.

use std::future::Future;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;

use protocol::{ErrorCode, FrameKind, SessionId};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::channel::outbound::{now_millis, FrameSender};
use crate::config::SessionConfig;
use crate::inventory::{KeyMaterial, Target};
use crate::session::registry::SessionRegistry;

/// Capacity of the per-session input queue.
const INPUT_QUEUE_CAPACITY: usize = 64;

/// Errors produced by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The transport could not be established within the timeout.
    #[error("connection to {host} timed out after {seconds}s")]
    ConnectTimeout {
        /// Host that was being dialed.
        host: String,
        /// Configured timeout.
        seconds: u64,
    },

    /// The transport could not be established at all.
    #[error("failed to reach {host}: {reason}")]
    ConnectFailed {
        /// Host that was being dialed.
        host: String,
        /// Underlying failure.
        reason: String,
    },

    /// The authentication handshake did not finish within the timeout.
    #[error("authentication to {host} timed out after {seconds}s")]
    AuthTimeout {
        /// Host that was authenticating.
        host: String,
        /// Configured timeout.
        seconds: u64,
    },

    /// The remote host rejected the supplied key.
    #[error("authentication rejected for {login}@{host}")]
    AuthRejected {
        /// Login the key was presented for.
        login: String,
        /// Host that rejected it.
        host: String,
    },

    /// The remote host refused the interactive shell channel.
    #[error("shell channel refused by {host}: {reason}")]
    ChannelRefused {
        /// Host that refused.
        host: String,
        /// Underlying failure.
        reason: String,
    },

    /// The transport dropped underneath an established session.
    #[error("transport closed: {0}")]
    TransportClosed(String),

    /// The session is not in a state that accepts the operation.
    #[error("session not ready")]
    NotReady,
}

impl SessionError {
    /// Map the error onto its wire-level code.
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::ConnectTimeout { .. } | SessionError::AuthTimeout { .. } => {
                ErrorCode::ConnectTimeout
            }
            SessionError::ConnectFailed { .. } | SessionError::TransportClosed(_) => {
                ErrorCode::TransportClosed
            }
            SessionError::AuthRejected { .. } => ErrorCode::AuthRejected,
            SessionError::ChannelRefused { .. } => ErrorCode::ChannelRefused,
            SessionError::NotReady => ErrorCode::NotReady,
        }
    }
}

/// Lifecycle state of a remote session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, driver not yet dialing.
    Idle,
    /// Establishing the transport.
    Connecting,
    /// Running the authentication handshake.
    Authenticating,
    /// PTY and shell requested, not yet relaying.
    ShellOpen,
    /// Relaying input and output.
    Streaming,
    /// Teardown requested, transport being released.
    Closing,
    /// Ended cleanly.
    Closed,
    /// Ended with a failure; never retried automatically.
    Failed(ErrorCode),
}

impl SessionState {
    /// Whether the session has reached a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed(_))
    }

    /// Whether the session accepts operator input.
    pub fn accepts_input(self) -> bool {
        matches!(self, SessionState::Streaming)
    }
}

/// Timeouts applied to the connect and authenticate phases.
#[derive(Debug, Clone, Copy)]
pub struct SessionTimeouts {
    /// Transport establishment timeout.
    pub connect: Duration,
    /// Authentication handshake timeout.
    pub auth: Duration,
}

impl From<&SessionConfig> for SessionTimeouts {
    fn from(config: &SessionConfig) -> Self {
        Self {
            connect: Duration::from_secs(config.connect_timeout_secs),
            auth: Duration::from_secs(config.auth_timeout_secs),
        }
    }
}

/// Event produced by an open shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    /// Data on the shell's stdout.
    Stdout(Vec<u8>),
    /// Data on the shell's stderr.
    Stderr(Vec<u8>),
    /// The remote process reported an exit status.
    Exited(u32),
}

/// An open interactive shell on an established transport.
///
/// Methods return `impl Future + Send` so drivers consuming the shell can be
/// spawned as tasks; implementations are free to use `async fn`.
pub trait ShellStream: Send + 'static {
    /// Write input bytes to the shell.
    fn send(&mut self, data: &[u8]) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Propagate a terminal resize to the remote PTY.
    fn resize(
        &mut self,
        cols: u16,
        rows: u16,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Next event from the shell; `None` once the remote side is done.
    fn next_event(&mut self) -> impl Future<Output = Option<ShellEvent>> + Send;

    /// Release the transport. Must be safe to call after `next_event`
    /// returned `None`.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Transport seam for opening shells, split into the three phases the state
/// machine steps through.
pub trait ShellConnector: Send + Sync + 'static {
    /// An established but unauthenticated transport.
    type Transport: Send;
    /// The shell produced once the channel is open.
    type Shell: ShellStream;

    /// Establish the transport to the target.
    fn dial(
        &self,
        target: &Target,
    ) -> impl Future<Output = Result<Self::Transport, SessionError>> + Send;

    /// Authenticate the transport with the supplied key material.
    fn authenticate(
        &self,
        transport: Self::Transport,
        target: &Target,
        key: &KeyMaterial,
    ) -> impl Future<Output = Result<Self::Transport, SessionError>> + Send;

    /// Request an interactive PTY and shell on the authenticated transport.
    fn open_shell(
        &self,
        transport: Self::Transport,
        term: &str,
        cols: u16,
        rows: u16,
    ) -> impl Future<Output = Result<Self::Shell, SessionError>> + Send;
}

/// Commands routed from the channel to a session's driver.
#[derive(Debug)]
enum SessionCommand {
    /// Operator keystrokes.
    Input(Vec<u8>),
    /// Terminal resize.
    Resize(u16, u16),
}

/// Receiver half of a session's command queue, consumed by the driver task.
pub struct SessionCommands {
    rx: mpsc::Receiver<SessionCommand>,
}

/// One remote shell session: identity, state, and the handles the channel
/// uses to reach its driver task.
pub struct RemoteSession {
    id: SessionId,
    target: Target,
    created_at: u64,
    state: RwLock<SessionState>,
    command_tx: mpsc::Sender<SessionCommand>,
    cancel: CancellationToken,
}

impl RemoteSession {
    /// Create a session handle and the command receiver for its driver.
    pub fn new(id: SessionId, target: Target) -> (Arc<Self>, SessionCommands) {
        let (command_tx, rx) = mpsc::channel(INPUT_QUEUE_CAPACITY);
        let session = Arc::new(Self {
            id,
            target,
            created_at: now_millis(),
            state: RwLock::new(SessionState::Idle),
            command_tx,
            cancel: CancellationToken::new(),
        });
        (session, SessionCommands { rx })
    }

    /// Returns the session identifier.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the target this session is bound to.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Returns the creation time, Unix epoch milliseconds.
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.read().unwrap()
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.write().unwrap();
        tracing::debug!(
            session_id = %self.id,
            from = ?*state,
            to = ?next,
            "Session state transition"
        );
        *state = next;
    }

    /// Route operator input to the shell.
    ///
    /// Valid only while `Streaming`; in any other state the input is dropped
    /// and `NotReady` returned. When the driver's queue is full the input is
    /// likewise dropped rather than buffered without bound.
    pub fn write(&self, data: Vec<u8>) -> Result<(), SessionError> {
        if !self.state().accepts_input() {
            return Err(SessionError::NotReady);
        }

        match self.command_tx.try_send(SessionCommand::Input(data)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    session_id = %self.id,
                    "Input queue full, dropping keystrokes"
                );
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SessionError::TransportClosed(
                "session driver ended".to_string(),
            )),
        }
    }

    /// Propagate a terminal resize. Same state rules as [`write`].
    ///
    /// [`write`]: RemoteSession::write
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        if !self.state().accepts_input() {
            return Err(SessionError::NotReady);
        }

        match self.command_tx.try_send(SessionCommand::Resize(cols, rows)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SessionError::TransportClosed(
                "session driver ended".to_string(),
            )),
        }
    }

    /// Request teardown. Idempotent and safe from any state; the driver
    /// releases the transport and emits the final frames.
    pub fn close(&self) {
        {
            let mut state = self.state.write().unwrap();
            if !state.is_terminal() {
                *state = SessionState::Closing;
            }
        }
        self.cancel.cancel();
    }

    /// Drive the session end to end: establish, stream, tear down.
    ///
    /// Runs as the session's own task. `key` is consumed here and dropped as
    /// soon as authentication finishes. The session removes itself from the
    /// registry as its final act, after which the handle is unreachable.
    pub async fn run<C: ShellConnector>(
        self: Arc<Self>,
        commands: SessionCommands,
        connector: Arc<C>,
        key: KeyMaterial,
        term: String,
        cols: u16,
        rows: u16,
        timeouts: SessionTimeouts,
        frames: FrameSender,
        registry: Arc<SessionRegistry>,
    ) {
        let shell = tokio::select! {
            _ = self.cancel.cancelled() => {
                self.set_state(SessionState::Closed);
                frames
                    .closed(&self.id, None, "closed before ready".to_string())
                    .await;
                registry.remove(&self.id);
                return;
            }
            result = self.establish(&*connector, key, &term, cols, rows, timeouts) => {
                match result {
                    Ok(shell) => shell,
                    Err(err) => {
                        let code = err.code();
                        tracing::warn!(
                            session_id = %self.id,
                            target = %self.target.host,
                            error = %err,
                            "Session failed to open"
                        );
                        self.set_state(SessionState::Failed(code));
                        frames
                            .system(&self.id, &format!("session failed: {}", err))
                            .await;
                        frames.closed(&self.id, Some(code), err.to_string()).await;
                        registry.remove(&self.id);
                        return;
                    }
                }
            }
        };

        self.set_state(SessionState::Streaming);
        tracing::info!(
            session_id = %self.id,
            target = %self.target.host,
            login = %self.target.login,
            "Session streaming"
        );
        frames
            .system(
                &self.id,
                &format!("shell ready on {}", self.target.display_name),
            )
            .await;

        let (code, reason) = self.stream(shell, commands, &frames).await;

        match code {
            Some(code) => {
                self.set_state(SessionState::Failed(code));
                frames
                    .output(
                        &self.id,
                        FrameKind::Error,
                        format!("session error: {}", reason).into_bytes(),
                    )
                    .await;
            }
            None => self.set_state(SessionState::Closed),
        }

        frames.closed(&self.id, code, reason).await;
        registry.remove(&self.id);

        tracing::info!(session_id = %self.id, "Session ended");
    }

    /// Step through connect, authenticate, and shell-open with per-phase
    /// timeouts. Key material lives only inside this call.
    async fn establish<C: ShellConnector>(
        &self,
        connector: &C,
        key: KeyMaterial,
        term: &str,
        cols: u16,
        rows: u16,
        timeouts: SessionTimeouts,
    ) -> Result<C::Shell, SessionError> {
        self.set_state(SessionState::Connecting);
        let transport = tokio::time::timeout(timeouts.connect, connector.dial(&self.target))
            .await
            .map_err(|_| SessionError::ConnectTimeout {
                host: self.target.host.clone(),
                seconds: timeouts.connect.as_secs(),
            })??;

        self.set_state(SessionState::Authenticating);
        let transport = tokio::time::timeout(
            timeouts.auth,
            connector.authenticate(transport, &self.target, &key),
        )
        .await
        .map_err(|_| SessionError::AuthTimeout {
            host: self.target.host.clone(),
            seconds: timeouts.auth.as_secs(),
        })??;
        drop(key);

        self.set_state(SessionState::ShellOpen);
        connector.open_shell(transport, term, cols, rows).await
    }

    /// Relay loop: operator commands in, shell events out, until the remote
    /// side closes, the transport fails, or teardown is requested.
    async fn stream<S: ShellStream>(
        &self,
        mut shell: S,
        mut commands: SessionCommands,
        frames: &FrameSender,
    ) -> (Option<ErrorCode>, String) {
        enum Step {
            Cancelled,
            Command(Option<SessionCommand>),
            Event(Option<ShellEvent>),
        }

        let mut exit_status: Option<u32> = None;

        loop {
            let step = tokio::select! {
                _ = self.cancel.cancelled() => Step::Cancelled,
                command = commands.rx.recv() => Step::Command(command),
                event = shell.next_event() => Step::Event(event),
            };

            match step {
                Step::Cancelled => {
                    self.set_state(SessionState::Closing);
                    shell.close().await;
                    return (None, "closed by operator".to_string());
                }
                Step::Command(Some(SessionCommand::Input(data))) => {
                    if let Err(err) = shell.send(&data).await {
                        shell.close().await;
                        return (Some(err.code()), err.to_string());
                    }
                    if !frames.output(&self.id, FrameKind::InputEcho, data).await {
                        shell.close().await;
                        return (None, "control connection closed".to_string());
                    }
                }
                Step::Command(Some(SessionCommand::Resize(cols, rows))) => {
                    if let Err(err) = shell.resize(cols, rows).await {
                        tracing::warn!(
                            session_id = %self.id,
                            error = %err,
                            "Resize failed"
                        );
                    }
                }
                Step::Command(None) => {
                    // Handle dropped out from under us; treat as teardown.
                    shell.close().await;
                    return (None, "closed by operator".to_string());
                }
                Step::Event(Some(ShellEvent::Stdout(data))) => {
                    if !frames.output(&self.id, FrameKind::Output, data).await {
                        shell.close().await;
                        return (None, "control connection closed".to_string());
                    }
                }
                Step::Event(Some(ShellEvent::Stderr(data))) => {
                    if !frames.output(&self.id, FrameKind::Error, data).await {
                        shell.close().await;
                        return (None, "control connection closed".to_string());
                    }
                }
                Step::Event(Some(ShellEvent::Exited(status))) => {
                    exit_status = Some(status);
                }
                Step::Event(None) => {
                    shell.close().await;
                    let reason = match exit_status {
                        Some(status) => format!("remote shell exited with status {}", status),
                        None => "remote closed the connection".to_string(),
                    };
                    return (None, reason);
                }
            }
        }
    }
}
