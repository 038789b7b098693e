//! SSH transport for remote sessions, built on russh.
//!
//! Implements the [`ShellConnector`] seam: dial, publickey authentication
//! with per-attempt key material, then an interactive PTY + shell channel.
//! Output is pulled from the channel's message stream, so the session driver
//! stays an explicit loop rather than a pile of callbacks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::{ChannelMsg, Disconnect};

use crate::inventory::{KeyMaterial, Target};
use crate::session::remote::{SessionError, ShellConnector, ShellEvent, ShellStream};

/// Keepalive interval for established transports.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// SSH client handler.
///
/// Host keys are accepted without verification: targets come from the
/// operator's own inventory and addresses are ephemeral in cloud fleets.
pub struct SshHandler;

#[async_trait]
impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// [`ShellConnector`] implementation dialing real SSH servers.
pub struct SshConnector {
    config: Arc<client::Config>,
}

impl SshConnector {
    /// Create a connector with keepalives enabled.
    pub fn new() -> Self {
        let config = client::Config {
            keepalive_interval: Some(KEEPALIVE_INTERVAL),
            keepalive_max: 3,
            ..Default::default()
        };
        Self {
            config: Arc::new(config),
        }
    }
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellConnector for SshConnector {
    type Transport = client::Handle<SshHandler>;
    type Shell = SshShell;

    async fn dial(&self, target: &Target) -> Result<Self::Transport, SessionError> {
        let addr = (target.host.as_str(), target.port);
        tracing::debug!(host = %target.host, port = target.port, "Dialing SSH");

        client::connect(Arc::clone(&self.config), addr, SshHandler)
            .await
            .map_err(|e| SessionError::ConnectFailed {
                host: target.host.clone(),
                reason: e.to_string(),
            })
    }

    async fn authenticate(
        &self,
        mut transport: Self::Transport,
        target: &Target,
        key: &KeyMaterial,
    ) -> Result<Self::Transport, SessionError> {
        let key_pair = russh_keys::decode_secret_key(key.pem(), None).map_err(|e| {
            SessionError::AuthRejected {
                login: target.login.clone(),
                host: format!("{} (unusable key material: {})", target.host, e),
            }
        })?;

        let accepted = transport
            .authenticate_publickey(&target.login, Arc::new(key_pair))
            .await
            .map_err(|e| SessionError::TransportClosed(e.to_string()))?;

        if !accepted {
            return Err(SessionError::AuthRejected {
                login: target.login.clone(),
                host: target.host.clone(),
            });
        }

        tracing::debug!(host = %target.host, login = %target.login, "SSH authenticated");
        Ok(transport)
    }

    async fn open_shell(
        &self,
        transport: Self::Transport,
        term: &str,
        cols: u16,
        rows: u16,
    ) -> Result<Self::Shell, SessionError> {
        let channel = transport
            .channel_open_session()
            .await
            .map_err(|e| SessionError::ChannelRefused {
                host: "remote".to_string(),
                reason: e.to_string(),
            })?;

        channel
            .request_pty(true, term, u32::from(cols), u32::from(rows), 0, 0, &[])
            .await
            .map_err(|e| SessionError::ChannelRefused {
                host: "remote".to_string(),
                reason: format!("pty request failed: {}", e),
            })?;

        channel
            .request_shell(true)
            .await
            .map_err(|e| SessionError::ChannelRefused {
                host: "remote".to_string(),
                reason: format!("shell request failed: {}", e),
            })?;

        Ok(SshShell {
            channel,
            // The handle must outlive the channel or the connection drops.
            handle: transport,
        })
    }
}

/// An open interactive shell over SSH.
pub struct SshShell {
    channel: russh::Channel<client::Msg>,
    handle: client::Handle<SshHandler>,
}

impl ShellStream for SshShell {
    async fn send(&mut self, data: &[u8]) -> Result<(), SessionError> {
        self.channel
            .data(data)
            .await
            .map_err(|e| SessionError::TransportClosed(e.to_string()))
    }

    async fn resize(&mut self, cols: u16, rows: u16) -> Result<(), SessionError> {
        self.channel
            .window_change(u32::from(cols), u32::from(rows), 0, 0)
            .await
            .map_err(|e| SessionError::TransportClosed(e.to_string()))
    }

    async fn next_event(&mut self) -> Option<ShellEvent> {
        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    return Some(ShellEvent::Stdout(data.to_vec()));
                }
                Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                    return Some(ShellEvent::Stderr(data.to_vec()));
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    return Some(ShellEvent::Exited(exit_status));
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                    return None;
                }
                Some(_) => {}
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.channel.eof().await;
        let _ = self
            .handle
            .disconnect(Disconnect::ByApplication, "session closed", "")
            .await;
    }
}
