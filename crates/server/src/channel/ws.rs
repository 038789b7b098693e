//! WebSocket listener for control connections.
//!
//! Each accepted connection is one multiplex channel: a reader loop decodes
//! JSON envelopes and hands them to the channel's router, and one writer
//! task drains the channel's outbound queue back over the socket. When the
//! socket closes, for any reason, every session the channel owns is torn
//! down.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use protocol::{ErrorCode, MessageCodec};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::channel::outbound::FrameSender;
use crate::channel::router::{ChannelRouter, ChannelSettings};
use crate::inventory::TargetResolver;
use crate::session::remote::ShellConnector;
use crate::session::SessionRegistry;

/// Listener accepting control connections.
pub struct ChannelListener {
    listener: TcpListener,
}

impl ChannelListener {
    /// Bind the listener to the given address.
    pub async fn bind(addr: &str) -> Result<Self, io::Error> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    /// The address the listener actually bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, io::Error> {
        self.listener.local_addr()
    }

    /// Accept connections forever, one multiplex channel per connection.
    pub async fn serve<R, C>(
        self,
        resolver: Arc<R>,
        connector: Arc<C>,
        settings: ChannelSettings,
    ) -> Result<(), io::Error>
    where
        R: TargetResolver + 'static,
        C: ShellConnector,
    {
        tracing::info!(addr = %self.listener.local_addr()?, "Listening for control connections");

        loop {
            let (stream, peer) = self.listener.accept().await?;
            let resolver = Arc::clone(&resolver);
            let connector = Arc::clone(&connector);
            let settings = settings.clone();

            tokio::spawn(async move {
                handle_connection(stream, peer, resolver, connector, settings).await;
            });
        }
    }
}

/// Run one control connection to completion.
pub async fn handle_connection<R, C>(
    stream: TcpStream,
    peer: SocketAddr,
    resolver: Arc<R>,
    connector: Arc<C>,
    settings: ChannelSettings,
) where
    R: TargetResolver + 'static,
    C: ShellConnector,
{
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!(peer = %peer, error = %e, "WebSocket handshake failed");
            return;
        }
    };
    tracing::info!(peer = %peer, "Control connection established");

    let (mut ws_sink, mut ws_stream) = ws.split();
    let (frames, mut out_rx) = FrameSender::channel();

    // Writer task: drain the outbound queue onto the socket, one text frame
    // per message, in queue order.
    let writer = tokio::spawn(async move {
        let mut codec = MessageCodec::new();
        while let Some(message) = out_rx.recv().await {
            match codec.encode(message) {
                Ok(text) => {
                    if ws_sink.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to encode outbound message");
                }
            }
        }
        let _ = ws_sink.close().await;
    });

    let registry = Arc::new(SessionRegistry::new());
    let router = ChannelRouter::new(resolver, connector, registry, frames.clone(), settings);
    let codec = MessageCodec::new();

    while let Some(next) = ws_stream.next().await {
        match next {
            Ok(WsMessage::Text(text)) => match codec.decode(&text) {
                Ok(envelope) => router.handle(envelope.payload).await,
                Err(err) => {
                    // Malformed input is reported, never fatal to the channel.
                    tracing::warn!(peer = %peer, error = %err, "Malformed client message");
                    frames
                        .error(ErrorCode::ProtocolError, err.to_string(), None)
                        .await;
                }
            },
            Ok(WsMessage::Binary(_)) => {
                frames
                    .error(
                        ErrorCode::ProtocolError,
                        "binary frames are not supported".to_string(),
                        None,
                    )
                    .await;
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(peer = %peer, error = %e, "Control connection error");
                break;
            }
        }
    }

    // Transport-level failure of the control connection cascades to every
    // session the channel owned.
    let closed = router.shutdown();
    tracing::info!(peer = %peer, sessions = closed, "Control connection closed");

    drop(router);
    drop(frames);
    let _ = writer.await;
}
