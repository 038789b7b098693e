//! Control connection client.
//!
//! One WebSocket to the server carries every session this console opens.
//! The connection is pumped by two tasks: a writer draining the app's
//! outbound queue and a reader decoding server envelopes into an inbound
//! queue. When the socket drops, the inbound queue closes and the app shows
//! the disconnect; panes keep their logs.

use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use protocol::{Message, MessageCodec};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;

/// Queue capacity in each direction.
const QUEUE_CAPACITY: usize = 256;

/// Connect to the server's control endpoint.
///
/// Returns the outbound message sender and the inbound message receiver.
pub async fn connect(server_url: &str) -> Result<(mpsc::Sender<Message>, mpsc::Receiver<Message>)> {
    let url = Url::parse(server_url).context("invalid server url")?;
    if url.scheme() != "ws" && url.scheme() != "wss" {
        bail!("server url must use ws:// or wss://, got {}", server_url);
    }

    let (ws, _) = connect_async(server_url)
        .await
        .with_context(|| format!("failed to connect to {}", server_url))?;
    tracing::info!(url = %server_url, "Control connection established");

    let (mut ws_sink, mut ws_stream) = ws.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(QUEUE_CAPACITY);
    let (inbound_tx, inbound_rx) = mpsc::channel::<Message>(QUEUE_CAPACITY);

    // Writer: app messages out to the socket.
    tokio::spawn(async move {
        let mut codec = MessageCodec::new();
        while let Some(message) = outbound_rx.recv().await {
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

    // Reader: server envelopes in to the app.
    tokio::spawn(async move {
        let codec = MessageCodec::new();
        while let Some(next) = ws_stream.next().await {
            match next {
                Ok(WsMessage::Text(text)) => match codec.decode(&text) {
                    Ok(envelope) => {
                        if inbound_tx.send(envelope.payload).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Malformed server message");
                    }
                },
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "Control connection error");
                    break;
                }
            }
        }
        tracing::info!("Control connection closed");
    });

    Ok((outbound_tx, inbound_rx))
}
