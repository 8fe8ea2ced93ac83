//! WebSocket pump for a single hub connection.
//!
//! Opens the socket, then shuttles frames in both directions until the
//! hub closes it, an error occurs, or the cancellation token fires:
//! decoded [`InboundMessage`]s go into an `mpsc` queue consumed by the
//! session's dispatch loop, and [`OutboundMessage`]s drained from another
//! queue are written to the socket. Reconnection is the caller's job;
//! one call to [`run_socket`] is exactly one connection.
//!
//! # Example
//!
//! ```rust,ignore
//! use casa_api::websocket::run_socket;
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//!
//! let (out_tx, out_rx) = mpsc::unbounded_channel();
//! let (in_tx, mut in_rx) = mpsc::channel(256);
//! let cancel = CancellationToken::new();
//!
//! tokio::spawn(run_socket(ws_url, out_rx, in_tx, cancel.clone()));
//! while let Some(msg) = in_rx.recv().await {
//!     println!("{msg:?}");
//! }
//! ```

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::protocol::{InboundMessage, OutboundMessage, parse_frame};

/// Run one connection to completion.
///
/// Returns `Ok(())` on a clean close (normal close frame, end of stream,
/// cancellation, or the session dropping its queues) and `Err` when
/// the connection could not be opened, failed mid-stream, or was closed
/// by the hub with any other close code.
pub async fn run_socket(
    url: Url,
    mut outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    inbound: mpsc::Sender<InboundMessage>,
    cancel: CancellationToken,
) -> Result<(), Error> {
    tracing::info!(url = %url, "Connecting to WebSocket");

    let (ws_stream, _response) = tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok(()),
        result = tokio_tungstenite::connect_async(url.as_str()) => {
            result.map_err(|e| Error::WebSocketConnect(e.to_string()))?
        }
    };

    tracing::info!("WebSocket connected");

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
            msg = outbound.recv() => {
                let Some(msg) = msg else {
                    tracing::debug!("outbound queue closed, ending connection");
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                };
                let text = serde_json::to_string(&msg).map_err(|e| Error::Deserialization {
                    message: e.to_string(),
                    body: String::new(),
                })?;
                tracing::trace!(id = ?msg.id(), "sending frame");
                write
                    .send(Message::Text(text.into()))
                    .await
                    .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        for msg in parse_frame(text.as_str()) {
                            if inbound.send(msg).await.is_err() {
                                tracing::debug!("inbound queue closed, ending connection");
                                return Ok(());
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // tungstenite queues the pong reply itself
                        tracing::trace!("WebSocket ping");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let Some(cf) = frame else {
                            tracing::info!("WebSocket close frame received (no payload)");
                            return Ok(());
                        };
                        tracing::info!(
                            code = %cf.code,
                            reason = %cf.reason,
                            "WebSocket close frame received"
                        );
                        if cf.code == CloseCode::Normal {
                            return Ok(());
                        }
                        return Err(Error::WebSocketClosed {
                            code: u16::from(cf.code),
                            reason: cf.reason.as_str().to_owned(),
                        });
                    }
                    Some(Err(tungstenite::Error::ConnectionClosed)) | None => {
                        tracing::info!("WebSocket stream ended");
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        return Err(Error::WebSocketConnect(e.to_string()));
                    }
                    Some(Ok(_)) => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }
}
