//! Signaling channel seam and the WebSocket transport.
//!
//! Coordinators and the orchestrator emit [`common::ClientEvent`]s
//! through [`SignalingSender`]; inbound [`common::ServerEvent`]s arrive
//! on a plain receiver the embedding application pumps into
//! [`crate::mesh::MeshOrchestrator::handle_server_event`].

use crate::errors::ClientError;
use async_trait::async_trait;
use common::protocol::{ClientEvent, ServerEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Outbound half of the signaling channel.
#[async_trait]
pub trait SignalingSender: Send + Sync {
    async fn send(&self, event: ClientEvent) -> Result<(), ClientError>;
}

/// Channel buffer for outbound events.
const OUTBOUND_BUFFER: usize = 64;

/// WebSocket-backed signaling transport.
pub struct WebSocketSignaling {
    outbound: mpsc::Sender<ClientEvent>,
}

impl WebSocketSignaling {
    /// Connect to the room controller's `/ws` endpoint. Returns the
    /// sender half and the stream of decoded server events.
    pub async fn connect(
        url: &str,
    ) -> Result<(Self, mpsc::Receiver<ServerEvent>), ClientError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| ClientError::Signaling(format!("connect failed: {e}")))?;
        let (mut write, mut read) = ws_stream.split();

        let (outbound, mut outbound_rx) = mpsc::channel::<ClientEvent>(OUTBOUND_BUFFER);
        let (inbound_tx, inbound) = mpsc::channel::<ServerEvent>(OUTBOUND_BUFFER);

        // Writer task: serialize client events onto the socket.
        tokio::spawn(async move {
            while let Some(event) = outbound_rx.recv().await {
                let Ok(text) = serde_json::to_string(&event) else {
                    continue;
                };
                if write.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        // Reader task: decode server events; unknown frames are skipped.
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let Ok(message) = frame else {
                    break;
                };
                let Message::Text(text) = message else {
                    continue;
                };
                match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(event) => {
                        if inbound_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(target: "signaling", error = %e, "undecodable server frame skipped");
                    }
                }
            }
            debug!(target: "signaling", "server stream ended");
        });

        Ok((Self { outbound }, inbound))
    }
}

#[async_trait]
impl SignalingSender for WebSocketSignaling {
    async fn send(&self, event: ClientEvent) -> Result<(), ClientError> {
        self.outbound
            .send(event)
            .await
            .map_err(|e| ClientError::Signaling(format!("signaling channel closed: {e}")))
    }
}
