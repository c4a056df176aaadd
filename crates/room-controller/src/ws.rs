//! WebSocket connection lifecycle.
//!
//! One task per socket. Outbound `ServerEvent`s flow through an
//! unbounded channel drained by a pump task; the read loop decodes
//! `ClientEvent`s and hands them to the relay. When the stream ends
//! without a `leave_room` - tab closed, network dropped - the tracked
//! join record drives the same cleanup an explicit leave would.

use crate::http::AppState;
use crate::relay::{self, ConnectionSession};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use common::protocol::{ClientEvent, ErrorCode, ServerEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// `GET /ws` upgrade handler.
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (connection, mut outbound) = mpsc::unbounded_channel::<ServerEvent>();

    // Pump task: serialize server events onto the socket. Exits when the
    // channel closes (connection task done) or the sink errors.
    let pump = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut session: Option<ConnectionSession> = None;

    while let Some(frame) = stream.next().await {
        let Ok(message) = frame else {
            break;
        };
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    relay::dispatch(&state.registry, &connection, &mut session, event).await;
                }
                Err(e) => {
                    debug!(target: "ws", error = %e, "unparseable frame");
                    relay::send_error(
                        &connection,
                        ErrorCode::BadRequest {
                            message: "unparseable message".to_string(),
                        },
                    );
                }
            },
            Message::Close(_) => break,
            // Axum answers pings itself; binary frames are not part of
            // the protocol.
            _ => {}
        }
    }

    // Disconnect without leave_room: same cleanup as an explicit leave.
    if let Some(ConnectionSession { room_id, user_id }) = session.take() {
        info!(
            target: "ws",
            room_id = %room_id,
            user_id = %user_id,
            "connection closed, cleaning up membership"
        );
        let _ = state.registry.leave(room_id, user_id).await;
    }

    drop(connection);
    let _ = pump.await;
}
