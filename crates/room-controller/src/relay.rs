//! Signaling relay: maps channel events from one connection onto
//! registry operations.
//!
//! The relay is stateless apart from the per-connection join record it
//! is handed; it rewrites negotiation envelopes (`offer` becomes
//! `offer_received` carrying the sender's id) and never looks inside
//! payloads. Errors go back to the offending connection only; relay
//! misses are silently dropped.

use crate::registry::{ConnectionHandle, JoinRequest, RoomRegistryHandle};

use common::protocol::{ClientEvent, ErrorCode, ServerEvent};
use common::types::{RoomId, UserId};
use tracing::debug;

/// What the connection layer remembers about a joined socket.
#[derive(Debug, Clone)]
pub struct ConnectionSession {
    pub room_id: RoomId,
    pub user_id: UserId,
}

/// Handle one decoded client event on behalf of a connection.
///
/// `session` is the connection's join record: `None` until a successful
/// `join_room`, cleared again on `leave_room`. The caller uses it for
/// disconnect cleanup.
pub async fn dispatch(
    registry: &RoomRegistryHandle,
    connection: &ConnectionHandle,
    session: &mut Option<ConnectionSession>,
    event: ClientEvent,
) {
    match event {
        ClientEvent::JoinRoom {
            room_id,
            user_id,
            display_name,
            password,
            video_quality,
        } => {
            if session.is_some() {
                send_error(
                    connection,
                    ErrorCode::BadRequest {
                        message: "connection has already joined a room".to_string(),
                    },
                );
                return;
            }

            let request = JoinRequest {
                room_id: room_id.clone(),
                user_id: user_id.clone(),
                display_name,
                password,
                video_quality,
                connection: connection.clone(),
            };
            match registry.join(request).await {
                Ok(snapshot) => {
                    *session = Some(ConnectionSession { room_id, user_id });
                    let _ = connection.send(ServerEvent::RoomJoined {
                        participants: snapshot.participants,
                        room_info: snapshot.room_info,
                    });
                }
                Err(e) => {
                    debug!(target: "relay", error = %e, "join rejected");
                    send_error(connection, e.to_error_code());
                }
            }
        }

        ClientEvent::LeaveRoom { room_id, user_id } => {
            // Only the connection's own membership can be dropped.
            let Some(current) = session.as_ref() else {
                return;
            };
            if current.room_id != room_id || current.user_id != user_id {
                return;
            }
            *session = None;
            let _ = registry.leave(room_id, user_id).await;
        }

        ClientEvent::Offer {
            room_id,
            target_id,
            payload,
        } => {
            if let Some(from) = sender_in(session, &room_id) {
                let event = ServerEvent::OfferReceived {
                    from_id: from.clone(),
                    payload,
                };
                let _ = registry.relay(room_id, from, target_id, event).await;
            }
        }

        ClientEvent::Answer {
            room_id,
            target_id,
            payload,
        } => {
            if let Some(from) = sender_in(session, &room_id) {
                let event = ServerEvent::AnswerReceived {
                    from_id: from.clone(),
                    payload,
                };
                let _ = registry.relay(room_id, from, target_id, event).await;
            }
        }

        ClientEvent::IceCandidate {
            room_id,
            target_id,
            payload,
        } => {
            if let Some(from) = sender_in(session, &room_id) {
                let event = ServerEvent::IceCandidateReceived {
                    from_id: from.clone(),
                    payload,
                };
                let _ = registry.relay(room_id, from, target_id, event).await;
            }
        }

        ClientEvent::MicStateChanged {
            room_id,
            user_id: _,
            muted,
        } => {
            // The sender's identity comes from the connection, never
            // from the payload.
            if let Some(from) = sender_in(session, &room_id) {
                let event = ServerEvent::PeerMicState {
                    user_id: from.clone(),
                    muted,
                };
                let _ = registry.broadcast(room_id, from, event).await;
            }
        }

        ClientEvent::ChatMessage {
            room_id,
            user_id: _,
            display_name,
            text,
            ts,
        } => {
            if let Some(from) = sender_in(session, &room_id) {
                let event = ServerEvent::ChatMessage {
                    room_id: room_id.clone(),
                    from_id: from.clone(),
                    display_name,
                    text,
                    ts,
                };
                let _ = registry.broadcast(room_id, from, event).await;
            }
        }

        ClientEvent::SetPassword {
            room_id,
            password,
            hint,
        } => {
            let Some(from) = sender_in(session, &room_id) else {
                return;
            };
            if let Err(e) = registry.set_password(room_id, from, password, hint).await {
                send_error(connection, e.to_error_code());
            }
        }

        ClientEvent::ClearPassword { room_id } => {
            let Some(from) = sender_in(session, &room_id) else {
                return;
            };
            if let Err(e) = registry.clear_password(room_id, from).await {
                send_error(connection, e.to_error_code());
            }
        }
    }
}

/// The connection's user id, provided it has joined `room_id`.
/// Signals sent before joining (or for another room) are dropped.
fn sender_in(session: &Option<ConnectionSession>, room_id: &RoomId) -> Option<UserId> {
    match session {
        Some(s) if &s.room_id == room_id => Some(s.user_id.clone()),
        _ => {
            debug!(target: "relay", room_id = %room_id, "signal without matching join dropped");
            None
        }
    }
}

/// Push an error event to one connection; a closed connection is fine.
pub fn send_error(connection: &ConnectionHandle, error: ErrorCode) {
    let _ = connection.send(ServerEvent::Error { error });
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::Config;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn test_registry() -> RoomRegistryHandle {
        RoomRegistryHandle::new(Config {
            bcrypt_cost: crate::config::MIN_BCRYPT_COST,
            ..Config::default()
        })
    }

    fn join_event(room: &str, user: &str) -> ClientEvent {
        ClientEvent::JoinRoom {
            room_id: RoomId::from(room),
            user_id: UserId::from(user),
            display_name: user.to_uppercase(),
            password: None,
            video_quality: None,
        }
    }

    #[tokio::test]
    async fn join_then_offer_is_rewritten_for_target() {
        let registry = test_registry();

        let (conn_a, mut rx_a) = mpsc::unbounded_channel();
        let (conn_b, mut rx_b) = mpsc::unbounded_channel();
        let mut session_a = None;
        let mut session_b = None;

        dispatch(&registry, &conn_a, &mut session_a, join_event("r1", "a")).await;
        dispatch(&registry, &conn_b, &mut session_b, join_event("r1", "b")).await;

        assert!(matches!(
            rx_a.recv().await.unwrap(),
            ServerEvent::RoomJoined { .. }
        ));
        // a also hears that b joined.
        assert!(matches!(
            rx_a.recv().await.unwrap(),
            ServerEvent::UserJoined { .. }
        ));

        let payload = json!({"type": "offer", "sdp": "v=0"});
        dispatch(
            &registry,
            &conn_b,
            &mut session_b,
            ClientEvent::Offer {
                room_id: RoomId::from("r1"),
                target_id: UserId::from("a"),
                payload: payload.clone(),
            },
        )
        .await;
        registry.status().await.unwrap();

        // skip b's own room_joined
        assert!(matches!(
            rx_b.recv().await.unwrap(),
            ServerEvent::RoomJoined { .. }
        ));

        assert_eq!(
            rx_a.recv().await.unwrap(),
            ServerEvent::OfferReceived {
                from_id: UserId::from("b"),
                payload,
            }
        );
    }

    #[tokio::test]
    async fn signal_before_join_is_dropped() {
        let registry = test_registry();
        let (conn, mut rx) = mpsc::unbounded_channel();
        let mut session = None;

        dispatch(
            &registry,
            &conn,
            &mut session,
            ClientEvent::Offer {
                room_id: RoomId::from("r1"),
                target_id: UserId::from("a"),
                payload: json!({}),
            },
        )
        .await;
        registry.status().await.unwrap();

        assert!(rx.try_recv().is_err(), "no error and no relay");
    }

    #[tokio::test]
    async fn double_join_on_one_connection_is_bad_request() {
        let registry = test_registry();
        let (conn, mut rx) = mpsc::unbounded_channel();
        let mut session = None;

        dispatch(&registry, &conn, &mut session, join_event("r1", "a")).await;
        dispatch(&registry, &conn, &mut session, join_event("r2", "a")).await;

        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerEvent::RoomJoined { .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerEvent::Error {
                error: ErrorCode::BadRequest { .. }
            }
        ));
        // Session still points at the first room.
        assert_eq!(session.unwrap().room_id, RoomId::from("r1"));
    }

    #[tokio::test]
    async fn failed_join_sends_error_and_leaves_session_unset() {
        let registry = test_registry();
        let info = registry
            .create_room(
                common::types::RoomSettings {
                    password_enabled: true,
                    ..Default::default()
                },
                Some("secret123".to_string()),
            )
            .await
            .unwrap();

        let (conn, mut rx) = mpsc::unbounded_channel();
        let mut session = None;
        dispatch(
            &registry,
            &conn,
            &mut session,
            ClientEvent::JoinRoom {
                room_id: info.room_id.clone(),
                user_id: UserId::from("a"),
                display_name: "A".to_string(),
                password: Some("wrong".to_string()),
                video_quality: None,
            },
        )
        .await;

        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerEvent::Error {
                error: ErrorCode::AuthFailed
            }
        ));
        assert!(session.is_none());
    }

    #[tokio::test]
    async fn leave_requires_matching_identity() {
        let registry = test_registry();
        let (conn, _rx) = mpsc::unbounded_channel();
        let mut session = None;

        dispatch(&registry, &conn, &mut session, join_event("r1", "a")).await;
        // Leave with a mismatched user id is ignored.
        dispatch(
            &registry,
            &conn,
            &mut session,
            ClientEvent::LeaveRoom {
                room_id: RoomId::from("r1"),
                user_id: UserId::from("mallory"),
            },
        )
        .await;
        assert!(session.is_some());

        dispatch(
            &registry,
            &conn,
            &mut session,
            ClientEvent::LeaveRoom {
                room_id: RoomId::from("r1"),
                user_id: UserId::from("a"),
            },
        )
        .await;
        assert!(session.is_none());

        let meta = registry.room_meta(RoomId::from("r1")).await.unwrap();
        assert!(!meta.exists);
    }
}
