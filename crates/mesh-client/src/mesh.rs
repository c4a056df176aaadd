//! Room-level mesh orchestration.
//!
//! One [`MeshOrchestrator`] per joined room. It owns the session map
//! (peer id to [`SessionCoordinator`]), assigns negotiation roles, and
//! routes every inbound server event to the right session. Role
//! assignment is what keeps the mesh converging without a central
//! scheduler: the joiner initiates toward everyone already present,
//! and existing members respond to the newcomer, so each pair gets
//! exactly one designated first-offerer.
//!
//! Failure scoping: a negotiation failure on one pair gets one fresh
//! connection and retry; a second failure marks that pair failed and
//! leaves the rest of the mesh alone. Only `RoomClosed`, a fatal
//! server error, or an explicit leave tear the whole session down.

use crate::coordinator::{IceRecovery, NegotiationRole, SessionCoordinator, SignalingPhase};
use crate::errors::ClientError;
use crate::media::{LocalMedia, MediaKind};
use crate::peer::{IceCandidateInit, PeerConnectionFactory};
use crate::signaling::SignalingSender;

use common::protocol::{ClientEvent, ErrorCode, ServerEvent};
use common::types::{RoomId, UserId, VideoQuality};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Why the local session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// We left on purpose.
    Left,
    /// The server closed the room.
    RoomClosed,
    /// The room password did not match.
    AuthFailed,
}

/// Events surfaced to the embedding application.
#[derive(Debug, Clone, PartialEq)]
pub enum MeshEvent {
    /// A pairwise session reached `Stable` for the first time.
    PeerConnected { peer_id: UserId },
    /// A peer left; their session was torn down.
    PeerLeft { peer_id: UserId },
    /// A peer toggled their microphone.
    PeerMicState { peer_id: UserId, muted: bool },
    /// A chat line relayed through the room.
    Chat {
        from_id: UserId,
        display_name: String,
        text: String,
        ts: i64,
    },
    /// One pairwise session failed terminally; the rest of the mesh is
    /// unaffected.
    ConnectionFailed { peer_id: UserId },
    /// A non-fatal server error (bad request, password challenge).
    ServerError { error: ErrorCode },
    /// The whole local session ended; capture was released.
    SessionEnded { reason: EndReason },
}

struct SessionEntry {
    coordinator: SessionCoordinator,
    /// One fresh-connection retry has been spent.
    retried: bool,
    /// `PeerConnected` already emitted for this session.
    announced: bool,
}

/// Owns the per-room session map and drives it from server events.
pub struct MeshOrchestrator {
    local_id: UserId,
    display_name: String,
    room_id: Option<RoomId>,
    factory: Box<dyn PeerConnectionFactory>,
    media: LocalMedia,
    signals: Arc<dyn SignalingSender>,
    sessions: HashMap<UserId, SessionEntry>,
    events: tokio::sync::mpsc::UnboundedSender<MeshEvent>,
}

impl MeshOrchestrator {
    /// Build an orchestrator and the event stream the application
    /// consumes.
    #[must_use]
    pub fn new(
        local_id: UserId,
        display_name: impl Into<String>,
        factory: Box<dyn PeerConnectionFactory>,
        media: LocalMedia,
        signals: Arc<dyn SignalingSender>,
    ) -> (Self, tokio::sync::mpsc::UnboundedReceiver<MeshEvent>) {
        let (events, receiver) = tokio::sync::mpsc::unbounded_channel();
        (
            Self {
                local_id,
                display_name: display_name.into(),
                room_id: None,
                factory,
                media,
                signals,
                sessions: HashMap::new(),
                events,
            },
            receiver,
        )
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn session_phase(&self, peer_id: &UserId) -> Option<SignalingPhase> {
        self.sessions.get(peer_id).map(|e| e.coordinator.phase())
    }

    /// Join a room. The capture device is acquired *before* the join
    /// is announced: if the camera is unavailable there is nothing to
    /// offer and no peer connection is ever attempted.
    pub async fn join(
        &mut self,
        room_id: RoomId,
        password: Option<String>,
        video_quality: Option<VideoQuality>,
    ) -> Result<(), ClientError> {
        self.media.start(MediaKind::Camera).await?;
        self.signals
            .send(ClientEvent::JoinRoom {
                room_id,
                user_id: self.local_id.clone(),
                display_name: self.display_name.clone(),
                password,
                video_quality,
            })
            .await
    }

    /// Leave the room: announce it, then tear everything down locally.
    pub async fn leave(&mut self) -> Result<(), ClientError> {
        let Some(room_id) = self.room_id.clone() else {
            return Err(ClientError::NotJoined);
        };
        self.signals
            .send(ClientEvent::LeaveRoom {
                room_id,
                user_id: self.local_id.clone(),
            })
            .await?;
        self.teardown(EndReason::Left).await;
        Ok(())
    }

    /// Switch the outgoing video (camera/screen). The old track is
    /// stopped before the new device is opened, then the replacement
    /// fans out to every live session.
    pub async fn switch_media(&mut self, kind: MediaKind) -> Result<(), ClientError> {
        let track = self.media.switch(kind).await?;
        for (peer_id, entry) in &mut self.sessions {
            if let Err(e) = entry.coordinator.replace_track(track.clone()).await {
                warn!(
                    target: "mesh",
                    peer_id = %peer_id,
                    error = %e,
                    "track replacement failed on one session"
                );
            }
        }
        Ok(())
    }

    /// Announce a local microphone toggle to the room.
    pub async fn set_mic_muted(&mut self, muted: bool) -> Result<(), ClientError> {
        let Some(room_id) = self.room_id.clone() else {
            return Err(ClientError::NotJoined);
        };
        self.signals
            .send(ClientEvent::MicStateChanged {
                room_id,
                user_id: self.local_id.clone(),
                muted,
            })
            .await
    }

    /// Send a chat line to the room.
    pub async fn send_chat(&mut self, text: impl Into<String>, ts: i64) -> Result<(), ClientError> {
        let Some(room_id) = self.room_id.clone() else {
            return Err(ClientError::NotJoined);
        };
        self.signals
            .send(ClientEvent::ChatMessage {
                room_id,
                user_id: self.local_id.clone(),
                display_name: self.display_name.clone(),
                text: text.into(),
                ts,
            })
            .await
    }

    /// Route one server event. Called in order from the signaling
    /// receive loop; each call runs to completion before the next.
    pub async fn handle_server_event(&mut self, event: ServerEvent) -> Result<(), ClientError> {
        match event {
            ServerEvent::RoomJoined {
                participants,
                room_info,
            } => {
                info!(
                    target: "mesh",
                    room_id = %room_info.room_id,
                    existing = participants.len(),
                    "joined room"
                );
                self.room_id = Some(room_info.room_id);
                // The snapshot excludes us; we are the newcomer, so we
                // initiate toward every existing member.
                for participant in participants {
                    self.open_session(participant.user_id, NegotiationRole::Initiator)
                        .await;
                }
            }
            ServerEvent::UserJoined { user_id, .. } => {
                if user_id == self.local_id {
                    return Ok(());
                }
                // The newcomer will offer to us; we only respond.
                self.open_session(user_id, NegotiationRole::Responder).await;
            }
            ServerEvent::UserLeft { user_id } => {
                if let Some(mut entry) = self.sessions.remove(&user_id) {
                    entry.coordinator.close().await;
                    self.emit(MeshEvent::PeerLeft { peer_id: user_id });
                }
            }
            ServerEvent::OfferReceived { from_id, payload } => {
                self.route_description(&from_id, &payload, true).await;
            }
            ServerEvent::AnswerReceived { from_id, payload } => {
                self.route_description(&from_id, &payload, false).await;
            }
            ServerEvent::IceCandidateReceived { from_id, payload } => {
                match self.sessions.get_mut(&from_id) {
                    Some(entry) => {
                        if let Err(e) = entry.coordinator.on_remote_candidate(&payload).await {
                            // Candidates keep trickling; a bad one is
                            // not worth a session retry.
                            warn!(target: "mesh", peer_id = %from_id, error = %e, "candidate rejected");
                        }
                    }
                    None => {
                        debug!(target: "mesh", peer_id = %from_id, "candidate for unknown peer dropped");
                    }
                }
            }
            ServerEvent::PeerMicState { user_id, muted } => {
                self.emit(MeshEvent::PeerMicState {
                    peer_id: user_id,
                    muted,
                });
            }
            ServerEvent::ChatMessage {
                from_id,
                display_name,
                text,
                ts,
                ..
            } => {
                self.emit(MeshEvent::Chat {
                    from_id,
                    display_name,
                    text,
                    ts,
                });
            }
            ServerEvent::RoomClosed => {
                info!(target: "mesh", "room closed by server");
                self.teardown(EndReason::RoomClosed).await;
            }
            ServerEvent::Error { error } => {
                if error.is_fatal() {
                    warn!(target: "mesh", error = %error, "fatal server error");
                    self.teardown(EndReason::AuthFailed).await;
                } else {
                    self.emit(MeshEvent::ServerError { error });
                }
            }
        }
        Ok(())
    }

    /// Report an ICE failure on one session (wired from the transport's
    /// connection-state callback). One restart is attempted; a repeat
    /// failure ends that session only.
    pub async fn on_ice_failure(&mut self, peer_id: &UserId) {
        let Some(entry) = self.sessions.get_mut(peer_id) else {
            return;
        };
        match entry.coordinator.on_ice_failure().await {
            Ok(IceRecovery::Restarted) => {}
            Ok(IceRecovery::Failed) | Err(_) => {
                self.fail_session(peer_id).await;
            }
        }
    }

    /// Forward a locally gathered candidate for one session.
    pub async fn send_local_candidate(
        &mut self,
        peer_id: &UserId,
        candidate: &IceCandidateInit,
    ) -> Result<(), ClientError> {
        match self.sessions.get_mut(peer_id) {
            Some(entry) => entry.coordinator.send_local_candidate(candidate).await,
            None => Ok(()),
        }
    }

    /// Transport signalled renegotiation is needed on one session.
    pub async fn on_negotiation_needed(&mut self, peer_id: &UserId) {
        if let Some(entry) = self.sessions.get_mut(peer_id) {
            if let Err(e) = entry.coordinator.on_negotiation_needed().await {
                warn!(target: "mesh", peer_id = %peer_id, error = %e, "renegotiation failed");
            }
        }
    }

    async fn open_session(&mut self, peer_id: UserId, role: NegotiationRole) {
        // A rejoining peer replaces any stale session.
        if let Some(mut stale) = self.sessions.remove(&peer_id) {
            debug!(target: "mesh", peer_id = %peer_id, "replacing stale session");
            stale.coordinator.close().await;
        }
        match self.build_coordinator(&peer_id, role).await {
            Ok(coordinator) => {
                self.sessions.insert(
                    peer_id,
                    SessionEntry {
                        coordinator,
                        retried: false,
                        announced: false,
                    },
                );
            }
            Err(e) => {
                warn!(target: "mesh", peer_id = %peer_id, error = %e, "failed to open session");
                self.emit(MeshEvent::ConnectionFailed { peer_id });
            }
        }
    }

    async fn build_coordinator(
        &mut self,
        peer_id: &UserId,
        role: NegotiationRole,
    ) -> Result<SessionCoordinator, ClientError> {
        let Some(room_id) = self.room_id.clone() else {
            return Err(ClientError::NotJoined);
        };
        let connection = self.factory.create().await.map_err(|e| {
            ClientError::Negotiation {
                peer_id: peer_id.to_string(),
                message: e.to_string(),
            }
        })?;
        let mut coordinator = SessionCoordinator::new(
            room_id,
            peer_id.clone(),
            role,
            connection,
            Arc::clone(&self.signals),
        );
        if let Some(track) = self.media.current() {
            coordinator.attach_track(track.clone()).await?;
        }
        coordinator.start_negotiation().await?;
        Ok(coordinator)
    }

    async fn route_description(&mut self, from_id: &UserId, payload: &serde_json::Value, offer: bool) {
        let Some(entry) = self.sessions.get_mut(from_id) else {
            debug!(target: "mesh", peer_id = %from_id, "signal for unknown peer dropped");
            return;
        };
        let result = if offer {
            entry.coordinator.on_remote_offer(payload).await
        } else {
            entry.coordinator.on_remote_answer(payload).await
        };
        match result {
            Ok(()) => self.maybe_announce(from_id),
            Err(e) => {
                warn!(target: "mesh", peer_id = %from_id, error = %e, "description failed");
                self.retry_or_fail(from_id, payload, offer).await;
            }
        }
    }

    /// First description failure on a pair gets a fresh connection and
    /// a clean restart of that pair's negotiation; the second is
    /// terminal for the pair.
    ///
    /// A failed offer is replayed against the fresh coordinator so a
    /// responder pair still produces its answer. A failed answer is
    /// not: the rebuilt initiator has already sent a new offer, so the
    /// old answer no longer matches anything.
    async fn retry_or_fail(&mut self, peer_id: &UserId, payload: &serde_json::Value, offer: bool) {
        let Some(entry) = self.sessions.get_mut(peer_id) else {
            return;
        };
        if entry.retried {
            self.fail_session(peer_id).await;
            return;
        }
        let role = entry.coordinator.role();
        entry.coordinator.close().await;

        info!(target: "mesh", peer_id = %peer_id, "recreating failed session");
        match self.build_coordinator(peer_id, role).await {
            Ok(coordinator) => {
                if let Some(entry) = self.sessions.get_mut(peer_id) {
                    entry.coordinator = coordinator;
                    entry.retried = true;
                    entry.announced = false;
                }
                if offer {
                    let replay = if let Some(entry) = self.sessions.get_mut(peer_id) {
                        entry.coordinator.on_remote_offer(payload).await
                    } else {
                        return;
                    };
                    match replay {
                        Ok(()) => self.maybe_announce(peer_id),
                        Err(e) => {
                            warn!(target: "mesh", peer_id = %peer_id, error = %e, "replayed offer failed");
                            self.fail_session(peer_id).await;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(target: "mesh", peer_id = %peer_id, error = %e, "recreate failed");
                self.fail_session(peer_id).await;
            }
        }
    }

    async fn fail_session(&mut self, peer_id: &UserId) {
        if let Some(mut entry) = self.sessions.remove(peer_id) {
            entry.coordinator.close().await;
            self.emit(MeshEvent::ConnectionFailed {
                peer_id: peer_id.clone(),
            });
        }
    }

    fn maybe_announce(&mut self, peer_id: &UserId) {
        if let Some(entry) = self.sessions.get_mut(peer_id) {
            if entry.coordinator.phase() == SignalingPhase::Stable && !entry.announced {
                entry.announced = true;
                self.emit(MeshEvent::PeerConnected {
                    peer_id: peer_id.clone(),
                });
            }
        }
    }

    async fn teardown(&mut self, reason: EndReason) {
        for (_, mut entry) in self.sessions.drain() {
            entry.coordinator.close().await;
        }
        self.media.stop_all();
        self.room_id = None;
        self.emit(MeshEvent::SessionEnded { reason });
    }

    fn emit(&self, event: MeshEvent) {
        // The application may have dropped the receiver during
        // shutdown; there is nobody left to tell.
        let _ = self.events.send(event);
    }
}
