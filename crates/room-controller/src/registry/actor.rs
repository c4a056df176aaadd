//! `RoomRegistryActor` - single actor owning all room state.
//!
//! Every mutation executes to completion within one mailbox dispatch,
//! which serializes concurrent joins and leaves for the same room
//! without any locking. The handle is the only way in.

use super::messages::{
    JoinRequest, JoinSnapshot, RegistryMessage, RegistryStatus, RoomMeta,
};
use super::room::{Participant, Room};
use crate::config::Config;
use crate::errors::RegistryError;
use crate::observability;
use crate::slug;

use common::protocol::ServerEvent;
use common::types::{RoomId, RoomInfo, RoomSettings, UserId};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Mailbox capacity for the registry.
const REGISTRY_CHANNEL_BUFFER: usize = 256;

/// Handle to the room registry actor.
#[derive(Clone)]
pub struct RoomRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl RoomRegistryHandle {
    /// Spawn the registry actor and return a handle to it.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = RoomRegistryActor::new(config, receiver, cancel_token.clone());
        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Create a room with the given settings, hashing `password` when
    /// supplied. Returns the issued slug and stored settings.
    pub async fn create_room(
        &self,
        settings: RoomSettings,
        password: Option<String>,
    ) -> Result<RoomInfo, RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::CreateRoom {
                settings,
                password,
                respond_to: tx,
            })
            .await
            .map_err(|e| RegistryError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RegistryError::Internal(format!("response receive failed: {e}")))?
    }

    /// Non-mutating room metadata lookup.
    pub async fn room_meta(&self, room_id: RoomId) -> Result<RoomMeta, RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::RoomMeta {
                room_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| RegistryError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RegistryError::Internal(format!("response receive failed: {e}")))
    }

    /// Attempt to join a room, auto-creating it when missing.
    pub async fn join(&self, request: JoinRequest) -> Result<JoinSnapshot, RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::Join {
                request,
                respond_to: tx,
            })
            .await
            .map_err(|e| RegistryError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RegistryError::Internal(format!("response receive failed: {e}")))?
    }

    /// Remove a participant; deletes the room when it empties.
    pub async fn leave(&self, room_id: RoomId, user_id: UserId) -> Result<(), RegistryError> {
        self.sender
            .send(RegistryMessage::Leave { room_id, user_id })
            .await
            .map_err(|e| RegistryError::Internal(format!("channel send failed: {e}")))
    }

    /// Set or replace the room password. Callable by any current member;
    /// there is no ownership model (documented limitation).
    pub async fn set_password(
        &self,
        room_id: RoomId,
        user_id: UserId,
        password: String,
        hint: Option<String>,
    ) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::SetPassword {
                room_id,
                user_id,
                password,
                hint,
                respond_to: tx,
            })
            .await
            .map_err(|e| RegistryError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RegistryError::Internal(format!("response receive failed: {e}")))?
    }

    /// Remove the room password.
    pub async fn clear_password(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::ClearPassword {
                room_id,
                user_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| RegistryError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RegistryError::Internal(format!("response receive failed: {e}")))?
    }

    /// Evict every member and delete the room. Idempotent.
    pub async fn close_room(&self, room_id: RoomId) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::CloseRoom {
                room_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| RegistryError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RegistryError::Internal(format!("response receive failed: {e}")))
    }

    /// Forward a negotiation event to a named participant. Unknown
    /// room or target drops the message without error.
    pub async fn relay(
        &self,
        room_id: RoomId,
        from: UserId,
        target: UserId,
        event: ServerEvent,
    ) -> Result<(), RegistryError> {
        self.sender
            .send(RegistryMessage::Relay {
                room_id,
                from,
                target,
                event,
            })
            .await
            .map_err(|e| RegistryError::Internal(format!("channel send failed: {e}")))
    }

    /// Best-effort fanout of a side-channel event to everyone but the
    /// sender.
    pub async fn broadcast(
        &self,
        room_id: RoomId,
        from: UserId,
        event: ServerEvent,
    ) -> Result<(), RegistryError> {
        self.sender
            .send(RegistryMessage::Broadcast {
                room_id,
                from,
                event,
            })
            .await
            .map_err(|e| RegistryError::Internal(format!("channel send failed: {e}")))
    }

    /// Current room/participant counts.
    pub async fn status(&self) -> Result<RegistryStatus, RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::Status { respond_to: tx })
            .await
            .map_err(|e| RegistryError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RegistryError::Internal(format!("response receive failed: {e}")))
    }

    /// Shut the registry down; every room is closed with `room_closed`
    /// broadcast to its members.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The registry actor implementation.
pub struct RoomRegistryActor {
    config: Config,
    receiver: mpsc::Receiver<RegistryMessage>,
    cancel_token: CancellationToken,
    rooms: HashMap<RoomId, Room>,
    rng: StdRng,
}

impl RoomRegistryActor {
    fn new(
        config: Config,
        receiver: mpsc::Receiver<RegistryMessage>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            receiver,
            cancel_token,
            rooms: HashMap::new(),
            rng: StdRng::from_entropy(),
        }
    }

    #[instrument(skip_all, name = "registry.actor")]
    async fn run(mut self) {
        info!(target: "registry", "room registry started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(target: "registry", "room registry received cancellation signal");
                    self.close_all();
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message),
                        None => {
                            info!(target: "registry", "room registry channel closed, exiting");
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "registry",
            rooms_remaining = self.rooms.len(),
            "room registry stopped"
        );
    }

    fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::CreateRoom {
                settings,
                password,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_create_room(settings, password));
            }
            RegistryMessage::RoomMeta {
                room_id,
                respond_to,
            } => {
                let meta = match self.rooms.get(&room_id) {
                    Some(room) => RoomMeta {
                        room_id,
                        exists: true,
                        settings: Some(room.settings.clone()),
                    },
                    None => RoomMeta {
                        room_id,
                        exists: false,
                        settings: None,
                    },
                };
                let _ = respond_to.send(meta);
            }
            RegistryMessage::Join {
                request,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_join(request));
            }
            RegistryMessage::Leave { room_id, user_id } => {
                self.handle_leave(&room_id, &user_id);
            }
            RegistryMessage::SetPassword {
                room_id,
                user_id,
                password,
                hint,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_set_password(&room_id, &user_id, &password, hint));
            }
            RegistryMessage::ClearPassword {
                room_id,
                user_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_clear_password(&room_id, &user_id));
            }
            RegistryMessage::CloseRoom {
                room_id,
                respond_to,
            } => {
                self.handle_close_room(&room_id);
                let _ = respond_to.send(());
            }
            RegistryMessage::Relay {
                room_id,
                from,
                target,
                event,
            } => {
                self.handle_relay(&room_id, &from, &target, event);
            }
            RegistryMessage::Broadcast {
                room_id,
                from,
                event,
            } => {
                self.handle_broadcast(&room_id, &from, event);
            }
            RegistryMessage::Status { respond_to } => {
                let _ = respond_to.send(RegistryStatus {
                    rooms: self.rooms.len(),
                    participants: self.rooms.values().map(|r| r.participants.len()).sum(),
                });
            }
        }
    }

    fn handle_create_room(
        &mut self,
        mut settings: RoomSettings,
        password: Option<String>,
    ) -> Result<RoomInfo, RegistryError> {
        let password = password.filter(|p| !p.is_empty());
        if settings.password_enabled && password.is_none() {
            return Err(RegistryError::BadRequest(
                "password_enabled requires a non-empty password".to_string(),
            ));
        }
        if !settings.password_enabled {
            settings.password_hint = None;
        }

        let password_hash = match (settings.password_enabled, password) {
            (true, Some(pw)) => Some(
                bcrypt::hash(pw, self.config.bcrypt_cost)
                    .map_err(|e| RegistryError::Internal(format!("password hashing failed: {e}")))?,
            ),
            _ => None,
        };

        let room_id = self.issue_slug()?;
        let room = Room::new(room_id.clone(), settings, password_hash);
        let info = room.info();
        self.rooms.insert(room_id.clone(), room);

        info!(
            target: "registry",
            room_id = %room_id,
            password_enabled = info.settings.password_enabled,
            "room created"
        );
        observability::record_room_created();
        self.record_occupancy();

        Ok(info)
    }

    /// Pick a slug the registry does not already know. The slug space is
    /// intentionally small, so collisions are expected and retried.
    fn issue_slug(&mut self) -> Result<RoomId, RegistryError> {
        for _ in 0..self.config.slug_retries.max(1) {
            let candidate = RoomId::new(slug::generate(&mut self.rng));
            if !self.rooms.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
        Err(RegistryError::Internal(
            "exhausted slug retries; registry unusually full".to_string(),
        ))
    }

    fn handle_join(&mut self, request: JoinRequest) -> Result<JoinSnapshot, RegistryError> {
        if !request.room_id.is_valid() || !request.user_id.is_valid() {
            return Err(RegistryError::BadRequest(
                "room_id and user_id must be non-empty".to_string(),
            ));
        }
        if request.display_name.trim().is_empty() {
            return Err(RegistryError::BadRequest(
                "display_name must be non-empty".to_string(),
            ));
        }

        // Joining a room nobody has created yet brings it into existence
        // with default settings. Deliberate: rooms are URL-addressed and
        // the first visitor should not need a separate create step.
        if !self.rooms.contains_key(&request.room_id) {
            let settings = RoomSettings {
                video_quality: request
                    .video_quality
                    .unwrap_or(self.config.default_video_quality),
                password_enabled: false,
                password_hint: None,
            };
            info!(
                target: "registry",
                room_id = %request.room_id,
                "auto-creating room on join"
            );
            self.rooms.insert(
                request.room_id.clone(),
                Room::new(request.room_id.clone(), settings, None),
            );
            observability::record_room_created();
        }

        let Some(room) = self.rooms.get_mut(&request.room_id) else {
            return Err(RegistryError::Internal(
                "room vanished during join".to_string(),
            ));
        };

        // Verification runs before admission.
        room.verify_password(request.password.as_deref())?;

        if room.participants.contains_key(&request.user_id) {
            return Err(RegistryError::BadRequest(format!(
                "user id {} already present in room",
                request.user_id
            )));
        }

        let participants = room.snapshot();
        let room_info = room.info();

        let participant = Participant {
            user_id: request.user_id.clone(),
            display_name: request.display_name.clone(),
            mic_muted: false,
            connection: request.connection,
        };
        let joined_event = ServerEvent::UserJoined {
            user_id: participant.user_id.clone(),
            display_name: participant.display_name.clone(),
            mic_muted: participant.mic_muted,
        };
        room.participants
            .insert(request.user_id.clone(), participant);
        room.broadcast(Some(&request.user_id), &joined_event);

        info!(
            target: "registry",
            room_id = %request.room_id,
            user_id = %request.user_id,
            members = room.participants.len(),
            "participant joined"
        );
        self.record_occupancy();

        Ok(JoinSnapshot {
            participants,
            room_info,
        })
    }

    fn handle_leave(&mut self, room_id: &RoomId, user_id: &UserId) {
        let Some(room) = self.rooms.get_mut(room_id) else {
            debug!(target: "registry", room_id = %room_id, "leave for unknown room ignored");
            return;
        };

        if room.participants.remove(user_id).is_none() {
            debug!(
                target: "registry",
                room_id = %room_id,
                user_id = %user_id,
                "leave for unknown participant ignored"
            );
            return;
        }

        room.broadcast(
            None,
            &ServerEvent::UserLeft {
                user_id: user_id.clone(),
            },
        );

        info!(
            target: "registry",
            room_id = %room_id,
            user_id = %user_id,
            members = room.participants.len(),
            "participant left"
        );

        if room.participants.is_empty() {
            self.rooms.remove(room_id);
            info!(target: "registry", room_id = %room_id, "empty room deleted");
        }
        self.record_occupancy();
    }

    fn handle_set_password(
        &mut self,
        room_id: &RoomId,
        user_id: &UserId,
        password: &str,
        hint: Option<String>,
    ) -> Result<(), RegistryError> {
        if password.is_empty() {
            return Err(RegistryError::BadRequest(
                "password must be non-empty".to_string(),
            ));
        }
        let cost = self.config.bcrypt_cost;
        let room = self.member_room(room_id, user_id)?;
        let hash = bcrypt::hash(password, cost)
            .map_err(|e| RegistryError::Internal(format!("password hashing failed: {e}")))?;
        room.password_hash = Some(hash);
        room.settings.password_enabled = true;
        room.settings.password_hint = hint;
        info!(target: "registry", room_id = %room_id, "room password set");
        Ok(())
    }

    fn handle_clear_password(
        &mut self,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<(), RegistryError> {
        let room = self.member_room(room_id, user_id)?;
        room.password_hash = None;
        room.settings.password_enabled = false;
        room.settings.password_hint = None;
        info!(target: "registry", room_id = %room_id, "room password cleared");
        Ok(())
    }

    /// Look up a room, requiring that `user_id` is a current member.
    /// Any member may change the password; that is the entire access
    /// model.
    fn member_room(
        &mut self,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<&mut Room, RegistryError> {
        let room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| RegistryError::RoomNotFound(room_id.to_string()))?;
        if !room.participants.contains_key(user_id) {
            return Err(RegistryError::BadRequest(format!(
                "user {user_id} is not a member of room {room_id}"
            )));
        }
        Ok(room)
    }

    fn handle_close_room(&mut self, room_id: &RoomId) {
        if let Some(room) = self.rooms.remove(room_id) {
            room.broadcast(None, &ServerEvent::RoomClosed);
            info!(
                target: "registry",
                room_id = %room_id,
                evicted = room.participants.len(),
                "room closed"
            );
            self.record_occupancy();
        }
    }

    fn handle_relay(
        &mut self,
        room_id: &RoomId,
        from: &UserId,
        target: &UserId,
        event: ServerEvent,
    ) {
        let Some(room) = self.rooms.get(room_id) else {
            debug!(target: "relay", room_id = %room_id, "relay to unknown room dropped");
            observability::record_relay_dropped();
            return;
        };
        if !room.participants.contains_key(from) {
            debug!(
                target: "relay",
                room_id = %room_id,
                from = %from,
                "relay from non-member dropped"
            );
            observability::record_relay_dropped();
            return;
        }
        let Some(recipient) = room.participants.get(target) else {
            // Known race: target may have left while the message was in
            // flight. Best-effort policy is to drop, never to error.
            debug!(
                target: "relay",
                room_id = %room_id,
                target = %target,
                "relay to unknown target dropped"
            );
            observability::record_relay_dropped();
            return;
        };

        if recipient.connection.send(event).is_err() {
            warn!(
                target: "relay",
                room_id = %room_id,
                target = %target,
                "relay to closed connection dropped"
            );
            observability::record_relay_dropped();
            return;
        }
        observability::record_relay_forwarded();
    }

    fn handle_broadcast(&mut self, room_id: &RoomId, from: &UserId, event: ServerEvent) {
        let Some(room) = self.rooms.get_mut(room_id) else {
            debug!(target: "relay", room_id = %room_id, "broadcast to unknown room dropped");
            return;
        };
        if !room.participants.contains_key(from) {
            return;
        }

        // Mic state is the one side-channel the registry mirrors into
        // membership, so late joiners see current mute flags.
        if let ServerEvent::PeerMicState { user_id, muted } = &event {
            if let Some(p) = room.participants.get_mut(user_id) {
                p.mic_muted = *muted;
            }
        }

        room.broadcast(Some(from), &event);
    }

    fn close_all(&mut self) {
        for (room_id, room) in self.rooms.drain() {
            room.broadcast(None, &ServerEvent::RoomClosed);
            debug!(target: "registry", room_id = %room_id, "room closed on shutdown");
        }
        self.record_occupancy();
    }

    fn record_occupancy(&self) {
        observability::record_occupancy(
            self.rooms.len(),
            self.rooms.values().map(|r| r.participants.len()).sum(),
        );
    }
}
