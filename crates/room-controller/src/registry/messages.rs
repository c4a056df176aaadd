//! Messages understood by the registry actor and their reply types.

use crate::errors::RegistryError;
use common::protocol::ServerEvent;
use common::types::{ParticipantInfo, RoomId, RoomInfo, RoomSettings, UserId, VideoQuality};
use tokio::sync::{mpsc, oneshot};

/// A participant's live connection: the sending half of its WebSocket
/// task's event queue. A closed handle means the peer is already gone;
/// sends to it are silently dropped.
pub type ConnectionHandle = mpsc::UnboundedSender<ServerEvent>;

/// Parameters for a join attempt.
#[derive(Debug)]
pub struct JoinRequest {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub display_name: String,
    pub password: Option<String>,
    /// Applied only when the join auto-creates the room.
    pub video_quality: Option<VideoQuality>,
    pub connection: ConnectionHandle,
}

/// Successful join: the membership as it was before this participant
/// was admitted (the joiner is the negotiation initiator toward each
/// of these), plus room metadata.
#[derive(Debug, Clone)]
pub struct JoinSnapshot {
    pub participants: Vec<ParticipantInfo>,
    pub room_info: RoomInfo,
}

/// Non-authoritative room metadata. Missing rooms report `exists: false`
/// rather than an error.
#[derive(Debug, Clone)]
pub struct RoomMeta {
    pub room_id: RoomId,
    pub exists: bool,
    pub settings: Option<RoomSettings>,
}

/// Registry occupancy counts.
#[derive(Debug, Clone, Copy)]
pub struct RegistryStatus {
    pub rooms: usize,
    pub participants: usize,
}

/// Mailbox messages for the registry actor.
#[derive(Debug)]
pub enum RegistryMessage {
    CreateRoom {
        settings: RoomSettings,
        password: Option<String>,
        respond_to: oneshot::Sender<Result<RoomInfo, RegistryError>>,
    },
    RoomMeta {
        room_id: RoomId,
        respond_to: oneshot::Sender<RoomMeta>,
    },
    Join {
        request: JoinRequest,
        respond_to: oneshot::Sender<Result<JoinSnapshot, RegistryError>>,
    },
    Leave {
        room_id: RoomId,
        user_id: UserId,
    },
    SetPassword {
        room_id: RoomId,
        user_id: UserId,
        password: String,
        hint: Option<String>,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },
    ClearPassword {
        room_id: RoomId,
        user_id: UserId,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },
    CloseRoom {
        room_id: RoomId,
        respond_to: oneshot::Sender<()>,
    },
    /// Forward `event` to `target` if both room and target are live;
    /// otherwise drop silently. The relay never reports misses.
    Relay {
        room_id: RoomId,
        from: UserId,
        target: UserId,
        event: ServerEvent,
    },
    /// Best-effort side-channel fanout to every member except `from`.
    Broadcast {
        room_id: RoomId,
        from: UserId,
        event: ServerEvent,
    },
    Status {
        respond_to: oneshot::Sender<RegistryStatus>,
    },
}
