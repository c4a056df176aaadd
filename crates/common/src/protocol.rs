//! Real-time channel protocol.
//!
//! Client-to-server events ([`ClientEvent`]) and server-to-client events
//! ([`ServerEvent`]) are internally tagged JSON objects. Negotiation
//! payloads are opaque [`serde_json::Value`]s; the relay forwards them
//! verbatim and only rewrites the envelope (`offer` becomes
//! `offer_received` with the sender's id attached).
//!
//! Errors are a closed tagged union ([`ErrorCode`]); each variant carries
//! only the fields it needs (the hint exists only on `AUTH_REQUIRED`).

use crate::types::{ParticipantInfo, RoomId, RoomInfo, UserId, VideoQuality};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events a client sends over the real-time channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinRoom {
        room_id: RoomId,
        user_id: UserId,
        display_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        video_quality: Option<VideoQuality>,
    },
    LeaveRoom {
        room_id: RoomId,
        user_id: UserId,
    },
    Offer {
        room_id: RoomId,
        target_id: UserId,
        payload: Value,
    },
    Answer {
        room_id: RoomId,
        target_id: UserId,
        payload: Value,
    },
    IceCandidate {
        room_id: RoomId,
        target_id: UserId,
        payload: Value,
    },
    MicStateChanged {
        room_id: RoomId,
        user_id: UserId,
        muted: bool,
    },
    ChatMessage {
        room_id: RoomId,
        user_id: UserId,
        display_name: String,
        text: String,
        ts: i64,
    },
    SetPassword {
        room_id: RoomId,
        password: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hint: Option<String>,
    },
    ClearPassword {
        room_id: RoomId,
    },
}

/// Events the server pushes to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    RoomJoined {
        participants: Vec<ParticipantInfo>,
        room_info: RoomInfo,
    },
    UserJoined {
        user_id: UserId,
        display_name: String,
        mic_muted: bool,
    },
    UserLeft {
        user_id: UserId,
    },
    OfferReceived {
        from_id: UserId,
        payload: Value,
    },
    AnswerReceived {
        from_id: UserId,
        payload: Value,
    },
    IceCandidateReceived {
        from_id: UserId,
        payload: Value,
    },
    PeerMicState {
        user_id: UserId,
        muted: bool,
    },
    ChatMessage {
        room_id: RoomId,
        from_id: UserId,
        display_name: String,
        text: String,
        ts: i64,
    },
    RoomClosed,
    Error {
        #[serde(flatten)]
        error: ErrorCode,
    },
}

/// Closed set of error signals surfaced to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed or out-of-order request.
    #[error("bad request: {message}")]
    BadRequest { message: String },
    /// The room requires a password and none was supplied.
    #[error("password required")]
    AuthRequired {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hint: Option<String>,
    },
    /// The supplied password did not match.
    #[error("password incorrect")]
    AuthFailed,
}

impl ErrorCode {
    /// Fatal errors end the whole local session; everything else is
    /// scoped to the operation that failed.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorCode::AuthFailed)
    }
}
