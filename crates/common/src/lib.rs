//! Shared types for Huddle components.
//!
//! This crate defines everything the server and client must agree on:
//!
//! - [`types`] - Identifiers, room settings, participant records
//! - [`protocol`] - The real-time channel event enums and error codes
//!
//! The wire format is JSON with internally tagged enums; event names
//! match the channel protocol (`join_room`, `room_joined`, `offer`,
//! `offer_received`, ...). Negotiation payloads (session descriptions,
//! ICE candidates) are carried as opaque `serde_json::Value`s - the
//! server forwards them without interpreting their contents.

pub mod protocol;
pub mod types;

pub use protocol::{ClientEvent, ErrorCode, ServerEvent};
pub use types::{ParticipantInfo, RoomId, RoomInfo, RoomSettings, UserId, VideoQuality};
