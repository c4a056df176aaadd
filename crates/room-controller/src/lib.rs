//! Huddle Room Controller
//!
//! Single-process server owning room lifecycle and relaying negotiation
//! traffic between room members:
//!
//! - Room registry: room creation, password gating, membership, slug
//!   issuance, empty-room deletion
//! - Signaling relay: forwards offer/answer/candidate payloads between
//!   named participants without interpreting them
//! - Side channels: best-effort mic-state and chat fanout
//!
//! # Architecture
//!
//! A single registry actor owns every `Room` record and processes one
//! mutation at a time, so concurrent joins and leaves for the same room
//! are serialized by construction - no locking anywhere. WebSocket
//! connection tasks and REST handlers talk to it through a clonable
//! [`registry::RoomRegistryHandle`].
//!
//! State lives in process memory only; rooms vanish on restart.
//!
//! # Modules
//!
//! - [`registry`] - the room/participant registry actor
//! - [`relay`] - dispatch of channel events onto the registry
//! - [`ws`] - WebSocket connection lifecycle
//! - [`http`] - REST surface and router assembly
//! - [`config`] - service configuration from environment
//! - [`errors`] - registry error taxonomy
//! - [`observability`] - health state and metric recording

pub mod config;
pub mod errors;
pub mod http;
pub mod observability;
pub mod registry;
pub mod relay;
pub mod slug;
pub mod ws;
