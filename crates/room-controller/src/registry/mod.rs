//! Room registry actor.
//!
//! The registry exclusively owns every `Room` and `Participant` record
//! for the process lifetime. It is an explicitly constructed instance
//! with a defined construction point ([`RoomRegistryHandle::new`]) and
//! teardown point (cancellation), never an ambient global.

mod actor;
mod messages;
mod room;

pub use actor::RoomRegistryHandle;
pub use messages::{ConnectionHandle, JoinRequest, JoinSnapshot, RegistryStatus, RoomMeta};
