//! Huddle mesh client.
//!
//! Client-side session orchestration for a full-mesh call: every room
//! member holds one direct peer session with every other member. This
//! crate owns the two state machines that make that work:
//!
//! - [`coordinator::SessionCoordinator`] - one per remote peer, driving
//!   offer/answer/candidate exchange, glare resolution, ICE recovery
//!   and mid-call track replacement over a single peer connection
//! - [`mesh::MeshOrchestrator`] - reacts to room membership events,
//!   creating and destroying coordinators and assigning negotiation
//!   roles so the room converges on a connected mesh
//!
//! The actual media transport sits behind the [`peer::PeerConnection`]
//! trait; capture devices behind [`media::MediaSource`]. The
//! orchestrator never holds direct references into coordinators beyond
//! its own session map, and coordinators never reference the
//! orchestrator - all dispatch is by peer id through that map.
//!
//! # Concurrency model
//!
//! Everything here runs on one logical task: the embedding application
//! pumps server events into the orchestrator one at a time, and each
//! handler runs to completion before the next event is dispatched.
//! Results that arrive out of turn (an answer to an offer that was
//! rolled back, signals for a peer that already left) are discarded by
//! phase and membership checks rather than by locking.

pub mod coordinator;
pub mod errors;
pub mod media;
pub mod mesh;
pub mod peer;
pub mod signaling;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use coordinator::{NegotiationRole, SessionCoordinator, SignalingPhase};
pub use errors::ClientError;
pub use mesh::{EndReason, MeshEvent, MeshOrchestrator};
