//! Client error taxonomy.
//!
//! Recovery is local-first: negotiation errors are scoped to one
//! pairwise session (recreate and retry once), capability errors are
//! surfaced before any peer connection is attempted, and only
//! `AUTH_FAILED` / `ROOM_CLOSED` end the whole local session.

use thiserror::Error;

/// Errors surfaced by the mesh client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Capture device unavailable or media access blocked. Raised
    /// before any peer connection exists.
    #[error("media capability error: {0}")]
    Capability(String),

    /// A negotiation step failed on one pairwise session.
    #[error("negotiation error with {peer_id}: {message}")]
    Negotiation { peer_id: String, message: String },

    /// The signaling channel failed.
    #[error("signaling error: {0}")]
    Signaling(String),

    /// Attempted an operation that requires being in a room.
    #[error("not in a room")]
    NotJoined,
}
