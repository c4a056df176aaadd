//! Peer connection seam.
//!
//! The coordinator drives negotiation through this trait; the concrete
//! transport (a WebRTC stack in the real client, mocks in tests) lives
//! behind it. Implementations are expected to buffer remote candidates
//! that arrive before a remote description exists and apply them once
//! it does.

use crate::media::MediaTrack;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Transport-level failure from a peer connection operation.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct PeerError(pub String);

/// Which half of the description exchange a blob is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A session description as carried in negotiation payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

/// A proposed network path; keeps arriving after the initial exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
}

/// Local negotiation state of the underlying connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalingState::Stable => "stable",
            SignalingState::HaveLocalOffer => "have-local-offer",
            SignalingState::HaveRemoteOffer => "have-remote-offer",
            SignalingState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// One media connection to one remote peer.
#[async_trait]
pub trait PeerConnection: Send {
    /// Stable identity of the underlying connection object. Survives
    /// track replacement and ICE restart; changes only when the
    /// connection is recreated.
    fn connection_id(&self) -> &str;

    fn signaling_state(&self) -> SignalingState;

    async fn create_offer(&mut self) -> Result<SessionDescription, PeerError>;

    async fn create_answer(&mut self) -> Result<SessionDescription, PeerError>;

    async fn set_local_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), PeerError>;

    async fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), PeerError>;

    /// Discard a pending local offer (glare yield), returning the
    /// connection to `Stable`.
    async fn rollback_local(&mut self) -> Result<(), PeerError>;

    async fn add_remote_candidate(&mut self, candidate: IceCandidateInit)
        -> Result<(), PeerError>;

    /// Produce an offer that renegotiates connectivity only (ICE
    /// restart) without a full media-parameter redo.
    async fn restart_ice(&mut self) -> Result<SessionDescription, PeerError>;

    /// Swap the outgoing track on the existing sender. Must not change
    /// `connection_id`.
    async fn replace_outgoing_track(&mut self, track: MediaTrack) -> Result<(), PeerError>;

    async fn close(&mut self);
}

/// Creates peer connections; lets the orchestrator recreate a single
/// failed session without touching the rest of the mesh.
#[async_trait]
pub trait PeerConnectionFactory: Send {
    async fn create(&mut self) -> Result<Box<dyn PeerConnection>, PeerError>;
}
