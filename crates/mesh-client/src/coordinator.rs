//! Per-peer session coordination.
//!
//! A [`SessionCoordinator`] owns exactly one peer connection and drives
//! its negotiation lifecycle against one remote peer: the initial
//! offer/answer exchange, trickled candidates, simultaneous-offer
//! (glare) resolution, a single ICE restart attempt, and mid-call
//! track replacement. It never talks to other coordinators; the
//! orchestrator routes inbound signals to it by peer id.
//!
//! Glare policy is fixed and role-independent: whenever a remote offer
//! arrives while our own offer is pending, we roll our offer back and
//! answer theirs. Both sides of a glare do this, both answers land on
//! connections that are back in `Stable`, and the leftover answers to
//! the rolled-back offers are discarded by the phase gate in
//! [`SessionCoordinator::on_remote_answer`].

use crate::errors::ClientError;
use crate::media::MediaTrack;
use crate::peer::{IceCandidateInit, PeerConnection, PeerError, SessionDescription};
use crate::signaling::SignalingSender;

use common::protocol::ClientEvent;
use common::types::{RoomId, UserId};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which side of the pair sends the first offer. The joiner initiates
/// toward everyone already in the room; existing members respond.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    Initiator,
    Responder,
}

impl fmt::Display for NegotiationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NegotiationRole::Initiator => f.write_str("initiator"),
            NegotiationRole::Responder => f.write_str("responder"),
        }
    }
}

/// Lifecycle phase of a pairwise session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingPhase {
    /// Created, no description exchanged yet.
    New,
    /// An offer is in flight (ours or a renegotiation).
    Negotiating,
    /// Offer/answer complete; media can flow.
    Stable,
    /// Torn down; all inbound signals are ignored.
    Closed,
}

impl fmt::Display for SignalingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalingPhase::New => "new",
            SignalingPhase::Negotiating => "negotiating",
            SignalingPhase::Stable => "stable",
            SignalingPhase::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Outcome of an ICE failure report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceRecovery {
    /// A restart offer was sent; the session is renegotiating.
    Restarted,
    /// The single restart attempt was already spent. The session is
    /// terminally failed and should be surfaced as such.
    Failed,
}

/// Drives one peer connection through its negotiation lifecycle.
pub struct SessionCoordinator {
    room_id: RoomId,
    remote_id: UserId,
    role: NegotiationRole,
    phase: SignalingPhase,
    restart_attempted: bool,
    connection: Box<dyn PeerConnection>,
    signals: Arc<dyn SignalingSender>,
}

impl SessionCoordinator {
    #[must_use]
    pub fn new(
        room_id: RoomId,
        remote_id: UserId,
        role: NegotiationRole,
        connection: Box<dyn PeerConnection>,
        signals: Arc<dyn SignalingSender>,
    ) -> Self {
        Self {
            room_id,
            remote_id,
            role,
            phase: SignalingPhase::New,
            restart_attempted: false,
            connection,
            signals,
        }
    }

    #[must_use]
    pub fn remote_id(&self) -> &UserId {
        &self.remote_id
    }

    #[must_use]
    pub fn role(&self) -> NegotiationRole {
        self.role
    }

    #[must_use]
    pub fn phase(&self) -> SignalingPhase {
        self.phase
    }

    /// Identity of the underlying connection. Stable across track
    /// replacement and ICE restart.
    #[must_use]
    pub fn connection_id(&self) -> &str {
        self.connection.connection_id()
    }

    /// Put the local outgoing track on the connection's sender. Done
    /// before the first offer so the initial description carries media.
    pub async fn attach_track(&mut self, track: MediaTrack) -> Result<(), ClientError> {
        self.connection
            .replace_outgoing_track(track)
            .await
            .map_err(|e| self.negotiation_error(e))
    }

    /// Kick off the first offer. Only meaningful for the initiator; the
    /// responder waits for the remote offer.
    pub async fn start_negotiation(&mut self) -> Result<(), ClientError> {
        if self.role != NegotiationRole::Initiator {
            debug!(
                target: "coordinator",
                peer_id = %self.remote_id,
                "responder holds; waiting for remote offer"
            );
            return Ok(());
        }
        self.send_offer().await
    }

    /// The transport wants a renegotiation (new transceiver, parameter
    /// change). Only the initiator acts on it, and only from `Stable`;
    /// everything else would race an exchange already in flight.
    pub async fn on_negotiation_needed(&mut self) -> Result<(), ClientError> {
        if self.role != NegotiationRole::Initiator || self.phase != SignalingPhase::Stable {
            debug!(
                target: "coordinator",
                peer_id = %self.remote_id,
                role = %self.role,
                phase = %self.phase,
                "negotiation-needed ignored"
            );
            return Ok(());
        }
        self.send_offer().await
    }

    /// A remote offer arrived. If our own offer is pending this is
    /// glare: roll ours back unconditionally and answer theirs.
    pub async fn on_remote_offer(&mut self, payload: &Value) -> Result<(), ClientError> {
        if self.phase == SignalingPhase::Closed {
            debug!(target: "coordinator", peer_id = %self.remote_id, "offer after close ignored");
            return Ok(());
        }
        let offer = self.decode_description(payload)?;

        if self.phase == SignalingPhase::Negotiating {
            info!(
                target: "coordinator",
                peer_id = %self.remote_id,
                "glare: rolling back local offer to answer remote"
            );
            self.connection
                .rollback_local()
                .await
                .map_err(|e| self.negotiation_error(e))?;
        }

        self.connection
            .set_remote_description(offer)
            .await
            .map_err(|e| self.negotiation_error(e))?;
        let answer = self
            .connection
            .create_answer()
            .await
            .map_err(|e| self.negotiation_error(e))?;
        self.connection
            .set_local_description(answer.clone())
            .await
            .map_err(|e| self.negotiation_error(e))?;

        let payload = self.encode_description(&answer)?;
        self.signals
            .send(ClientEvent::Answer {
                room_id: self.room_id.clone(),
                target_id: self.remote_id.clone(),
                payload,
            })
            .await?;

        self.phase = SignalingPhase::Stable;
        self.restart_attempted = false;
        debug!(target: "coordinator", peer_id = %self.remote_id, "answered remote offer");
        Ok(())
    }

    /// A remote answer arrived. Applied only while an exchange is in
    /// flight; an answer landing in any other phase belongs to an offer
    /// we already rolled back or closed, and is dropped.
    pub async fn on_remote_answer(&mut self, payload: &Value) -> Result<(), ClientError> {
        if self.phase != SignalingPhase::Negotiating {
            debug!(
                target: "coordinator",
                peer_id = %self.remote_id,
                phase = %self.phase,
                "stale answer dropped"
            );
            return Ok(());
        }
        let answer = self.decode_description(payload)?;
        self.connection
            .set_remote_description(answer)
            .await
            .map_err(|e| self.negotiation_error(e))?;
        self.phase = SignalingPhase::Stable;
        self.restart_attempted = false;
        debug!(target: "coordinator", peer_id = %self.remote_id, "session stable");
        Ok(())
    }

    /// A trickled remote candidate arrived. The connection buffers
    /// candidates that precede the remote description.
    pub async fn on_remote_candidate(&mut self, payload: &Value) -> Result<(), ClientError> {
        if self.phase == SignalingPhase::Closed {
            return Ok(());
        }
        let candidate: IceCandidateInit = serde_json::from_value(payload.clone())
            .map_err(|e| self.negotiation_error(PeerError(format!("bad candidate: {e}"))))?;
        self.connection
            .add_remote_candidate(candidate)
            .await
            .map_err(|e| self.negotiation_error(e))
    }

    /// Forward a locally gathered candidate to the remote peer.
    pub async fn send_local_candidate(
        &mut self,
        candidate: &IceCandidateInit,
    ) -> Result<(), ClientError> {
        let payload = serde_json::to_value(candidate)
            .map_err(|e| self.negotiation_error(PeerError(format!("encode candidate: {e}"))))?;
        self.signals
            .send(ClientEvent::IceCandidate {
                room_id: self.room_id.clone(),
                target_id: self.remote_id.clone(),
                payload,
            })
            .await
    }

    /// Connectivity to the peer dropped. One ICE restart is attempted
    /// per stable period; a second failure before the session
    /// re-stabilizes is terminal.
    pub async fn on_ice_failure(&mut self) -> Result<IceRecovery, ClientError> {
        if self.phase == SignalingPhase::Closed {
            return Ok(IceRecovery::Failed);
        }
        if self.restart_attempted {
            warn!(
                target: "coordinator",
                peer_id = %self.remote_id,
                "ice failed again after restart; giving up"
            );
            return Ok(IceRecovery::Failed);
        }
        self.restart_attempted = true;
        info!(target: "coordinator", peer_id = %self.remote_id, "attempting ice restart");

        let offer = self
            .connection
            .restart_ice()
            .await
            .map_err(|e| self.negotiation_error(e))?;
        let payload = self.encode_description(&offer)?;
        self.signals
            .send(ClientEvent::Offer {
                room_id: self.room_id.clone(),
                target_id: self.remote_id.clone(),
                payload,
            })
            .await?;
        self.phase = SignalingPhase::Negotiating;
        Ok(IceRecovery::Restarted)
    }

    /// Swap the outgoing track on the existing sender, then renegotiate
    /// so the remote side picks up the new parameters. The connection
    /// identity does not change. Renegotiation is skipped while an
    /// exchange is already in flight; the replacement rides along with
    /// whatever description settles it.
    pub async fn replace_track(&mut self, track: MediaTrack) -> Result<(), ClientError> {
        if self.phase == SignalingPhase::Closed {
            return Ok(());
        }
        self.connection
            .replace_outgoing_track(track)
            .await
            .map_err(|e| self.negotiation_error(e))?;
        if self.phase == SignalingPhase::Stable {
            self.send_offer().await?;
        }
        Ok(())
    }

    /// Tear the session down. Idempotent; every later inbound signal is
    /// ignored.
    pub async fn close(&mut self) {
        if self.phase == SignalingPhase::Closed {
            return;
        }
        self.phase = SignalingPhase::Closed;
        self.connection.close().await;
        debug!(target: "coordinator", peer_id = %self.remote_id, "session closed");
    }

    async fn send_offer(&mut self) -> Result<(), ClientError> {
        let offer = self
            .connection
            .create_offer()
            .await
            .map_err(|e| self.negotiation_error(e))?;
        self.connection
            .set_local_description(offer.clone())
            .await
            .map_err(|e| self.negotiation_error(e))?;
        let payload = self.encode_description(&offer)?;
        self.signals
            .send(ClientEvent::Offer {
                room_id: self.room_id.clone(),
                target_id: self.remote_id.clone(),
                payload,
            })
            .await?;
        self.phase = SignalingPhase::Negotiating;
        debug!(target: "coordinator", peer_id = %self.remote_id, "offer sent");
        Ok(())
    }

    fn decode_description(&self, payload: &Value) -> Result<SessionDescription, ClientError> {
        serde_json::from_value(payload.clone())
            .map_err(|e| self.negotiation_error(PeerError(format!("bad description: {e}"))))
    }

    fn encode_description(&self, description: &SessionDescription) -> Result<Value, ClientError> {
        serde_json::to_value(description)
            .map_err(|e| self.negotiation_error(PeerError(format!("encode description: {e}"))))
    }

    fn negotiation_error(&self, source: PeerError) -> ClientError {
        ClientError::Negotiation {
            peer_id: self.remote_id.to_string(),
            message: source.to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::peer::SdpKind;
    use crate::testing::{ChannelSignals, MockPeerConnection};
    use common::protocol::ClientEvent;
    use tokio::sync::mpsc;

    fn coordinator(
        role: NegotiationRole,
    ) -> (
        SessionCoordinator,
        MockPeerConnection,
        mpsc::UnboundedReceiver<ClientEvent>,
    ) {
        let connection = MockPeerConnection::new("pc-1");
        let probe = connection.clone();
        let (signals, outbox) = ChannelSignals::new();
        let coordinator = SessionCoordinator::new(
            RoomId::from("r1"),
            UserId::from("bob"),
            role,
            Box::new(connection),
            signals,
        );
        (coordinator, probe, outbox)
    }

    fn description_payload(kind: SdpKind, sdp: &str) -> Value {
        serde_json::to_value(SessionDescription {
            kind,
            sdp: sdp.to_string(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn initiator_sends_first_offer() {
        let (mut session, probe, mut outbox) = coordinator(NegotiationRole::Initiator);
        session.start_negotiation().await.unwrap();

        assert_eq!(session.phase(), SignalingPhase::Negotiating);
        assert_eq!(probe.with_state(|s| s.offers_created), 1);
        match outbox.try_recv().unwrap() {
            ClientEvent::Offer { target_id, .. } => assert_eq!(target_id.as_str(), "bob"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn responder_never_offers_on_start() {
        let (mut session, probe, mut outbox) = coordinator(NegotiationRole::Responder);
        session.start_negotiation().await.unwrap();

        assert_eq!(session.phase(), SignalingPhase::New);
        assert_eq!(probe.with_state(|s| s.offers_created), 0);
        assert!(outbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn responder_answers_remote_offer() {
        let (mut session, probe, mut outbox) = coordinator(NegotiationRole::Responder);
        let offer = description_payload(SdpKind::Offer, "remote-offer");
        session.on_remote_offer(&offer).await.unwrap();

        assert_eq!(session.phase(), SignalingPhase::Stable);
        assert_eq!(probe.with_state(|s| s.answers_created), 1);
        assert_eq!(probe.with_state(|s| s.rollbacks), 0);
        match outbox.try_recv().unwrap() {
            ClientEvent::Answer { .. } => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn glare_rolls_back_local_offer_and_answers() {
        let (mut session, probe, mut outbox) = coordinator(NegotiationRole::Initiator);
        session.start_negotiation().await.unwrap();
        let _ = outbox.try_recv().unwrap(); // our offer

        let remote = description_payload(SdpKind::Offer, "remote-offer");
        session.on_remote_offer(&remote).await.unwrap();

        assert_eq!(session.phase(), SignalingPhase::Stable);
        assert_eq!(probe.with_state(|s| s.rollbacks), 1);
        assert_eq!(probe.with_state(|s| s.answers_created), 1);
        match outbox.try_recv().unwrap() {
            ClientEvent::Answer { .. } => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stale_answer_after_glare_is_dropped() {
        let (mut session, probe, mut outbox) = coordinator(NegotiationRole::Initiator);
        session.start_negotiation().await.unwrap();
        let _ = outbox.try_recv().unwrap();

        // Glare settles us to Stable.
        let remote = description_payload(SdpKind::Offer, "remote-offer");
        session.on_remote_offer(&remote).await.unwrap();
        assert_eq!(session.phase(), SignalingPhase::Stable);

        // The answer to our rolled-back offer arrives late; it must not
        // be applied to the connection.
        let before = probe.with_state(|s| s.remote_description.clone());
        let stale = description_payload(SdpKind::Answer, "stale-answer");
        session.on_remote_answer(&stale).await.unwrap();
        assert_eq!(session.phase(), SignalingPhase::Stable);
        assert_eq!(probe.with_state(|s| s.remote_description.clone()), before);
    }

    #[tokio::test]
    async fn answer_settles_negotiation() {
        let (mut session, _probe, mut outbox) = coordinator(NegotiationRole::Initiator);
        session.start_negotiation().await.unwrap();
        let _ = outbox.try_recv().unwrap();

        let answer = description_payload(SdpKind::Answer, "remote-answer");
        session.on_remote_answer(&answer).await.unwrap();
        assert_eq!(session.phase(), SignalingPhase::Stable);
    }

    #[tokio::test]
    async fn ice_restart_once_then_terminal() {
        let (mut session, probe, mut outbox) = coordinator(NegotiationRole::Initiator);
        session.start_negotiation().await.unwrap();
        let _ = outbox.try_recv().unwrap();
        let answer = description_payload(SdpKind::Answer, "remote-answer");
        session.on_remote_answer(&answer).await.unwrap();
        let id_before = session.connection_id().to_string();

        // First failure: restart offer goes out on the same connection.
        let outcome = session.on_ice_failure().await.unwrap();
        assert_eq!(outcome, IceRecovery::Restarted);
        assert_eq!(session.phase(), SignalingPhase::Negotiating);
        assert_eq!(session.connection_id(), id_before);
        assert_eq!(probe.with_state(|s| s.ice_restarts), 1);
        match outbox.try_recv().unwrap() {
            ClientEvent::Offer { .. } => {}
            other => panic!("unexpected event: {other:?}"),
        }

        // Second failure before re-stabilizing: terminal.
        let outcome = session.on_ice_failure().await.unwrap();
        assert_eq!(outcome, IceRecovery::Failed);
        assert_eq!(probe.with_state(|s| s.ice_restarts), 1);
    }

    #[tokio::test]
    async fn successful_restart_re_arms_recovery() {
        let (mut session, probe, mut outbox) = coordinator(NegotiationRole::Initiator);
        session.start_negotiation().await.unwrap();
        let _ = outbox.try_recv().unwrap();
        let answer = description_payload(SdpKind::Answer, "a1");
        session.on_remote_answer(&answer).await.unwrap();

        assert_eq!(session.on_ice_failure().await.unwrap(), IceRecovery::Restarted);
        let _ = outbox.try_recv().unwrap();

        // The restart negotiation completes; a later failure gets a
        // fresh restart attempt.
        let answer = description_payload(SdpKind::Answer, "a2");
        session.on_remote_answer(&answer).await.unwrap();
        assert_eq!(session.on_ice_failure().await.unwrap(), IceRecovery::Restarted);
        assert_eq!(probe.with_state(|s| s.ice_restarts), 2);
    }

    #[tokio::test]
    async fn replace_track_keeps_connection_and_renegotiates() {
        let (mut session, probe, mut outbox) = coordinator(NegotiationRole::Responder);
        let offer = description_payload(SdpKind::Offer, "remote-offer");
        session.on_remote_offer(&offer).await.unwrap();
        let _ = outbox.try_recv().unwrap();
        let id_before = session.connection_id().to_string();

        let track = MediaTrack::new("screen-1", crate::media::MediaKind::Screen);
        session.replace_track(track).await.unwrap();

        assert_eq!(session.connection_id(), id_before);
        assert_eq!(
            probe.with_state(|s| s.replaced_tracks.clone()),
            vec!["screen-1".to_string()]
        );
        // Even the responder renegotiates after a replacement.
        assert_eq!(session.phase(), SignalingPhase::Negotiating);
        match outbox.try_recv().unwrap() {
            ClientEvent::Offer { .. } => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn replace_track_mid_negotiation_skips_extra_offer() {
        let (mut session, probe, mut outbox) = coordinator(NegotiationRole::Initiator);
        session.start_negotiation().await.unwrap();
        let _ = outbox.try_recv().unwrap();

        let track = MediaTrack::new("camera-2", crate::media::MediaKind::Camera);
        session.replace_track(track).await.unwrap();

        assert_eq!(probe.with_state(|s| s.replaced_tracks.len()), 1);
        assert!(outbox.try_recv().is_err());
        assert_eq!(session.phase(), SignalingPhase::Negotiating);
    }

    #[tokio::test]
    async fn closed_session_ignores_everything() {
        let (mut session, probe, mut outbox) = coordinator(NegotiationRole::Responder);
        session.close().await;
        assert!(probe.with_state(|s| s.closed));

        let offer = description_payload(SdpKind::Offer, "late-offer");
        session.on_remote_offer(&offer).await.unwrap();
        let candidate = serde_json::json!({"candidate": "candidate:1"});
        session.on_remote_candidate(&candidate).await.unwrap();

        assert_eq!(session.phase(), SignalingPhase::Closed);
        assert_eq!(probe.with_state(|s| s.answers_created), 0);
        assert!(probe.with_state(|s| s.remote_candidates.is_empty()));
        assert!(outbox.try_recv().is_err());

        // Close is idempotent.
        session.close().await;
        assert_eq!(session.phase(), SignalingPhase::Closed);
    }

    #[tokio::test]
    async fn candidates_are_forwarded_both_ways() {
        let (mut session, probe, mut outbox) = coordinator(NegotiationRole::Initiator);

        let inbound = serde_json::json!({
            "candidate": "candidate:1 1 udp 2122260223 192.0.2.1 54400 typ host",
            "sdpMid": "0",
            "sdpMLineIndex": 0,
        });
        session.on_remote_candidate(&inbound).await.unwrap();
        assert_eq!(probe.with_state(|s| s.remote_candidates.len()), 1);

        let outbound = IceCandidateInit {
            candidate: "candidate:2".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        };
        session.send_local_candidate(&outbound).await.unwrap();
        match outbox.try_recv().unwrap() {
            ClientEvent::IceCandidate { payload, .. } => {
                assert_eq!(payload["candidate"], "candidate:2");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
