//! Test doubles: scripted peer connections, media sources, and signal
//! collectors.
//!
//! Available to this crate's own tests and, behind the `test-utils`
//! feature, to consumers wiring a mesh against a real registry.

use crate::errors::ClientError;
use crate::media::{MediaKind, MediaSource, MediaTrack};
use crate::peer::{
    IceCandidateInit, PeerConnection, PeerConnectionFactory, PeerError, SdpKind,
    SessionDescription, SignalingState,
};
use crate::signaling::SignalingSender;

use async_trait::async_trait;
use common::protocol::ClientEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Shared inner state of a [`MockPeerConnection`].
#[derive(Debug, Default)]
pub struct MockPcState {
    pub local_description: Option<SessionDescription>,
    pub remote_description: Option<SessionDescription>,
    pub remote_candidates: Vec<IceCandidateInit>,
    pub outgoing_track: Option<MediaTrack>,
    pub replaced_tracks: Vec<String>,
    pub offers_created: u32,
    pub answers_created: u32,
    pub rollbacks: u32,
    pub ice_restarts: u32,
    pub closed: bool,
    pub fail_remote_descriptions: u32,
}

/// A peer connection whose behavior is fully scripted. Clones share
/// state, so tests can keep a probe handle while the coordinator owns
/// the boxed connection.
#[derive(Debug, Clone)]
pub struct MockPeerConnection {
    id: String,
    state: Arc<Mutex<MockPcState>>,
}

#[allow(clippy::unwrap_used)]
impl MockPeerConnection {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Arc::new(Mutex::new(MockPcState::default())),
        }
    }

    /// Inspect shared state.
    pub fn with_state<T>(&self, f: impl FnOnce(&MockPcState) -> T) -> T {
        f(&self.state.lock().unwrap())
    }

    /// Make the next `n` `set_remote_description` calls fail.
    pub fn fail_next_remote_descriptions(&self, n: u32) {
        self.state.lock().unwrap().fail_remote_descriptions = n;
    }

    fn derived_signaling_state(state: &MockPcState) -> SignalingState {
        if state.closed {
            return SignalingState::Closed;
        }
        match (&state.local_description, &state.remote_description) {
            (Some(SessionDescription { kind: SdpKind::Offer, .. }), None) => {
                SignalingState::HaveLocalOffer
            }
            (None, Some(SessionDescription { kind: SdpKind::Offer, .. })) => {
                SignalingState::HaveRemoteOffer
            }
            _ => SignalingState::Stable,
        }
    }
}

#[async_trait]
#[allow(clippy::unwrap_used)]
impl PeerConnection for MockPeerConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn signaling_state(&self) -> SignalingState {
        let state = self.state.lock().unwrap();
        Self::derived_signaling_state(&state)
    }

    async fn create_offer(&mut self) -> Result<SessionDescription, PeerError> {
        let mut state = self.state.lock().unwrap();
        state.offers_created += 1;
        Ok(SessionDescription {
            kind: SdpKind::Offer,
            sdp: format!("offer-{}-{}", self.id, state.offers_created),
        })
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, PeerError> {
        let mut state = self.state.lock().unwrap();
        if state.remote_description.is_none() {
            return Err(PeerError("create_answer without remote offer".to_string()));
        }
        state.answers_created += 1;
        Ok(SessionDescription {
            kind: SdpKind::Answer,
            sdp: format!("answer-{}-{}", self.id, state.answers_created),
        })
    }

    async fn set_local_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), PeerError> {
        let mut state = self.state.lock().unwrap();
        if description.kind == SdpKind::Answer {
            // Answer completes the exchange; both sides settle.
            state.local_description = None;
            state.remote_description = None;
        } else {
            state.local_description = Some(description);
        }
        Ok(())
    }

    async fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), PeerError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_remote_descriptions > 0 {
            state.fail_remote_descriptions -= 1;
            return Err(PeerError("scripted remote-description failure".to_string()));
        }
        if description.kind == SdpKind::Answer {
            state.local_description = None;
            state.remote_description = None;
        } else {
            state.remote_description = Some(description);
        }
        Ok(())
    }

    async fn rollback_local(&mut self) -> Result<(), PeerError> {
        let mut state = self.state.lock().unwrap();
        state.rollbacks += 1;
        state.local_description = None;
        Ok(())
    }

    async fn add_remote_candidate(
        &mut self,
        candidate: IceCandidateInit,
    ) -> Result<(), PeerError> {
        // Real transports buffer pre-description candidates; the mock
        // just records everything.
        self.state.lock().unwrap().remote_candidates.push(candidate);
        Ok(())
    }

    async fn restart_ice(&mut self) -> Result<SessionDescription, PeerError> {
        let mut state = self.state.lock().unwrap();
        state.ice_restarts += 1;
        let offer = SessionDescription {
            kind: SdpKind::Offer,
            sdp: format!("ice-restart-{}-{}", self.id, state.ice_restarts),
        };
        state.local_description = Some(offer.clone());
        Ok(offer)
    }

    async fn replace_outgoing_track(&mut self, track: MediaTrack) -> Result<(), PeerError> {
        let mut state = self.state.lock().unwrap();
        state.replaced_tracks.push(track.id().to_string());
        state.outgoing_track = Some(track);
        Ok(())
    }

    async fn close(&mut self) {
        self.state.lock().unwrap().closed = true;
    }
}

/// Factory producing [`MockPeerConnection`]s with sequential ids; keeps
/// a probe handle to every connection it created.
#[derive(Debug, Clone, Default)]
pub struct MockPeerFactory {
    counter: Arc<AtomicU64>,
    created: Arc<Mutex<Vec<MockPeerConnection>>>,
}

#[allow(clippy::unwrap_used)]
impl MockPeerFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All connections created so far, oldest first.
    #[must_use]
    pub fn created(&self) -> Vec<MockPeerConnection> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
#[allow(clippy::unwrap_used)]
impl PeerConnectionFactory for MockPeerFactory {
    async fn create(&mut self) -> Result<Box<dyn PeerConnection>, PeerError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let connection = MockPeerConnection::new(format!("pc-{n}"));
        self.created.lock().unwrap().push(connection.clone());
        Ok(Box::new(connection))
    }
}

/// Media source handing out sequentially numbered tracks. On every
/// acquire it records whether the previously issued track had already
/// been stopped, making the stop-before-acquire ordering observable.
#[derive(Debug, Clone, Default)]
pub struct MockMediaSource {
    counter: Arc<AtomicU64>,
    log: Arc<Mutex<Vec<String>>>,
    last_issued: Arc<Mutex<Option<MediaTrack>>>,
    fail_next: Arc<AtomicU64>,
}

#[allow(clippy::unwrap_used)]
impl MockMediaSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquisition log, entries like `acquire camera-1 prev_live=false`.
    #[must_use]
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Make the next `n` acquisitions fail (capability error).
    pub fn fail_next(&self, n: u64) {
        self.fail_next.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
#[allow(clippy::unwrap_used)]
impl MediaSource for MockMediaSource {
    async fn acquire(&mut self, kind: MediaKind) -> Result<MediaTrack, ClientError> {
        let failures = self.fail_next.load(Ordering::SeqCst);
        if failures > 0 {
            self.fail_next.store(failures - 1, Ordering::SeqCst);
            return Err(ClientError::Capability(
                "capture device unavailable".to_string(),
            ));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let track = MediaTrack::new(format!("{kind}-{n}"), kind);

        let mut last = self.last_issued.lock().unwrap();
        let entry = match last.as_ref() {
            Some(prev) => format!("acquire {} prev_live={}", track.id(), prev.is_live()),
            None => format!("acquire {} prev_live=none", track.id()),
        };
        self.log.lock().unwrap().push(entry);
        *last = Some(track.clone());

        Ok(track)
    }
}

/// Signal sink that hands every event to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSignals {
    sender: mpsc::UnboundedSender<ClientEvent>,
}

impl ChannelSignals {
    #[must_use]
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ClientEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Arc::new(Self { sender }), receiver)
    }
}

#[async_trait]
impl SignalingSender for ChannelSignals {
    async fn send(&self, event: ClientEvent) -> Result<(), ClientError> {
        self.sender
            .send(event)
            .map_err(|e| ClientError::Signaling(format!("collector closed: {e}")))
    }
}
