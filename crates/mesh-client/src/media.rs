//! Local media capture management.
//!
//! The camera/microphone is one physical resource shared by every
//! pairwise session. [`LocalMedia`] owns the single current outgoing
//! track and enforces the switch order: stop the old track *before*
//! acquiring the replacement, so the device is never double-opened.
//! Fanning the replacement out to each session is the orchestrator's
//! job.

use crate::errors::ClientError;
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// What kind of outgoing video the track carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Camera,
    Screen,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Camera => f.write_str("camera"),
            MediaKind::Screen => f.write_str("screen"),
        }
    }
}

/// Handle to a live capture track. Clones share liveness: stopping any
/// clone stops the track everywhere it was fanned out.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    id: String,
    kind: MediaKind,
    live: Arc<AtomicBool>,
}

impl MediaTrack {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            kind,
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Release the underlying device.
    pub fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

/// Capture device seam: the real client talks to the platform media
/// stack, tests use [`crate::testing::MockMediaSource`].
#[async_trait]
pub trait MediaSource: Send {
    /// Open the device and produce a live track. Failing here is a
    /// capability error: no peer connection should be attempted after.
    async fn acquire(&mut self, kind: MediaKind) -> Result<MediaTrack, ClientError>;
}

/// Owner of the single current outgoing track.
pub struct LocalMedia {
    source: Box<dyn MediaSource>,
    current: Option<MediaTrack>,
}

impl LocalMedia {
    #[must_use]
    pub fn new(source: Box<dyn MediaSource>) -> Self {
        Self {
            source,
            current: None,
        }
    }

    #[must_use]
    pub fn current(&self) -> Option<&MediaTrack> {
        self.current.as_ref()
    }

    /// Acquire the initial track (idempotent per kind).
    pub async fn start(&mut self, kind: MediaKind) -> Result<MediaTrack, ClientError> {
        if let Some(track) = &self.current {
            if track.kind() == kind && track.is_live() {
                return Ok(track.clone());
            }
        }
        self.switch(kind).await
    }

    /// Replace the current track with a fresh capture of `kind`.
    /// Stop-before-acquire: the old device lock must be released first.
    pub async fn switch(&mut self, kind: MediaKind) -> Result<MediaTrack, ClientError> {
        if let Some(old) = self.current.take() {
            debug!(target: "media", track_id = %old.id(), "stopping outgoing track");
            old.stop();
        }
        let track = self.source.acquire(kind).await?;
        self.current = Some(track.clone());
        Ok(track)
    }

    /// Release capture entirely (local leave / fatal teardown).
    pub fn stop_all(&mut self) {
        if let Some(track) = self.current.take() {
            debug!(target: "media", track_id = %track.id(), "releasing capture");
            track.stop();
        }
    }
}
