//! Host-provided media surfaces
//!
//! The library never renders on its own. The host hands in a
//! [`RenderSurface`]: a [`VideoSource`] that plays the inbound track (or a
//! fallback clip URL) and an [`OverlaySurface`] the compositor paints keyed
//! frames onto. Both are used from tokio tasks and must be `Send + Sync`.

use crate::error::Result;
use std::fmt;
use std::sync::Arc;
use webrtc::track::track_remote::TrackRemote;

/// Kind of an inbound media track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Inbound track received from the provider
#[derive(Clone)]
pub struct InboundTrack {
    pub kind: TrackKind,
    pub id: String,
    /// Underlying WebRTC track; absent for tracks produced by test doubles
    pub remote: Option<Arc<TrackRemote>>,
}

impl InboundTrack {
    pub fn is_video(&self) -> bool {
        self.kind == TrackKind::Video
    }
}

impl fmt::Debug for InboundTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundTrack")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("remote", &self.remote.is_some())
            .finish()
    }
}

/// The host's video element
pub trait VideoSource: Send + Sync {
    /// Start playing an inbound track
    fn attach_track(&self, track: &InboundTrack);

    /// Stop playback and release the attached track
    fn detach(&self);

    /// Whether decoded frames are currently being produced
    fn is_playing(&self) -> bool;

    /// Native decoded resolution, once known
    fn dimensions(&self) -> Option<(u32, u32)>;

    /// Draw the current frame as RGBA into `rgba` (`width * height * 4`)
    ///
    /// Returns `false` when no frame was available.
    fn draw_frame(&self, rgba: &mut [u8]) -> bool;

    /// Play a pre-rendered clip instead of the live track
    fn play_url(&self, url: &str) -> Result<()>;
}

/// The canvas keyed frames are presented on
pub trait OverlaySurface: Send + Sync {
    fn resize(&self, width: u32, height: u32);

    fn present(&self, rgba: &[u8], width: u32, height: u32);

    fn set_visible(&self, visible: bool);
}

/// Video source and overlay injected at registry construction
#[derive(Clone)]
pub struct RenderSurface {
    pub video: Arc<dyn VideoSource>,
    pub overlay: Arc<dyn OverlaySurface>,
}

impl RenderSurface {
    pub fn new(video: Arc<dyn VideoSource>, overlay: Arc<dyn OverlaySurface>) -> Self {
        Self { video, overlay }
    }
}

impl fmt::Debug for RenderSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderSurface").finish_non_exhaustive()
    }
}
