//! Headless render surface
//!
//! Stands in for a video element when the client runs in a terminal. Inbound
//! RTP is drained so the transport keeps flowing; the source reports playing
//! once the first video packet arrives. No frames are decoded, so the
//! compositor stays idle and keyed output is never presented.

use avatar_stream::{InboundTrack, OverlaySurface, RenderSurface, TrackKind, VideoSource};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

#[derive(Default)]
struct PlaybackState {
    playing: AtomicBool,
    packets: AtomicU64,
}

/// Video source that consumes inbound tracks without decoding them
#[derive(Default)]
pub struct HeadlessVideo {
    state: Arc<PlaybackState>,
    readers: Mutex<Vec<JoinHandle<()>>>,
}

impl HeadlessVideo {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn packets(&self) -> u64 {
        self.state.packets.load(Ordering::Relaxed)
    }
}

impl VideoSource for HeadlessVideo {
    fn attach_track(&self, track: &InboundTrack) {
        let Some(remote) = track.remote.clone() else {
            // No transport behind the track, nothing to drain.
            if track.is_video() {
                self.state.playing.store(true, Ordering::SeqCst);
            }
            return;
        };

        let state = self.state.clone();
        let kind = track.kind;
        let track_id = track.id.clone();
        info!(track_id = %track_id, ?kind, "Draining inbound track");

        let reader = tokio::spawn(async move {
            loop {
                match remote.read_rtp().await {
                    Ok((packet, _)) => {
                        let total = state.packets.fetch_add(1, Ordering::Relaxed) + 1;
                        if kind == TrackKind::Video && !state.playing.swap(true, Ordering::SeqCst) {
                            info!(track_id = %track_id, "First video packet received");
                        }
                        trace!(
                            track_id = %track_id,
                            seq = packet.header.sequence_number,
                            bytes = packet.payload.len(),
                            total,
                            "RTP packet"
                        );
                    }
                    Err(e) => {
                        debug!(track_id = %track_id, "Inbound track ended: {}", e);
                        if kind == TrackKind::Video {
                            state.playing.store(false, Ordering::SeqCst);
                        }
                        break;
                    }
                }
            }
        });
        self.readers.lock().push(reader);
    }

    fn detach(&self) {
        for reader in self.readers.lock().drain(..) {
            reader.abort();
        }
        self.state.playing.store(false, Ordering::SeqCst);
    }

    fn is_playing(&self) -> bool {
        self.state.playing.load(Ordering::SeqCst)
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        None
    }

    fn draw_frame(&self, _rgba: &mut [u8]) -> bool {
        false
    }

    fn play_url(&self, url: &str) -> avatar_stream::Result<()> {
        info!(url, "Clip ready for playback");
        Ok(())
    }
}

impl Drop for HeadlessVideo {
    fn drop(&mut self) {
        for reader in self.readers.get_mut().drain(..) {
            reader.abort();
        }
    }
}

/// Overlay that only logs what it would have shown
#[derive(Default)]
pub struct HeadlessOverlay {
    visible: AtomicBool,
}

impl OverlaySurface for HeadlessOverlay {
    fn resize(&self, width: u32, height: u32) {
        debug!(width, height, "Overlay resized");
    }

    fn present(&self, _rgba: &[u8], width: u32, height: u32) {
        trace!(width, height, "Overlay frame");
    }

    fn set_visible(&self, visible: bool) {
        if self.visible.swap(visible, Ordering::SeqCst) != visible {
            debug!(visible, "Overlay visibility changed");
        }
    }
}

/// Build a surface whose video half is also returned for inspection
pub fn render_surface() -> (Arc<HeadlessVideo>, RenderSurface) {
    let video = HeadlessVideo::new();
    let surface = RenderSurface::new(video.clone(), Arc::new(HeadlessOverlay::default()));
    (video, surface)
}
