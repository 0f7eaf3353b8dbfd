//! Background keying for the avatar video
//!
//! The provider renders the avatar on a near-black background. Each frame
//! is drawn into one reusable RGBA buffer, dark pixels get alpha 0, and the
//! result is presented on the overlay. The overlay stays hidden until the
//! first keyed frame so the raw background never flashes on screen.

use crate::config::CompositorConfig;
use crate::media::{OverlaySurface, RenderSurface, VideoSource};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Zero the alpha of every pixel whose RGB average is below `threshold`
///
/// Other pixels are left untouched. Returns the number of keyed pixels.
pub fn apply_luma_key(rgba: &mut [u8], threshold: u8) -> usize {
    let limit = u16::from(threshold) * 3;
    let mut keyed = 0;
    for px in rgba.chunks_exact_mut(4) {
        let sum = u16::from(px[0]) + u16::from(px[1]) + u16::from(px[2]);
        if sum < limit {
            px[3] = 0;
            keyed += 1;
        }
    }
    keyed
}

/// Per-frame keying state for one surface
pub struct FrameCompositor {
    video: Arc<dyn VideoSource>,
    overlay: Arc<dyn OverlaySurface>,
    threshold: u8,
    buffer: Vec<u8>,
    dims: Option<(u32, u32)>,
    revealed: bool,
    allocations: u64,
}

impl FrameCompositor {
    pub fn new(surface: &RenderSurface, threshold: u8) -> Self {
        Self {
            video: surface.video.clone(),
            overlay: surface.overlay.clone(),
            threshold,
            buffer: Vec::new(),
            dims: None,
            revealed: false,
            allocations: 0,
        }
    }

    /// Composite the current frame; `false` when there was nothing to draw
    pub fn composite(&mut self) -> bool {
        if !self.video.is_playing() {
            return false;
        }
        let Some((width, height)) = self.video.dimensions() else {
            return false;
        };
        if width == 0 || height == 0 {
            return false;
        }

        if self.dims != Some((width, height)) {
            debug!(width, height, "Sizing compositor buffer");
            self.buffer = vec![0; width as usize * height as usize * 4];
            self.dims = Some((width, height));
            self.allocations += 1;
            self.overlay.resize(width, height);
        }

        if !self.video.draw_frame(&mut self.buffer) {
            return false;
        }

        apply_luma_key(&mut self.buffer, self.threshold);
        self.overlay.present(&self.buffer, width, height);

        if !self.revealed {
            self.overlay.set_visible(true);
            self.revealed = true;
        }
        true
    }

    /// Number of buffer (re)allocations so far
    pub fn allocations(&self) -> u64 {
        self.allocations
    }
}

/// Drives a [`FrameCompositor`] at the configured frame interval
pub struct CompositorLoop {
    handle: JoinHandle<()>,
    overlay: Arc<dyn OverlaySurface>,
    frames: Arc<AtomicU64>,
}

impl CompositorLoop {
    pub fn spawn(surface: &RenderSurface, config: &CompositorConfig) -> Self {
        let mut compositor = FrameCompositor::new(surface, config.brightness_threshold);
        let period = config.frame_interval();
        let frames = Arc::new(AtomicU64::new(0));
        let counter = frames.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if compositor.composite() {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            }
        });

        Self {
            handle,
            overlay: surface.overlay.clone(),
            frames,
        }
    }

    /// Frames composited so far
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Cancel the loop and hide the overlay
    pub fn stop(&self) {
        self.handle.abort();
        self.overlay.set_visible(false);
    }
}

impl Drop for CompositorLoop {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
