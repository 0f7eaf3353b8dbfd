//! Rendered-clip fallback
//!
//! When a live stream cannot be brought up, or refuses to animate, the
//! provider can still render the utterance as a standalone clip. The clip
//! is polled on a fixed interval until it is done, fails, or the poll budget
//! runs out; the finished URL goes to the host's video source.

use crate::config::ClipFallbackConfig;
use crate::error::{Error, Result};
use crate::events::{AvatarEvent, EventBus};
use crate::media::VideoSource;
use crate::signaling::{AvatarSignaling, ClipStatus};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub struct ClipFallback {
    signaling: Arc<dyn AvatarSignaling>,
    video: Arc<dyn VideoSource>,
    config: ClipFallbackConfig,
    events: EventBus,
}

impl ClipFallback {
    pub fn new(
        signaling: Arc<dyn AvatarSignaling>,
        video: Arc<dyn VideoSource>,
        config: ClipFallbackConfig,
        events: EventBus,
    ) -> Self {
        Self {
            signaling,
            video,
            config,
            events,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Render `text` for the avatar at `source_url` and play the result
    ///
    /// Returns the clip URL handed to the video source.
    #[instrument(skip(self, text), fields(chars = text.chars().count()))]
    pub async fn play(&self, source_url: &str, text: &str) -> Result<String> {
        let clip_id = self
            .signaling
            .create_clip(source_url, text)
            .await
            .map_err(|e| Error::Clip(format!("Failed to create clip: {}", e)))?;
        debug!(clip_id = %clip_id, "Clip requested");

        for poll in 1..=self.config.max_polls {
            tokio::time::sleep(self.config.poll_interval()).await;

            let state = match self.signaling.get_clip(&clip_id).await {
                Ok(state) => state,
                Err(e) if e.is_retryable() => {
                    warn!(clip_id = %clip_id, poll, "Clip poll failed: {}", e);
                    continue;
                }
                Err(e) => return Err(Error::Clip(format!("Failed to poll clip: {}", e))),
            };

            match state.status {
                ClipStatus::Pending => continue,
                ClipStatus::Error => {
                    return Err(Error::Clip(format!(
                        "Clip {} failed: {}",
                        clip_id,
                        state.error.unwrap_or_else(|| "unknown error".to_string())
                    )));
                }
                ClipStatus::Done => {
                    let url = state.result_url.ok_or_else(|| {
                        Error::Clip(format!("Clip {} finished without a result URL", clip_id))
                    })?;
                    self.video.play_url(&url)?;
                    info!(clip_id = %clip_id, polls = poll, "Playing fallback clip");
                    self.events.emit(AvatarEvent::ClipPlaying { url: url.clone() });
                    return Ok(url);
                }
            }
        }

        Err(Error::Clip(format!(
            "Clip {} not ready after {} polls",
            clip_id, self.config.max_polls
        )))
    }
}
