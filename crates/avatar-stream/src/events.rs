//! Host-facing events
//!
//! Events fan out over a `tokio::sync::broadcast` channel so any number of
//! host components (UI, logging, tests) can observe the session without
//! holding callbacks into it.

use crate::session::SessionState;
use tokio::sync::broadcast;
use tracing::trace;

/// Capacity of the event channel; slow receivers see `Lagged`
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Observable changes of the avatar stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvatarEvent {
    /// A session became live (`true`) or was lost (`false`)
    ConnectionChanged(bool),

    /// The avatar started or finished speaking
    SpeakingChanged(bool),

    /// A session moved between lifecycle states
    StateChanged {
        /// Provider stream id (empty before the stream exists)
        stream_id: String,
        from: SessionState,
        to: SessionState,
    },

    /// A fallback clip was handed to the video source
    ClipPlaying {
        url: String,
    },
}

impl AvatarEvent {
    /// Event name for logs
    pub fn name(&self) -> &'static str {
        match self {
            AvatarEvent::ConnectionChanged(_) => "connection_changed",
            AvatarEvent::SpeakingChanged(_) => "speaking_changed",
            AvatarEvent::StateChanged { .. } => "state_changed",
            AvatarEvent::ClipPlaying { .. } => "clip_playing",
        }
    }
}

/// Cloneable sender half shared by every component that emits events
///
/// ```
/// use avatar_stream::{AvatarEvent, EventBus};
///
/// # tokio_test::block_on(async {
/// let bus = EventBus::new();
/// let mut rx = bus.subscribe();
/// bus.emit(AvatarEvent::SpeakingChanged(true));
/// assert_eq!(rx.recv().await.unwrap(), AvatarEvent::SpeakingChanged(true));
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AvatarEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AvatarEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; having no subscribers is not an error
    pub fn emit(&self, event: AvatarEvent) {
        let name = event.name();
        if self.tx.send(event).is_err() {
            trace!(event = name, "No event subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
