//! Streaming client for remote talking-avatar providers
//!
//! This crate keeps one WebRTC session open against a talking-avatar
//! provider, speaks text through it one utterance at a time, and keys the
//! avatar's dark background out of every received frame.
//!
//! # Features
//!
//! - **Single-flight sessions**: concurrent callers share one negotiation
//! - **Ordered signaling**: the SDP answer always reaches the provider
//!   before any local ICE candidate
//! - **Speech dispatch**: debounced, latest-wins queue with bounded retry
//! - **Frame compositor**: per-frame luma key onto a host overlay
//! - **Clip fallback**: render a standalone clip when streaming is down
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  Host (chat logic, UI)                               │
//! │  ↓ speak(text, avatar_ref)      ↑ AvatarEvent        │
//! │  SessionRegistry                                     │
//! │  ├─ PeerSession (one live stream)                    │
//! │  │   ├─ PeerLink (webrtc RTCPeerConnection)          │
//! │  │   ├─ IceCoordinator (candidates after answer)     │
//! │  │   ├─ SpeechDispatcher (one animation in flight)   │
//! │  │   └─ CompositorLoop → OverlaySurface              │
//! │  └─ ClipFallback                                     │
//! │     ↓                                                │
//! │  AvatarSignaling (HTTP relay → provider)             │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use avatar_stream::AvatarStreamConfig;
//!
//! let config = AvatarStreamConfig::default();
//! assert!(config.validate().is_ok());
//! assert_eq!(config.dispatch.debounce_ms, 300);
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use avatar_stream::{
//!     AvatarStreamConfig, HttpSignalingClient, RenderSurface, RtcPeerConnector, SessionRegistry,
//! };
//! use std::sync::Arc;
//!
//! # async fn example(surface: RenderSurface) -> avatar_stream::Result<()> {
//! let config = AvatarStreamConfig::load(None::<&str>)?;
//! let signaling = Arc::new(HttpSignalingClient::new(&config.signaling)?);
//! let registry = SessionRegistry::new(config, signaling, Arc::new(RtcPeerConnector::new()), surface)?;
//!
//! registry.speak("Hello there", "https://example.com/avatar.png").await?;
//! registry.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod compositor;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod fallback;
pub mod ice;
pub mod media;
pub mod peer;
pub mod registry;
pub mod session;
pub mod signaling;

#[cfg(test)]
mod test_support;

pub use compositor::{apply_luma_key, CompositorLoop, FrameCompositor};
pub use config::{
    AvatarStreamConfig, ClipFallbackConfig, CompositorConfig, DispatchConfig, SessionConfig,
    SignalingConfig,
};
pub use dispatch::{estimate_speaking_duration, SpeechDispatcher, SpeechOutcome};
pub use error::{Error, Result};
pub use events::{AvatarEvent, EventBus};
pub use fallback::ClipFallback;
pub use ice::IceCoordinator;
pub use media::{InboundTrack, OverlaySurface, RenderSurface, TrackKind, VideoSource};
pub use peer::{PeerConnectionState, PeerConnector, PeerEvent, PeerLink, RtcPeerConnector};
pub use registry::{SessionRegistry, SpeakOutcome};
pub use session::{PeerSession, SessionContext, SessionState};
pub use signaling::{
    AvatarSignaling, ClipState, ClipStatus, CreatedStream, HttpSignalingClient, IceServer,
    LocalIceCandidate, SignalingAction, StreamIds,
};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
