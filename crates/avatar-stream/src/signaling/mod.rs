//! Provider signaling
//!
//! Stateless request/response wrapper around the avatar provider's stream
//! and clip actions. Nothing here touches session state; callers own the
//! ids and decide what to do with failures.

mod client;
pub mod protocol;

pub use client::{AvatarSignaling, HttpSignalingClient};
pub use protocol::{
    ClipState, ClipStatus, CreatedStream, IceServer, LocalIceCandidate, SessionDescription,
    SignalingAction, StreamIds,
};
