//! WebRTC seam
//!
//! The session drives the peer through two small traits so negotiation and
//! teardown can be exercised without a real ICE agent. Callbacks from the
//! underlying stack are translated into [`PeerEvent`]s and pushed onto a
//! channel consumed by one task per session.

mod rtc;

pub use rtc::{RtcPeerConnector, RtcPeerLink};

use crate::error::Result;
use crate::media::InboundTrack;
use crate::signaling::{IceServer, LocalIceCandidate};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Capacity of the per-session peer event channel
pub const PEER_EVENT_CAPACITY: usize = 128;

/// Peer connection state as reported by the WebRTC stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerConnectionState {
    /// Failed, disconnected and closed all end a live session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PeerConnectionState::Disconnected
                | PeerConnectionState::Failed
                | PeerConnectionState::Closed
        )
    }
}

/// Callback from the peer connection
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A local candidate was gathered
    IceCandidate(LocalIceCandidate),
    /// Local gathering finished
    GatheringComplete,
    /// Connection state changed
    ConnectionState(PeerConnectionState),
    /// The provider started sending a track
    TrackReceived(InboundTrack),
}

/// One live peer connection to the provider
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Apply the remote offer, create and apply the local answer
    ///
    /// Returns the answer SDP to hand to the provider.
    async fn accept_offer(&self, offer_sdp: &str) -> Result<String>;

    fn connection_state(&self) -> PeerConnectionState;

    async fn close(&self) -> Result<()>;
}

/// Factory for peer links
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Build a link using the provider's ICE servers
    ///
    /// Every callback of the new link is delivered on `events`.
    async fn connect(
        &self,
        ice_servers: &[IceServer],
        events: mpsc::Sender<PeerEvent>,
    ) -> Result<Arc<dyn PeerLink>>;
}
