//! Peer sessions
//!
//! A session owns one provider stream end to end:
//!
//! ```text
//! Idle -> Connecting -> AwaitingRemoteMedia -> Connected <-> Speaking
//!                                                  |
//!                                   Disconnected | Failed
//! ```
//!
//! Negotiation failures never leave a half-built session behind. Once
//! connected, a periodic health check and the link's own state callbacks
//! can fail the session; teardown then releases the link, render loop,
//! timers and queued speech, and deletes the remote stream in the
//! background.

mod peer_session;
mod state;

pub use peer_session::{PeerSession, SessionContext};
pub use state::SessionState;
