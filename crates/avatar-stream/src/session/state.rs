//! Session lifecycle states

use std::fmt;

/// Lifecycle of one provider stream
///
/// `Speaking` is never stored; it is reported while the session is
/// `Connected` and its dispatcher has an utterance in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    /// Stream being created, offer/answer in progress
    Connecting,
    /// Handshake done, waiting for the link and the first video track
    AwaitingRemoteMedia,
    Connected,
    Speaking,
    /// Torn down on request
    Disconnected,
    /// Lost through negotiation, link or health-check failure
    Failed,
}

impl SessionState {
    /// Whether the session can take speech requests
    pub fn is_healthy(&self) -> bool {
        matches!(self, SessionState::Connected | SessionState::Speaking)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Disconnected | SessionState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::AwaitingRemoteMedia => "awaiting_remote_media",
            SessionState::Connected => "connected",
            SessionState::Speaking => "speaking",
            SessionState::Disconnected => "disconnected",
            SessionState::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
