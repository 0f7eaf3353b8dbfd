//! Error types for the avatar streaming client

use crate::signaling::SignalingAction;

/// Result type alias using the avatar stream Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving an avatar session
///
/// `Clone` so a single in-flight session creation can hand the same failure
/// to every caller awaiting it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Network/HTTP failure talking to the provider relay
    #[error("Signaling error ({action}, status {}): {message}", http_status.map(|s| s.to_string()).unwrap_or_else(|| "none".to_string()))]
    Signaling {
        /// Which provider action failed
        action: SignalingAction,
        /// HTTP status, if the relay answered at all
        http_status: Option<u16>,
        /// Human-readable cause
        message: String,
    },

    /// SDP/ICE exchange failure, fatal to the session being built
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// A speak request failed after every retry
    #[error("Animation failed after {attempts} attempt(s): {message}")]
    Animation {
        /// Attempts made before giving up
        attempts: u32,
        /// Last failure message
        message: String,
    },

    /// Periodic check found the link no longer connected
    #[error("Health check failure: {0}")]
    HealthCheckFailure(String),

    /// Clip fallback failed or timed out
    #[error("Clip error: {0}")]
    Clip(String),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation on a session that has already been torn down
    #[error("Session closed: {0}")]
    SessionClosed(String),

    /// Operation timeout
    #[error("Operation timeout: {0}")]
    Timeout(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtc(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not occur in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a signaling error for `action`
    pub fn signaling(
        action: SignalingAction,
        http_status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        Error::Signaling {
            action,
            http_status,
            message: message.into(),
        }
    }

    /// Check if this error is worth retrying
    ///
    /// Transport failures and 5xx/429 answers are; client errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Signaling { http_status, .. } => match http_status {
                None => true,
                Some(status) => *status >= 500 || *status == 429,
            },
            Error::Timeout(_) => true,
            _ => false,
        }
    }

    /// Check if this error invalidates the live connection
    ///
    /// Connection-level errors force a fresh session on the next speak.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Negotiation(_)
                | Error::HealthCheckFailure(_)
                | Error::SessionClosed(_)
                | Error::WebRtc(_)
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}

impl From<webrtc::Error> for Error {
    fn from(e: webrtc::Error) -> Self {
        Error::WebRtc(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
