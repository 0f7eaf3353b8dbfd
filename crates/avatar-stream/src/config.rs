//! Configuration types for the avatar streaming client
//!
//! Configuration can be loaded from a TOML file and/or environment variables.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration for a [`crate::SessionRegistry`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AvatarStreamConfig {
    /// Provider relay connection
    #[serde(default)]
    pub signaling: SignalingConfig,

    /// Peer session lifecycle
    #[serde(default)]
    pub session: SessionConfig,

    /// Speech dispatch queue
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Frame compositor
    #[serde(default)]
    pub compositor: CompositorConfig,

    /// Render-a-clip fallback
    #[serde(default)]
    pub clip_fallback: ClipFallbackConfig,
}

/// Provider relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// Relay base URL (http:// or https://)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Value for the Authorization header, sent verbatim (e.g. "Basic ...")
    #[serde(default)]
    pub authorization: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:3000/api/avatar".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            authorization: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Peer session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Interval between connection health checks in milliseconds
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_ms: u64,

    /// Upper bound for reaching `Connected` after the handshake, in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// How often to probe the video source for playback start, in milliseconds
    #[serde(default = "default_media_probe_interval")]
    pub media_probe_interval_ms: u64,
}

fn default_health_check_interval() -> u64 {
    15_000
}

fn default_connect_timeout() -> u64 {
    30_000
}

fn default_media_probe_interval() -> u64 {
    50
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: default_health_check_interval(),
            connect_timeout_ms: default_connect_timeout(),
            media_probe_interval_ms: default_media_probe_interval(),
        }
    }
}

/// Speech dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Requests closer than this to the previous dispatch are dropped
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,

    /// Animation request attempts per utterance
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between failed attempts in milliseconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Speaking-rate heuristic used to estimate utterance length
    #[serde(default = "default_chars_per_second")]
    pub chars_per_second: f64,

    /// Floor for the estimated speaking duration in milliseconds
    #[serde(default = "default_min_speaking")]
    pub min_speaking_ms: u64,
}

fn default_debounce() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1_000
}

fn default_chars_per_second() -> f64 {
    15.0
}

fn default_min_speaking() -> u64 {
    1_000
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay(),
            chars_per_second: default_chars_per_second(),
            min_speaking_ms: default_min_speaking(),
        }
    }
}

/// Frame compositor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositorConfig {
    /// Pixels whose RGB average is below this become transparent
    #[serde(default = "default_brightness_threshold")]
    pub brightness_threshold: u8,

    /// Redraw interval in milliseconds (16 ≈ 60 fps)
    #[serde(default = "default_frame_interval")]
    pub frame_interval_ms: u64,
}

fn default_brightness_threshold() -> u8 {
    25
}

fn default_frame_interval() -> u64 {
    16
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            brightness_threshold: default_brightness_threshold(),
            frame_interval_ms: default_frame_interval(),
        }
    }
}

/// Clip fallback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipFallbackConfig {
    /// Whether to render a clip when live streaming is unavailable
    #[serde(default = "default_clip_enabled")]
    pub enabled: bool,

    /// Interval between clip status polls in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Maximum number of status polls before giving up
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
}

fn default_clip_enabled() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    2_000
}

fn default_max_polls() -> u32 {
    30
}

impl Default for ClipFallbackConfig {
    fn default() -> Self {
        Self {
            enabled: default_clip_enabled(),
            poll_interval_ms: default_poll_interval(),
            max_polls: default_max_polls(),
        }
    }
}

impl SessionConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn media_probe_interval(&self) -> Duration {
        Duration::from_millis(self.media_probe_interval_ms)
    }
}

impl DispatchConfig {
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn min_speaking(&self) -> Duration {
        Duration::from_millis(self.min_speaking_ms)
    }
}

impl CompositorConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

impl ClipFallbackConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl AvatarStreamConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `signaling.base_url` is not an http(s) URL
    /// - any interval or timeout is zero
    /// - `dispatch.max_attempts` is 0
    /// - `dispatch.chars_per_second` is not a positive number
    /// - the clip fallback is enabled with `max_polls` of 0
    pub fn validate(&self) -> Result<()> {
        let base = url::Url::parse(&self.signaling.base_url).map_err(|e| {
            Error::InvalidConfig(format!(
                "signaling.base_url is not a valid URL ({}): {}",
                self.signaling.base_url, e
            ))
        })?;
        if base.scheme() != "http" && base.scheme() != "https" {
            return Err(Error::InvalidConfig(format!(
                "signaling.base_url must start with http:// or https://, got {}",
                self.signaling.base_url
            )));
        }

        if self.signaling.request_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "signaling.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.session.health_check_interval_ms == 0
            || self.session.connect_timeout_ms == 0
            || self.session.media_probe_interval_ms == 0
        {
            return Err(Error::InvalidConfig(
                "session intervals and timeouts must be greater than 0".to_string(),
            ));
        }

        if self.dispatch.max_attempts == 0 {
            return Err(Error::InvalidConfig(
                "dispatch.max_attempts must be at least 1".to_string(),
            ));
        }

        if !(self.dispatch.chars_per_second.is_finite() && self.dispatch.chars_per_second > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "dispatch.chars_per_second must be positive, got {}",
                self.dispatch.chars_per_second
            )));
        }

        if self.compositor.frame_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "compositor.frame_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.clip_fallback.enabled
            && (self.clip_fallback.max_polls == 0 || self.clip_fallback.poll_interval_ms == 0)
        {
            return Err(Error::InvalidConfig(
                "clip_fallback.max_polls and poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::InvalidConfig(format!(
                "failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::InvalidConfig(format!("parse error: {}", e)))
    }

    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("AVATAR_SIGNALING_URL") {
            config.signaling.base_url = url;
        }
        if let Ok(auth) = std::env::var("AVATAR_AUTHORIZATION") {
            config.signaling.authorization = Some(auth);
        }
        if let Some(t) = env_parse("AVATAR_REQUEST_TIMEOUT_SECS") {
            config.signaling.request_timeout_secs = t;
        }
        if let Some(ms) = env_parse("AVATAR_HEALTH_CHECK_MS") {
            config.session.health_check_interval_ms = ms;
        }
        if let Some(ms) = env_parse("AVATAR_CONNECT_TIMEOUT_MS") {
            config.session.connect_timeout_ms = ms;
        }
        if let Some(ms) = env_parse("AVATAR_DEBOUNCE_MS") {
            config.dispatch.debounce_ms = ms;
        }
        if let Some(n) = env_parse("AVATAR_MAX_ATTEMPTS") {
            config.dispatch.max_attempts = n;
        }
        if let Some(t) = env_parse("AVATAR_BRIGHTNESS_THRESHOLD") {
            config.compositor.brightness_threshold = t;
        }
        if let Some(enabled) = env_parse("AVATAR_CLIP_FALLBACK") {
            config.clip_fallback.enabled = enabled;
        }

        config
    }

    /// Load configuration from file if it exists, otherwise from environment
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        if let Some(p) = path {
            if p.as_ref().exists() {
                return Self::from_file(p);
            }
        }
        Ok(Self::from_env())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
