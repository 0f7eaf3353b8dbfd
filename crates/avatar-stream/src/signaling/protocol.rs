//! Wire types for the avatar provider relay
//!
//! The relay forwards these JSON bodies to the provider unchanged, so field
//! names follow the provider's casing rather than Rust's.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Provider actions, used to tag signaling failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalingAction {
    /// Create a remote stream and receive its SDP offer
    CreateStream,
    /// Submit the local SDP answer
    StartStream,
    /// Submit one local ICE candidate (or the end-of-candidates marker)
    SubmitIce,
    /// Ask the avatar to animate a text script
    Speak,
    /// Delete the remote stream
    DeleteStream,
    /// Render a clip from text (fallback path)
    CreateClip,
    /// Poll a rendered clip
    GetClip,
}

impl SignalingAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalingAction::CreateStream => "create_stream",
            SignalingAction::StartStream => "start_stream",
            SignalingAction::SubmitIce => "submit_ice",
            SignalingAction::Speak => "speak",
            SignalingAction::DeleteStream => "delete_stream",
            SignalingAction::CreateClip => "create_clip",
            SignalingAction::GetClip => "get_clip",
        }
    }
}

impl fmt::Display for SignalingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider-issued identifiers of a live stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamIds {
    pub stream_id: String,
    pub session_id: String,
}

impl fmt::Display for StreamIds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stream_id)
    }
}

/// ICE server entry as returned by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// STUN/TURN URLs; the provider sends either a string or a list
    #[serde(deserialize_with = "one_or_many")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(url) => vec![url],
        OneOrMany::Many(urls) => urls,
    })
}

/// Session description as exchanged with the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: String,
    pub sdp: String,
}

impl SessionDescription {
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: "answer".to_string(),
            sdp: sdp.into(),
        }
    }
}

/// Result of creating a remote stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedStream {
    pub ids: StreamIds,
    pub offer_sdp: String,
    pub ice_servers: Vec<IceServer>,
}

/// A locally gathered ICE candidate, in gathering order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

/// Rendering status of a fallback clip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipStatus {
    Pending,
    Done,
    Error,
}

impl ClipStatus {
    /// Map the provider's status string
    ///
    /// Anything that is neither finished nor failed counts as pending.
    pub fn from_provider(status: &str) -> Self {
        match status {
            "done" => ClipStatus::Done,
            "error" | "rejected" => ClipStatus::Error,
            _ => ClipStatus::Pending,
        }
    }
}

/// Polled state of a fallback clip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipState {
    pub status: ClipStatus,
    pub result_url: Option<String>,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Request/response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub(crate) struct CreateStreamRequest<'a> {
    pub source_url: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateStreamResponse {
    pub id: String,
    pub session_id: String,
    pub offer: SessionDescription,
    #[serde(default)]
    pub ice_servers: Vec<IceServer>,
}

impl From<CreateStreamResponse> for CreatedStream {
    fn from(resp: CreateStreamResponse) -> Self {
        CreatedStream {
            ids: StreamIds {
                stream_id: resp.id,
                session_id: resp.session_id,
            },
            offer_sdp: resp.offer.sdp,
            ice_servers: resp.ice_servers,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct StartStreamRequest<'a> {
    pub session_id: &'a str,
    pub answer: SessionDescription,
}

#[derive(Debug, Serialize)]
pub(crate) struct IceCandidateRequest<'a> {
    pub session_id: &'a str,
    pub candidate: Option<&'a str>,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<&'a str>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
}

impl<'a> IceCandidateRequest<'a> {
    pub fn new(session_id: &'a str, candidate: Option<&'a LocalIceCandidate>) -> Self {
        match candidate {
            Some(c) => Self {
                session_id,
                candidate: Some(&c.candidate),
                sdp_mid: c.sdp_mid.as_deref(),
                sdp_mline_index: c.sdp_mline_index,
            },
            None => Self {
                session_id,
                candidate: None,
                sdp_mid: None,
                sdp_mline_index: None,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct TextScript<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub input: &'a str,
}

impl<'a> TextScript<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { kind: "text", input }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AnimationRequest<'a> {
    pub session_id: &'a str,
    pub script: TextScript<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct DeleteStreamRequest<'a> {
    pub session_id: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateClipRequest<'a> {
    pub source_url: &'a str,
    pub script: TextScript<'a>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateClipResponse {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GetClipResponse {
    pub status: String,
    #[serde(default)]
    pub result_url: Option<String>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl From<GetClipResponse> for ClipState {
    fn from(resp: GetClipResponse) -> Self {
        ClipState {
            status: ClipStatus::from_provider(&resp.status),
            result_url: resp.result_url,
            error: resp.error.map(|e| match e {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            }),
        }
    }
}

/// Acknowledgement body for start/speak; every field is optional
#[derive(Debug, Default, Deserialize)]
pub(crate) struct Ack {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
}
