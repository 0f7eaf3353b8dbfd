//! Provider relay client
//!
//! `AvatarSignaling` is the seam the session and fallback code talk through;
//! `HttpSignalingClient` implements it over the relay's JSON routes:
//!
//! - `POST /streams` create a stream, receive the SDP offer
//! - `POST /streams/{id}/sdp` submit the SDP answer
//! - `POST /streams/{id}/ice` submit one ICE candidate
//! - `POST /streams/{id}` animate a text script
//! - `DELETE /streams/{id}` delete the stream
//! - `POST /clips` and `GET /clips/{id}` for rendered clips

use super::protocol::{
    Ack, AnimationRequest, ClipState, CreateClipRequest, CreateClipResponse, CreateStreamRequest,
    CreateStreamResponse, CreatedStream, DeleteStreamRequest, GetClipResponse, IceCandidateRequest,
    LocalIceCandidate, SessionDescription, SignalingAction, StartStreamRequest, StreamIds,
    TextScript,
};
use crate::config::SignalingConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Request/response operations against the avatar provider
///
/// Implementations hold no per-stream state; every call carries the ids it
/// needs.
#[async_trait]
pub trait AvatarSignaling: Send + Sync {
    /// Create a remote stream for the avatar image at `source_url`
    async fn create_stream(&self, source_url: &str) -> Result<CreatedStream>;

    /// Submit the local SDP answer
    async fn start_stream(&self, ids: &StreamIds, answer_sdp: &str) -> Result<()>;

    /// Submit a local ICE candidate, or `None` for end-of-candidates
    async fn submit_ice_candidate(
        &self,
        ids: &StreamIds,
        candidate: Option<&LocalIceCandidate>,
    ) -> Result<()>;

    /// Ask the avatar to speak `text`
    async fn request_animation(&self, ids: &StreamIds, text: &str) -> Result<()>;

    /// Delete the remote stream
    async fn delete_stream(&self, ids: &StreamIds) -> Result<()>;

    /// Start rendering a standalone clip; returns the clip id
    async fn create_clip(&self, source_url: &str, text: &str) -> Result<String>;

    /// Poll a clip's rendering status
    async fn get_clip(&self, clip_id: &str) -> Result<ClipState>;
}

/// JSON-over-HTTP client for the provider relay
pub struct HttpSignalingClient {
    /// Base URL without trailing slash
    base_url: String,

    /// Authorization header value, sent verbatim
    authorization: Option<String>,

    client: reqwest::Client,
}

impl HttpSignalingClient {
    /// Create a client from the relay configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` when the base URL is empty or not
    /// http(s).
    pub fn new(config: &SignalingConfig) -> Result<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();

        if base_url.is_empty() {
            return Err(Error::InvalidConfig(
                "signaling base_url cannot be empty".to_string(),
            ));
        }

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::InvalidConfig(format!(
                "signaling base_url must start with http:// or https://, got: {}",
                base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| Error::InvalidConfig(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            authorization: config.authorization.clone(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.request(method, url);
        if let Some(auth) = &self.authorization {
            request = request.header(reqwest::header::AUTHORIZATION, auth);
        }
        request
    }

    /// Send a request and fail on transport errors and non-2xx answers
    async fn send(
        &self,
        action: SignalingAction,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::signaling(action, None, format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            warn!(%action, status = status.as_u16(), "Relay rejected request");
            return Err(Error::signaling(
                action,
                Some(status.as_u16()),
                format!(
                    "HTTP {} {}: {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown"),
                    body
                ),
            ));
        }

        Ok(response)
    }

    async fn call_json<B, R>(
        &self,
        action: SignalingAction,
        method: reqwest::Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut request = self.request(method, path);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = self.send(action, request).await?;
        let status = response.status().as_u16();

        response.json::<R>().await.map_err(|e| {
            Error::signaling(
                action,
                Some(status),
                format!("Failed to parse response: {}", e),
            )
        })
    }

    /// Send a request whose answer carries at most an acknowledgement
    ///
    /// An empty body counts as success; `{"success": false}` does not.
    async fn call_ack<B>(
        &self,
        action: SignalingAction,
        method: reqwest::Method,
        path: &str,
        body: &B,
    ) -> Result<()>
    where
        B: Serialize + ?Sized,
    {
        let request = self.request(method, path).json(body);
        let response = self.send(action, request).await?;
        let status = response.status().as_u16();

        let text = response.text().await.map_err(|e| {
            Error::signaling(action, Some(status), format!("Failed to read response: {}", e))
        })?;
        if text.trim().is_empty() {
            return Ok(());
        }

        let ack: Ack = serde_json::from_str(&text).unwrap_or_default();
        if ack.success == Some(false) {
            return Err(Error::signaling(
                action,
                Some(status),
                ack.message
                    .unwrap_or_else(|| "provider reported failure".to_string()),
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl AvatarSignaling for HttpSignalingClient {
    async fn create_stream(&self, source_url: &str) -> Result<CreatedStream> {
        debug!(source_url, "Creating avatar stream");
        let response: CreateStreamResponse = self
            .call_json(
                SignalingAction::CreateStream,
                reqwest::Method::POST,
                "/streams",
                Some(&CreateStreamRequest { source_url }),
            )
            .await?;
        Ok(response.into())
    }

    async fn start_stream(&self, ids: &StreamIds, answer_sdp: &str) -> Result<()> {
        let body = StartStreamRequest {
            session_id: &ids.session_id,
            answer: SessionDescription::answer(answer_sdp),
        };
        self.call_ack(
            SignalingAction::StartStream,
            reqwest::Method::POST,
            &format!("/streams/{}/sdp", ids.stream_id),
            &body,
        )
        .await
    }

    async fn submit_ice_candidate(
        &self,
        ids: &StreamIds,
        candidate: Option<&LocalIceCandidate>,
    ) -> Result<()> {
        let body = IceCandidateRequest::new(&ids.session_id, candidate);
        self.call_ack(
            SignalingAction::SubmitIce,
            reqwest::Method::POST,
            &format!("/streams/{}/ice", ids.stream_id),
            &body,
        )
        .await
    }

    async fn request_animation(&self, ids: &StreamIds, text: &str) -> Result<()> {
        let body = AnimationRequest {
            session_id: &ids.session_id,
            script: TextScript::new(text),
        };
        self.call_ack(
            SignalingAction::Speak,
            reqwest::Method::POST,
            &format!("/streams/{}", ids.stream_id),
            &body,
        )
        .await
    }

    async fn delete_stream(&self, ids: &StreamIds) -> Result<()> {
        let body = DeleteStreamRequest {
            session_id: &ids.session_id,
        };
        self.call_ack(
            SignalingAction::DeleteStream,
            reqwest::Method::DELETE,
            &format!("/streams/{}", ids.stream_id),
            &body,
        )
        .await
    }

    async fn create_clip(&self, source_url: &str, text: &str) -> Result<String> {
        let body = CreateClipRequest {
            source_url,
            script: TextScript::new(text),
        };
        let response: CreateClipResponse = self
            .call_json(
                SignalingAction::CreateClip,
                reqwest::Method::POST,
                "/clips",
                Some(&body),
            )
            .await?;
        Ok(response.id)
    }

    async fn get_clip(&self, clip_id: &str) -> Result<ClipState> {
        let response: GetClipResponse = self
            .call_json::<(), _>(
                SignalingAction::GetClip,
                reqwest::Method::GET,
                &format!("/clips/{}", clip_id),
                None,
            )
            .await?;
        Ok(response.into())
    }
}
