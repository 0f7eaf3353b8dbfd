//! In-crate doubles shared by unit tests

use crate::config::AvatarStreamConfig;
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::media::{InboundTrack, OverlaySurface, RenderSurface, TrackKind, VideoSource};
use crate::peer::{PeerConnectionState, PeerConnector, PeerEvent, PeerLink};
use crate::session::SessionContext;
use crate::signaling::{
    AvatarSignaling, ClipState, ClipStatus, CreatedStream, IceServer, LocalIceCandidate,
    SignalingAction, StreamIds,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One recorded signaling call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateStream(String),
    StartStream(String),
    Ice(Option<String>),
    Speak(String),
    Delete(String),
    CreateClip(String),
    GetClip(String),
}

#[derive(Default)]
struct Script {
    calls: Vec<Call>,
    speak_failures: u32,
    start_failures: u32,
    clip_statuses: VecDeque<ClipStatus>,
}

/// Signaling double that records every call and fails on request
#[derive(Default)]
pub struct RecordingSignaling {
    script: Mutex<Script>,
}

impl RecordingSignaling {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` animation requests with a 503
    pub fn fail_speak(&self, n: u32) {
        self.script.lock().speak_failures = n;
    }

    pub fn fail_start(&self, n: u32) {
        self.script.lock().start_failures = n;
    }

    /// Statuses returned by successive `get_clip` calls; `Done` once empty
    pub fn clip_statuses(&self, statuses: Vec<ClipStatus>) {
        self.script.lock().clip_statuses = statuses.into();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().calls.clone()
    }

    pub fn speaks(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Speak(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.script.lock().calls.push(call);
    }
}

pub fn ids() -> StreamIds {
    StreamIds {
        stream_id: "strm_test".to_string(),
        session_id: "sess_test".to_string(),
    }
}

pub fn candidate(n: u32) -> LocalIceCandidate {
    LocalIceCandidate {
        candidate: format!("candidate:{n} 1 udp 2122260223 10.0.0.{n} 5000{n} typ host"),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
    }
}

#[async_trait]
impl AvatarSignaling for RecordingSignaling {
    async fn create_stream(&self, source_url: &str) -> Result<CreatedStream> {
        self.record(Call::CreateStream(source_url.to_string()));
        Ok(CreatedStream {
            ids: ids(),
            offer_sdp: "v=0 offer".to_string(),
            ice_servers: Vec::new(),
        })
    }

    async fn start_stream(&self, _ids: &StreamIds, answer_sdp: &str) -> Result<()> {
        self.record(Call::StartStream(answer_sdp.to_string()));
        let mut script = self.script.lock();
        if script.start_failures > 0 {
            script.start_failures -= 1;
            return Err(Error::signaling(
                SignalingAction::StartStream,
                Some(500),
                "scripted failure",
            ));
        }
        Ok(())
    }

    async fn submit_ice_candidate(
        &self,
        _ids: &StreamIds,
        candidate: Option<&LocalIceCandidate>,
    ) -> Result<()> {
        self.record(Call::Ice(candidate.map(|c| c.candidate.clone())));
        Ok(())
    }

    async fn request_animation(&self, _ids: &StreamIds, text: &str) -> Result<()> {
        self.record(Call::Speak(text.to_string()));
        let mut script = self.script.lock();
        if script.speak_failures > 0 {
            script.speak_failures -= 1;
            return Err(Error::signaling(
                SignalingAction::Speak,
                Some(503),
                "scripted failure",
            ));
        }
        Ok(())
    }

    async fn delete_stream(&self, ids: &StreamIds) -> Result<()> {
        self.record(Call::Delete(ids.stream_id.clone()));
        Ok(())
    }

    async fn create_clip(&self, source_url: &str, _text: &str) -> Result<String> {
        self.record(Call::CreateClip(source_url.to_string()));
        Ok("clip_test".to_string())
    }

    async fn get_clip(&self, clip_id: &str) -> Result<ClipState> {
        self.record(Call::GetClip(clip_id.to_string()));
        let status = self
            .script
            .lock()
            .clip_statuses
            .pop_front()
            .unwrap_or(ClipStatus::Done);
        Ok(ClipState {
            status,
            result_url: (status == ClipStatus::Done).then(|| "https://clips/test.mp4".to_string()),
            error: (status == ClipStatus::Error).then(|| "render failed".to_string()),
        })
    }
}

#[derive(Default)]
struct SurfaceState {
    attached: Vec<String>,
    playing: bool,
    dims: Option<(u32, u32)>,
    frame: Vec<u8>,
    resizes: Vec<(u32, u32)>,
    presented: Vec<Vec<u8>>,
    visible: bool,
    detached: u32,
    played_urls: Vec<String>,
}

/// Video source and overlay in one; attaching a track starts "playback"
#[derive(Default)]
pub struct MockSurface {
    state: Mutex<SurfaceState>,
}

impl MockSurface {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn render_surface(self: &Arc<Self>) -> RenderSurface {
        RenderSurface::new(self.clone(), self.clone())
    }

    /// Set the decoded frame returned by `draw_frame`
    pub fn set_frame(&self, width: u32, height: u32, rgba: Vec<u8>) {
        let mut state = self.state.lock();
        state.dims = Some((width, height));
        state.frame = rgba;
    }

    pub fn set_playing(&self, playing: bool) {
        self.state.lock().playing = playing;
    }

    pub fn attached(&self) -> Vec<String> {
        self.state.lock().attached.clone()
    }

    pub fn resizes(&self) -> Vec<(u32, u32)> {
        self.state.lock().resizes.clone()
    }

    pub fn presented(&self) -> Vec<Vec<u8>> {
        self.state.lock().presented.clone()
    }

    pub fn visible(&self) -> bool {
        self.state.lock().visible
    }

    pub fn detached(&self) -> u32 {
        self.state.lock().detached
    }

    pub fn played_urls(&self) -> Vec<String> {
        self.state.lock().played_urls.clone()
    }
}

impl VideoSource for MockSurface {
    fn attach_track(&self, track: &InboundTrack) {
        let mut state = self.state.lock();
        state.attached.push(track.id.clone());
        state.playing = true;
    }

    fn detach(&self) {
        let mut state = self.state.lock();
        state.detached += 1;
        state.playing = false;
    }

    fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.state.lock().dims
    }

    fn draw_frame(&self, rgba: &mut [u8]) -> bool {
        let state = self.state.lock();
        if state.frame.len() != rgba.len() {
            return false;
        }
        rgba.copy_from_slice(&state.frame);
        true
    }

    fn play_url(&self, url: &str) -> Result<()> {
        self.state.lock().played_urls.push(url.to_string());
        Ok(())
    }
}

impl OverlaySurface for MockSurface {
    fn resize(&self, width: u32, height: u32) {
        self.state.lock().resizes.push((width, height));
    }

    fn present(&self, rgba: &[u8], _width: u32, _height: u32) {
        self.state.lock().presented.push(rgba.to_vec());
    }

    fn set_visible(&self, visible: bool) {
        self.state.lock().visible = visible;
    }
}

/// Peer link double; accepting the offer gathers two candidates, connects
/// and delivers a video track
pub struct MockLink {
    events: mpsc::Sender<PeerEvent>,
    state: Mutex<PeerConnectionState>,
    closed: AtomicBool,
    deliver_media: bool,
}

impl MockLink {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Change the link state, optionally reporting it through the callback
    pub async fn set_state(&self, state: PeerConnectionState, notify: bool) {
        *self.state.lock() = state;
        if notify {
            let _ = self
                .events
                .send(PeerEvent::ConnectionState(state))
                .await;
        }
    }
}

#[async_trait]
impl PeerLink for MockLink {
    async fn accept_offer(&self, offer_sdp: &str) -> Result<String> {
        if self.deliver_media {
            for n in 1..=2 {
                let _ = self.events.send(PeerEvent::IceCandidate(candidate(n))).await;
            }
            let _ = self.events.send(PeerEvent::GatheringComplete).await;
            *self.state.lock() = PeerConnectionState::Connected;
            let _ = self
                .events
                .send(PeerEvent::ConnectionState(PeerConnectionState::Connected))
                .await;
            let _ = self
                .events
                .send(PeerEvent::TrackReceived(InboundTrack {
                    kind: TrackKind::Video,
                    id: "video0".to_string(),
                    remote: None,
                }))
                .await;
        }
        Ok(format!("answer to {offer_sdp}"))
    }

    fn connection_state(&self) -> PeerConnectionState {
        *self.state.lock()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        *self.state.lock() = PeerConnectionState::Closed;
        Ok(())
    }
}

/// Connector double recording every link it builds
pub struct MockConnector {
    links: Mutex<Vec<Arc<MockLink>>>,
    deliver_media: bool,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            links: Mutex::new(Vec::new()),
            deliver_media: true,
        })
    }

    /// Links never connect nor deliver media
    pub fn silent() -> Arc<Self> {
        Arc::new(Self {
            links: Mutex::new(Vec::new()),
            deliver_media: false,
        })
    }

    pub fn links(&self) -> Vec<Arc<MockLink>> {
        self.links.lock().clone()
    }
}

#[async_trait]
impl PeerConnector for MockConnector {
    async fn connect(
        &self,
        _ice_servers: &[IceServer],
        events: mpsc::Sender<PeerEvent>,
    ) -> Result<Arc<dyn PeerLink>> {
        let link = Arc::new(MockLink {
            events,
            state: Mutex::new(PeerConnectionState::New),
            closed: AtomicBool::new(false),
            deliver_media: self.deliver_media,
        });
        self.links.lock().push(link.clone());
        Ok(link)
    }
}

/// Session collaborators wired to the doubles above
pub fn context(
    signaling: &Arc<RecordingSignaling>,
    connector: &Arc<MockConnector>,
    surface: &Arc<MockSurface>,
) -> SessionContext {
    SessionContext {
        config: Arc::new(AvatarStreamConfig::default()),
        signaling: signaling.clone(),
        connector: connector.clone(),
        surface: surface.render_surface(),
        events: EventBus::new(),
    }
}
