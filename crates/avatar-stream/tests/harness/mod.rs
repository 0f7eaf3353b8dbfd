//! Avatar session test harness
//!
//! Scripted doubles for the three seams of the crate:
//! - `ScriptedSignaling` for the provider relay
//! - `ScriptedConnector` for the WebRTC peer link
//! - `TestSurface` for the host's video element and overlay
//!
//! Every signaling call and link close lands on one shared [`Timeline`], so
//! tests can assert cross-component ordering ("link closed before the next
//! stream was created").
//!
//! Basic usage pattern:
//!
//! 1. Build an `AvatarTestHarness`, optionally with scripts
//! 2. Drive `harness.registry`
//! 3. Assert on `harness.timeline` and events from `harness.registry.subscribe()`

#![allow(dead_code)]

use async_trait::async_trait;
use avatar_stream::{
    AvatarEvent, AvatarSignaling, AvatarStreamConfig, ClipState, ClipStatus, CreatedStream, Error,
    IceServer, InboundTrack, LocalIceCandidate, OverlaySurface, PeerConnectionState,
    PeerConnector, PeerEvent, PeerLink, RenderSurface, Result, SessionRegistry, SignalingAction,
    StreamIds, TrackKind, VideoSource,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

// ============================================================================
// Timeline
// ============================================================================

/// Ordered log of observable side effects
#[derive(Default)]
pub struct Timeline {
    entries: Mutex<Vec<String>>,
}

impl Timeline {
    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.matching(prefix).len()
    }

    /// Index of the first entry starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.entries().iter().position(|e| e.starts_with(prefix))
    }
}

// ============================================================================
// Signaling
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct SignalingScript {
    pub create_delay: Duration,
    pub start_delay: Duration,
    pub fail_create: bool,
    pub speak_failures: u32,
}

pub struct ScriptedSignaling {
    timeline: Arc<Timeline>,
    script: Mutex<SignalingScript>,
    streams: AtomicU32,
}

impl ScriptedSignaling {
    pub fn new(timeline: Arc<Timeline>, script: SignalingScript) -> Self {
        Self {
            timeline,
            script: Mutex::new(script),
            streams: AtomicU32::new(0),
        }
    }

    pub fn fail_speak(&self, n: u32) {
        self.script.lock().speak_failures = n;
    }
}

#[async_trait]
impl AvatarSignaling for ScriptedSignaling {
    async fn create_stream(&self, source_url: &str) -> Result<CreatedStream> {
        self.timeline.push(format!("create:{source_url}"));
        let script = self.script.lock().clone();
        tokio::time::sleep(script.create_delay).await;
        if script.fail_create {
            return Err(Error::signaling(
                SignalingAction::CreateStream,
                Some(502),
                "bad gateway",
            ));
        }

        let n = self.streams.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CreatedStream {
            ids: StreamIds {
                stream_id: format!("strm_{n}"),
                session_id: format!("sess_{n}"),
            },
            offer_sdp: format!("offer {n}"),
            ice_servers: vec![IceServer {
                urls: vec!["stun:stun.example.com:3478".to_string()],
                username: None,
                credential: None,
            }],
        })
    }

    async fn start_stream(&self, ids: &StreamIds, _answer_sdp: &str) -> Result<()> {
        let delay = self.script.lock().start_delay;
        tokio::time::sleep(delay).await;
        self.timeline.push(format!("start:{}", ids.stream_id));
        Ok(())
    }

    async fn submit_ice_candidate(
        &self,
        ids: &StreamIds,
        candidate: Option<&LocalIceCandidate>,
    ) -> Result<()> {
        let what = candidate.map_or("end".to_string(), |c| c.candidate.clone());
        self.timeline.push(format!("ice:{}:{}", ids.stream_id, what));
        Ok(())
    }

    async fn request_animation(&self, ids: &StreamIds, text: &str) -> Result<()> {
        self.timeline.push(format!("speak:{}:{}", ids.stream_id, text));
        let mut script = self.script.lock();
        if script.speak_failures > 0 {
            script.speak_failures -= 1;
            return Err(Error::signaling(SignalingAction::Speak, Some(503), "busy"));
        }
        Ok(())
    }

    async fn delete_stream(&self, ids: &StreamIds) -> Result<()> {
        self.timeline.push(format!("delete:{}", ids.stream_id));
        Ok(())
    }

    async fn create_clip(&self, source_url: &str, text: &str) -> Result<String> {
        self.timeline.push(format!("clip:{source_url}:{text}"));
        Ok("clip_1".to_string())
    }

    async fn get_clip(&self, clip_id: &str) -> Result<ClipState> {
        self.timeline.push(format!("poll:{clip_id}"));
        Ok(ClipState {
            status: ClipStatus::Done,
            result_url: Some(format!("https://clips.example.com/{clip_id}.mp4")),
            error: None,
        })
    }
}

// ============================================================================
// Peer link
// ============================================================================

/// When a link produces its callbacks
#[derive(Debug, Clone)]
pub struct LinkScript {
    /// Candidates gathered while the answer is being created
    pub early_candidates: u32,
    /// Candidates gathered afterwards
    pub late_candidates: u32,
    /// Delay before the late batch
    pub late_delay: Duration,
    /// Report gathering complete with the early batch instead of the late one
    pub gathering_early: bool,
    /// Connect and deliver a video track after the late batch
    pub deliver_media: bool,
}

impl Default for LinkScript {
    fn default() -> Self {
        Self {
            early_candidates: 2,
            late_candidates: 1,
            late_delay: Duration::from_millis(10),
            gathering_early: false,
            deliver_media: true,
        }
    }
}

pub struct ScriptedLink {
    name: String,
    timeline: Arc<Timeline>,
    events: mpsc::Sender<PeerEvent>,
    state: Arc<Mutex<PeerConnectionState>>,
    closed: AtomicBool,
    script: LinkScript,
}

fn candidate(link: &str, n: u32) -> LocalIceCandidate {
    LocalIceCandidate {
        candidate: format!("{link}-c{n}"),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
    }
}

impl ScriptedLink {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Change the state the health check will observe
    pub fn set_state_silently(&self, state: PeerConnectionState) {
        *self.state.lock() = state;
    }

    /// Change the state and report it through the state callback
    pub async fn report_state(&self, state: PeerConnectionState) {
        *self.state.lock() = state;
        let _ = self.events.send(PeerEvent::ConnectionState(state)).await;
    }
}

#[async_trait]
impl PeerLink for ScriptedLink {
    async fn accept_offer(&self, offer_sdp: &str) -> Result<String> {
        for n in 1..=self.script.early_candidates {
            let _ = self
                .events
                .send(PeerEvent::IceCandidate(candidate(&self.name, n)))
                .await;
        }
        if self.script.gathering_early {
            let _ = self.events.send(PeerEvent::GatheringComplete).await;
        }

        let events = self.events.clone();
        let state = self.state.clone();
        let script = self.script.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            tokio::time::sleep(script.late_delay).await;
            let first = script.early_candidates + 1;
            for n in first..first + script.late_candidates {
                let _ = events
                    .send(PeerEvent::IceCandidate(candidate(&name, n)))
                    .await;
            }
            if !script.gathering_early {
                let _ = events.send(PeerEvent::GatheringComplete).await;
            }
            if script.deliver_media {
                *state.lock() = PeerConnectionState::Connected;
                let _ = events
                    .send(PeerEvent::ConnectionState(PeerConnectionState::Connected))
                    .await;
                let _ = events
                    .send(PeerEvent::TrackReceived(InboundTrack {
                        kind: TrackKind::Audio,
                        id: format!("{name}-audio"),
                        remote: None,
                    }))
                    .await;
                let _ = events
                    .send(PeerEvent::TrackReceived(InboundTrack {
                        kind: TrackKind::Video,
                        id: format!("{name}-video"),
                        remote: None,
                    }))
                    .await;
            }
        });

        Ok(format!("answer to {offer_sdp}"))
    }

    fn connection_state(&self) -> PeerConnectionState {
        *self.state.lock()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        *self.state.lock() = PeerConnectionState::Closed;
        self.timeline.push(format!("close:{}", self.name));
        Ok(())
    }
}

pub struct ScriptedConnector {
    timeline: Arc<Timeline>,
    script: LinkScript,
    links: Mutex<Vec<Arc<ScriptedLink>>>,
}

impl ScriptedConnector {
    pub fn new(timeline: Arc<Timeline>, script: LinkScript) -> Self {
        Self {
            timeline,
            script,
            links: Mutex::new(Vec::new()),
        }
    }

    pub fn links(&self) -> Vec<Arc<ScriptedLink>> {
        self.links.lock().clone()
    }

    pub fn link(&self, n: usize) -> Arc<ScriptedLink> {
        self.links()[n].clone()
    }
}

#[async_trait]
impl PeerConnector for ScriptedConnector {
    async fn connect(
        &self,
        ice_servers: &[IceServer],
        events: mpsc::Sender<PeerEvent>,
    ) -> Result<Arc<dyn PeerLink>> {
        assert!(!ice_servers.is_empty(), "provider ICE servers not forwarded");
        let mut links = self.links.lock();
        let link = Arc::new(ScriptedLink {
            name: format!("link{}", links.len() + 1),
            timeline: self.timeline.clone(),
            events,
            state: Arc::new(Mutex::new(PeerConnectionState::New)),
            closed: AtomicBool::new(false),
            script: self.script.clone(),
        });
        links.push(link.clone());
        Ok(link)
    }
}

// ============================================================================
// Surface
// ============================================================================

#[derive(Default)]
struct SurfaceState {
    tracks: Vec<String>,
    playing: bool,
    frame: Option<(u32, u32, Vec<u8>)>,
    presented: Option<Vec<u8>>,
    visible: bool,
    played_urls: Vec<String>,
}

/// Video element and overlay; plays as soon as a video track is attached
#[derive(Default)]
pub struct TestSurface {
    state: Mutex<SurfaceState>,
}

impl TestSurface {
    pub fn set_frame(&self, width: u32, height: u32, rgba: Vec<u8>) {
        self.state.lock().frame = Some((width, height, rgba));
    }

    pub fn tracks(&self) -> Vec<String> {
        self.state.lock().tracks.clone()
    }

    pub fn last_presented(&self) -> Option<Vec<u8>> {
        self.state.lock().presented.clone()
    }

    pub fn visible(&self) -> bool {
        self.state.lock().visible
    }

    pub fn played_urls(&self) -> Vec<String> {
        self.state.lock().played_urls.clone()
    }
}

impl VideoSource for TestSurface {
    fn attach_track(&self, track: &InboundTrack) {
        let mut state = self.state.lock();
        state.tracks.push(track.id.clone());
        if track.is_video() {
            state.playing = true;
        }
    }

    fn detach(&self) {
        self.state.lock().playing = false;
    }

    fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.state.lock().frame.as_ref().map(|(w, h, _)| (*w, *h))
    }

    fn draw_frame(&self, rgba: &mut [u8]) -> bool {
        match &self.state.lock().frame {
            Some((_, _, frame)) if frame.len() == rgba.len() => {
                rgba.copy_from_slice(frame);
                true
            }
            _ => false,
        }
    }

    fn play_url(&self, url: &str) -> Result<()> {
        self.state.lock().played_urls.push(url.to_string());
        Ok(())
    }
}

impl OverlaySurface for TestSurface {
    fn resize(&self, _width: u32, _height: u32) {}

    fn present(&self, rgba: &[u8], _width: u32, _height: u32) {
        self.state.lock().presented = Some(rgba.to_vec());
    }

    fn set_visible(&self, visible: bool) {
        self.state.lock().visible = visible;
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct AvatarTestHarness {
    pub registry: SessionRegistry,
    pub timeline: Arc<Timeline>,
    pub signaling: Arc<ScriptedSignaling>,
    pub connector: Arc<ScriptedConnector>,
    pub surface: Arc<TestSurface>,
}

impl AvatarTestHarness {
    pub fn new() -> Self {
        Self::with_scripts(
            AvatarStreamConfig::default(),
            SignalingScript::default(),
            LinkScript::default(),
        )
    }

    pub fn with_scripts(
        config: AvatarStreamConfig,
        signaling: SignalingScript,
        link: LinkScript,
    ) -> Self {
        let timeline = Arc::new(Timeline::default());
        let signaling = Arc::new(ScriptedSignaling::new(timeline.clone(), signaling));
        let connector = Arc::new(ScriptedConnector::new(timeline.clone(), link));
        let surface = Arc::new(TestSurface::default());

        let registry = SessionRegistry::new(
            config,
            signaling.clone(),
            connector.clone(),
            RenderSurface::new(surface.clone(), surface.clone()),
        )
        .expect("valid test config");

        Self {
            registry,
            timeline,
            signaling,
            connector,
            surface,
        }
    }

    /// Config with the clip fallback switched off
    pub fn without_fallback() -> AvatarStreamConfig {
        let mut config = AvatarStreamConfig::default();
        config.clip_fallback.enabled = false;
        config
    }
}

/// Everything currently buffered on an event receiver
pub fn drain_events(rx: &mut broadcast::Receiver<AvatarEvent>) -> Vec<AvatarEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Initialize test logging (call once per test)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,avatar_stream=debug")
        .with_test_writer()
        .try_init();
}
