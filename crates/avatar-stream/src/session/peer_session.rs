//! One provider stream, from offer to teardown

use super::SessionState;
use crate::compositor::CompositorLoop;
use crate::config::AvatarStreamConfig;
use crate::dispatch::{SpeechDispatcher, SpeechOutcome};
use crate::error::{Error, Result};
use crate::events::{AvatarEvent, EventBus};
use crate::ice::IceCoordinator;
use crate::media::RenderSurface;
use crate::peer::{PeerConnectionState, PeerConnector, PeerEvent, PeerLink, PEER_EVENT_CAPACITY};
use crate::signaling::{AvatarSignaling, StreamIds};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Collaborators shared by every session of a registry
#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<AvatarStreamConfig>,
    pub signaling: Arc<dyn AvatarSignaling>,
    pub connector: Arc<dyn PeerConnector>,
    pub surface: RenderSurface,
    pub events: EventBus,
}

#[derive(Default)]
struct SessionTasks {
    event_pump: Option<JoinHandle<()>>,
    health: Option<JoinHandle<()>>,
    compositor: Option<CompositorLoop>,
}

/// A negotiated stream with its peer link, dispatcher and render loop
///
/// Built only through [`PeerSession::establish`], which either returns a
/// `Connected` session or releases everything it acquired.
pub struct PeerSession {
    correlation_id: String,
    avatar_ref: String,
    ids: StreamIds,
    ctx: SessionContext,
    state: Mutex<SessionState>,
    link_state: Mutex<PeerConnectionState>,
    video_received: AtomicBool,
    link: Arc<dyn PeerLink>,
    ice: Arc<IceCoordinator>,
    dispatcher: SpeechDispatcher,
    tasks: Mutex<SessionTasks>,
    teardown_done: tokio::sync::Mutex<bool>,
}

fn as_negotiation(e: Error) -> Error {
    match e {
        Error::Negotiation(_) => e,
        other => Error::Negotiation(other.to_string()),
    }
}

impl PeerSession {
    /// Create a stream for `avatar_ref` and bring it to `Connected`
    ///
    /// # Errors
    ///
    /// Any failure before the session is live is returned as
    /// `Error::Negotiation`; partial resources are released first.
    #[instrument(skip(ctx))]
    pub async fn establish(ctx: SessionContext, avatar_ref: &str) -> Result<Arc<Self>> {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        info!(correlation_id = %correlation_id, "Establishing avatar session");
        ctx.events.emit(AvatarEvent::StateChanged {
            stream_id: String::new(),
            from: SessionState::Idle,
            to: SessionState::Connecting,
        });

        let created = match ctx.signaling.create_stream(avatar_ref).await {
            Ok(created) => created,
            Err(e) => {
                error!(correlation_id = %correlation_id, "Failed to create stream: {}", e);
                ctx.events.emit(AvatarEvent::StateChanged {
                    stream_id: String::new(),
                    from: SessionState::Connecting,
                    to: SessionState::Failed,
                });
                return Err(as_negotiation(e));
            }
        };
        let ids = created.ids.clone();

        let (tx, rx) = mpsc::channel(PEER_EVENT_CAPACITY);
        let link = match ctx.connector.connect(&created.ice_servers, tx).await {
            Ok(link) => link,
            Err(e) => {
                error!(stream_id = %ids, "Failed to build peer link: {}", e);
                ctx.events.emit(AvatarEvent::StateChanged {
                    stream_id: ids.stream_id.clone(),
                    from: SessionState::Connecting,
                    to: SessionState::Failed,
                });
                spawn_delete(ctx.signaling.clone(), ids);
                return Err(as_negotiation(e));
            }
        };

        let ice = Arc::new(IceCoordinator::new(ctx.signaling.clone(), ids.clone()));
        let dispatcher = SpeechDispatcher::new(
            ctx.signaling.clone(),
            ids.clone(),
            ctx.config.dispatch.clone(),
            ctx.events.clone(),
        );

        let session = Arc::new(PeerSession {
            correlation_id,
            avatar_ref: avatar_ref.to_string(),
            ids,
            ctx,
            state: Mutex::new(SessionState::Connecting),
            link_state: Mutex::new(PeerConnectionState::New),
            video_received: AtomicBool::new(false),
            link,
            ice,
            dispatcher,
            tasks: Mutex::new(SessionTasks::default()),
            teardown_done: tokio::sync::Mutex::new(false),
        });

        let pump = tokio::spawn(run_event_pump(Arc::downgrade(&session), rx));
        session.tasks.lock().event_pump = Some(pump);

        match session.negotiate(&created.offer_sdp).await {
            Ok(()) => {
                session.on_connected();
                Ok(session)
            }
            Err(e) => {
                error!(stream_id = %session.ids, "Negotiation failed: {}", e);
                session.transition(SessionState::Failed);
                session.teardown().await;
                Err(as_negotiation(e))
            }
        }
    }

    async fn negotiate(&self, offer_sdp: &str) -> Result<()> {
        let answer = self.link.accept_offer(offer_sdp).await?;

        // The provider must see the answer before any candidate
        self.ctx.signaling.start_stream(&self.ids, &answer).await?;
        let flushed = self.ice.mark_handshake_complete().await?;
        debug!(stream_id = %self.ids, flushed, "Handshake complete");
        self.transition(SessionState::AwaitingRemoteMedia);

        let timeout = self.ctx.config.session.connect_timeout();
        tokio::time::timeout(timeout, self.wait_for_media())
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "stream {} not playing after {:?}",
                    self.ids, timeout
                ))
            })?
    }

    /// Wait for a connected link and a playing video track
    async fn wait_for_media(&self) -> Result<()> {
        let mut probe = tokio::time::interval(self.ctx.config.session.media_probe_interval());
        loop {
            probe.tick().await;

            let link_state = *self.link_state.lock();
            if link_state.is_terminal() {
                return Err(Error::Negotiation(format!(
                    "peer link {:?} before media arrived",
                    link_state
                )));
            }
            if link_state == PeerConnectionState::Connected
                && self.video_received.load(Ordering::Acquire)
                && self.ctx.surface.video.is_playing()
            {
                return Ok(());
            }
        }
    }

    fn on_connected(self: &Arc<Self>) {
        self.transition(SessionState::Connected);

        let health = tokio::spawn(run_health_check(
            Arc::downgrade(self),
            self.ctx.config.session.health_check_interval(),
        ));
        let compositor = CompositorLoop::spawn(&self.ctx.surface, &self.ctx.config.compositor);
        {
            let mut tasks = self.tasks.lock();
            tasks.health = Some(health);
            tasks.compositor = Some(compositor);
        }

        info!(stream_id = %self.ids, correlation_id = %self.correlation_id, "Avatar session connected");
        self.ctx.events.emit(AvatarEvent::ConnectionChanged(true));
    }

    /// Speak through this session's dispatcher
    pub async fn speak(&self, text: &str) -> Result<SpeechOutcome> {
        let state = self.state();
        if !state.is_healthy() {
            return Err(Error::SessionClosed(format!(
                "stream {} is {}",
                self.ids, state
            )));
        }
        self.dispatcher.enqueue_speech(text).await
    }

    /// Current state; `Speaking` while connected with an utterance running
    pub fn state(&self) -> SessionState {
        let state = *self.state.lock();
        if state == SessionState::Connected && self.dispatcher.is_speaking() {
            SessionState::Speaking
        } else {
            state
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.state().is_healthy()
    }

    pub fn ids(&self) -> &StreamIds {
        &self.ids
    }

    pub fn avatar_ref(&self) -> &str {
        &self.avatar_ref
    }

    /// Move to `to`, emitting `StateChanged`; returns the previous state
    fn transition(&self, to: SessionState) -> SessionState {
        let from = {
            let mut state = self.state.lock();
            let from = *state;
            if from == to || from.is_terminal() {
                return from;
            }
            *state = to;
            from
        };

        debug!(stream_id = %self.ids, %from, %to, "Session state change");
        self.ctx.events.emit(AvatarEvent::StateChanged {
            stream_id: self.ids.stream_id.clone(),
            from,
            to,
        });
        from
    }

    /// Mark the session failed and tear it down in the background
    ///
    /// Called from the session's own tasks, which must not abort themselves.
    fn fail(self: &Arc<Self>, reason: Error) {
        let from = self.transition(SessionState::Failed);
        if from.is_terminal() {
            return;
        }
        warn!(stream_id = %self.ids, "Avatar session failed: {}", reason);
        if from.is_healthy() {
            self.ctx.events.emit(AvatarEvent::ConnectionChanged(false));
        }

        let this = Arc::clone(self);
        tokio::spawn(async move { this.teardown().await });
    }

    /// Release every resource of the session
    ///
    /// Idempotent; concurrent callers all return once teardown has finished.
    /// The remote delete is spawned and not awaited.
    pub async fn teardown(&self) {
        let mut done = self.teardown_done.lock().await;
        if *done {
            return;
        }

        let from = self.transition(SessionState::Disconnected);
        if from.is_healthy() {
            self.ctx.events.emit(AvatarEvent::ConnectionChanged(false));
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        if let Some(pump) = tasks.event_pump {
            pump.abort();
        }
        if let Some(health) = tasks.health {
            health.abort();
        }
        if let Some(compositor) = tasks.compositor {
            compositor.stop();
        }

        self.dispatcher.shutdown();
        self.ctx.surface.video.detach();

        if let Err(e) = self.link.close().await {
            warn!(stream_id = %self.ids, "Failed to close peer link: {}", e);
        }
        self.ice.reset().await;

        spawn_delete(self.ctx.signaling.clone(), self.ids.clone());

        *done = true;
        info!(stream_id = %self.ids, correlation_id = %self.correlation_id, "Avatar session torn down");
    }

    async fn handle_peer_event(self: &Arc<Self>, event: PeerEvent) {
        match event {
            PeerEvent::IceCandidate(candidate) => {
                if let Err(e) = self.ice.enqueue(candidate).await {
                    warn!(stream_id = %self.ids, "Failed to submit ICE candidate: {}", e);
                }
            }
            PeerEvent::GatheringComplete => {
                if let Err(e) = self.ice.mark_gathering_complete().await {
                    warn!(stream_id = %self.ids, "Failed to submit end-of-candidates: {}", e);
                }
            }
            PeerEvent::ConnectionState(link_state) => {
                *self.link_state.lock() = link_state;
                if link_state.is_terminal() && self.state().is_healthy() {
                    self.fail(Error::WebRtc(format!("peer link {:?}", link_state)));
                }
            }
            PeerEvent::TrackReceived(track) => {
                debug!(stream_id = %self.ids, track_id = %track.id, kind = ?track.kind, "Inbound track");
                self.ctx.surface.video.attach_track(&track);
                if track.is_video() {
                    self.video_received.store(true, Ordering::Release);
                }
            }
        }
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut();
        if let Some(pump) = tasks.event_pump.take() {
            pump.abort();
        }
        if let Some(health) = tasks.health.take() {
            health.abort();
        }
    }
}

async fn run_event_pump(session: Weak<PeerSession>, mut rx: mpsc::Receiver<PeerEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(session) = session.upgrade() else {
            break;
        };
        session.handle_peer_event(event).await;
    }
}

async fn run_health_check(session: Weak<PeerSession>, period: std::time::Duration) {
    let mut ticker = tokio::time::interval(period);
    // First tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(session) = session.upgrade() else {
            break;
        };
        let link_state = session.link.connection_state();
        if link_state != PeerConnectionState::Connected {
            session.fail(Error::HealthCheckFailure(format!(
                "peer link {:?}",
                link_state
            )));
            break;
        }
        debug!(stream_id = %session.ids, "Health check passed");
    }
}

fn spawn_delete(signaling: Arc<dyn AvatarSignaling>, ids: StreamIds) {
    tokio::spawn(async move {
        if let Err(e) = signaling.delete_stream(&ids).await {
            warn!(stream_id = %ids, "Failed to delete remote stream: {}", e);
        }
    });
}
