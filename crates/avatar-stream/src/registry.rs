//! Session registry
//!
//! The host's entry point. A registry holds at most one live session and
//! guarantees that concurrent `speak` calls for the same avatar share one
//! negotiation. Switching avatars tears the old session down completely
//! before the new stream is created.

use crate::config::AvatarStreamConfig;
use crate::dispatch::SpeechOutcome;
use crate::error::{Error, Result};
use crate::events::{AvatarEvent, EventBus};
use crate::fallback::ClipFallback;
use crate::media::RenderSurface;
use crate::peer::PeerConnector;
use crate::session::{PeerSession, SessionContext, SessionState};
use crate::signaling::{AvatarSignaling, StreamIds};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

type SessionFuture = Shared<BoxFuture<'static, Result<Arc<PeerSession>>>>;

/// Result of a registry `speak`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeakOutcome {
    /// Sent to the live stream
    Dispatched,
    /// Waiting for the current utterance to finish
    Queued,
    /// Dropped by the debounce window
    Debounced,
    /// Live streaming was unavailable; a rendered clip is playing
    Clip { url: String },
}

impl From<SpeechOutcome> for SpeakOutcome {
    fn from(outcome: SpeechOutcome) -> Self {
        match outcome {
            SpeechOutcome::Dispatched => SpeakOutcome::Dispatched,
            SpeechOutcome::Queued => SpeakOutcome::Queued,
            SpeechOutcome::Debounced => SpeakOutcome::Debounced,
        }
    }
}

struct InFlight {
    id: u64,
    avatar_ref: String,
    future: SessionFuture,
}

#[derive(Default)]
struct RegistryState {
    current: Option<Arc<PeerSession>>,
    in_flight: Option<InFlight>,
}

enum Step {
    Ready(Arc<PeerSession>),
    Join(u64, SessionFuture),
    WaitOther(u64, SessionFuture),
}

struct RegistryInner {
    ctx: SessionContext,
    fallback: ClipFallback,
    state: Mutex<RegistryState>,
    next_id: AtomicU64,
}

/// Cloneable handle to the single live avatar session
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    /// Build a registry; no session is created until the first `speak`
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if `config` fails validation.
    pub fn new(
        config: AvatarStreamConfig,
        signaling: Arc<dyn AvatarSignaling>,
        connector: Arc<dyn PeerConnector>,
        surface: RenderSurface,
    ) -> Result<Self> {
        config.validate()?;

        let events = EventBus::new();
        let fallback = ClipFallback::new(
            signaling.clone(),
            surface.video.clone(),
            config.clip_fallback.clone(),
            events.clone(),
        );
        let ctx = SessionContext {
            config: Arc::new(config),
            signaling,
            connector,
            surface,
            events,
        };

        Ok(Self {
            inner: Arc::new(RegistryInner {
                ctx,
                fallback,
                state: Mutex::new(RegistryState::default()),
                next_id: AtomicU64::new(1),
            }),
        })
    }

    /// Speak `text` as the avatar at `avatar_ref`
    ///
    /// Creates or replaces the session as needed. When the stream cannot be
    /// brought up, or the immediate dispatch exhausts its retries, the clip
    /// fallback runs if enabled; if that fails too, the original error is
    /// returned.
    #[instrument(skip(self, text), fields(chars = text.chars().count()))]
    pub async fn speak(&self, text: &str, avatar_ref: &str) -> Result<SpeakOutcome> {
        let session = match self.session_for(avatar_ref).await {
            Ok(session) => session,
            Err(e) => return self.fall_back(text, avatar_ref, e).await,
        };

        match session.speak(text).await {
            Ok(outcome) => Ok(outcome.into()),
            Err(e @ Error::Animation { .. }) => self.fall_back(text, avatar_ref, e).await,
            Err(e) => Err(e),
        }
    }

    /// Return a healthy session for `avatar_ref`, creating it if needed
    ///
    /// Callers for the same avatar share one in-flight creation.
    pub async fn session_for(&self, avatar_ref: &str) -> Result<Arc<PeerSession>> {
        loop {
            let step = {
                let mut state = self.inner.state.lock();
                self.next_step(&mut state, avatar_ref)
            };

            match step {
                Step::Ready(session) => return Ok(session),
                Step::Join(id, future) => {
                    let result = future.await;
                    self.finish(id, &result);
                    match result {
                        Ok(session) if !session.is_healthy() => {
                            debug!(
                                avatar_ref,
                                stream_id = %session.ids(),
                                state = %session.state(),
                                "Joined session is no longer healthy, replacing it"
                            );
                        }
                        other => return other,
                    }
                }
                Step::WaitOther(id, future) => {
                    debug!(avatar_ref, "Waiting for another avatar's session to settle");
                    let result = future.await;
                    self.finish(id, &result);
                }
            }
        }
    }

    fn next_step(&self, state: &mut RegistryState, avatar_ref: &str) -> Step {
        if let Some(current) = &state.current {
            if current.avatar_ref() == avatar_ref && current.is_healthy() {
                return Step::Ready(current.clone());
            }
        }

        if let Some(in_flight) = &state.in_flight {
            return if in_flight.avatar_ref == avatar_ref {
                Step::Join(in_flight.id, in_flight.future.clone())
            } else {
                Step::WaitOther(in_flight.id, in_flight.future.clone())
            };
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let stale = state.current.take();
        let handle = tokio::spawn(create_session(
            self.inner.ctx.clone(),
            stale,
            avatar_ref.to_string(),
        ));
        let future = async move {
            handle
                .await
                .unwrap_or_else(|e| Err(Error::Internal(format!("session task failed: {}", e))))
        }
        .boxed()
        .shared();

        state.in_flight = Some(InFlight {
            id,
            avatar_ref: avatar_ref.to_string(),
            future: future.clone(),
        });
        Step::Join(id, future)
    }

    /// Clear the in-flight slot for `id` and install a successful result
    fn finish(&self, id: u64, result: &Result<Arc<PeerSession>>) {
        let mut state = self.inner.state.lock();
        if state.in_flight.as_ref().map(|f| f.id) != Some(id) {
            return;
        }
        state.in_flight = None;
        if let Ok(session) = result {
            state.current = Some(session.clone());
        }
    }

    async fn fall_back(&self, text: &str, avatar_ref: &str, original: Error) -> Result<SpeakOutcome> {
        if !self.inner.fallback.is_enabled() {
            return Err(original);
        }

        warn!("Live stream unavailable, rendering clip: {}", original);
        match self.inner.fallback.play(avatar_ref, text).await {
            Ok(url) => Ok(SpeakOutcome::Clip { url }),
            Err(e) => {
                warn!("Clip fallback failed: {}", e);
                Err(original)
            }
        }
    }

    /// Tear down the current session, waiting for any in-flight creation
    pub async fn shutdown(&self) {
        let in_flight = self.inner.state.lock().in_flight.take();
        if let Some(in_flight) = in_flight {
            if let Ok(session) = in_flight.future.await {
                session.teardown().await;
            }
        }

        let current = self.inner.state.lock().current.take();
        if let Some(session) = current {
            info!(stream_id = %session.ids(), "Shutting down avatar session");
            session.teardown().await;
        }
    }

    /// State of the current session, `Idle` when there is none
    pub fn state(&self) -> SessionState {
        let state = self.inner.state.lock();
        match &state.current {
            Some(session) => session.state(),
            None if state.in_flight.is_some() => SessionState::Connecting,
            None => SessionState::Idle,
        }
    }

    pub fn current_stream(&self) -> Option<StreamIds> {
        self.inner
            .state
            .lock()
            .current
            .as_ref()
            .map(|s| s.ids().clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AvatarEvent> {
        self.inner.ctx.events.subscribe()
    }
}

async fn create_session(
    ctx: SessionContext,
    stale: Option<Arc<PeerSession>>,
    avatar_ref: String,
) -> Result<Arc<PeerSession>> {
    if let Some(stale) = stale {
        info!(
            stream_id = %stale.ids(),
            from = stale.avatar_ref(),
            to = %avatar_ref,
            "Replacing avatar session"
        );
        stale.teardown().await;
    }
    PeerSession::establish(ctx, &avatar_ref).await
}
