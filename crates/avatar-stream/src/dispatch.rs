//! Speech dispatch for one live stream
//!
//! At most one animation request is in flight. While the avatar is speaking,
//! new text replaces whatever is waiting in the single pending slot, so only
//! the latest utterance survives. Requests arriving within the debounce
//! window of the previous dispatch are dropped outright.
//!
//! The provider gives no "finished speaking" signal, so the end of an
//! utterance is estimated from its length.

use crate::config::DispatchConfig;
use crate::error::{Error, Result};
use crate::events::{AvatarEvent, EventBus};
use crate::signaling::{AvatarSignaling, StreamIds};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// What happened to an enqueued utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechOutcome {
    /// Sent to the provider right away
    Dispatched,
    /// Parked in the pending slot until the current utterance ends
    Queued,
    /// Dropped, too close to the previous dispatch
    Debounced,
}

/// Estimated time the avatar needs to speak `text`
///
/// Characters over `chars_per_second`, never less than `min_speaking`.
pub fn estimate_speaking_duration(text: &str, config: &DispatchConfig) -> Duration {
    let chars = text.chars().count() as f64;
    let estimate = if config.chars_per_second > 0.0 {
        Duration::from_secs_f64(chars / config.chars_per_second)
    } else {
        Duration::ZERO
    };
    estimate.max(config.min_speaking())
}

#[derive(Default)]
struct DispatchState {
    speaking: bool,
    pending: Option<String>,
    last_dispatch_at: Option<Instant>,
    /// Task currently driving an utterance: a retrying dispatch or the
    /// speaking timer
    active: Option<AbortHandle>,
    closed: bool,
}

struct DispatcherInner {
    signaling: Arc<dyn AvatarSignaling>,
    ids: StreamIds,
    config: DispatchConfig,
    events: EventBus,
    state: Mutex<DispatchState>,
}

/// Serializes animation requests for one stream
#[derive(Clone)]
pub struct SpeechDispatcher {
    inner: Arc<DispatcherInner>,
}

impl SpeechDispatcher {
    pub fn new(
        signaling: Arc<dyn AvatarSignaling>,
        ids: StreamIds,
        config: DispatchConfig,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                signaling,
                ids,
                config,
                events,
                state: Mutex::new(DispatchState::default()),
            }),
        }
    }

    /// Speak `text`, queue it, or drop it
    ///
    /// An immediate dispatch runs in its own task and is awaited through all
    /// of its retries, so an exhausted dispatch surfaces here as
    /// `Error::Animation`. Dropping the returned future does not cancel it.
    pub async fn enqueue_speech(&self, text: &str) -> Result<SpeechOutcome> {
        let handle = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(self.inner.closed_error());
            }

            let now = Instant::now();
            if let Some(last) = state.last_dispatch_at {
                if now.duration_since(last) < self.inner.config.debounce_window() {
                    debug!(stream_id = %self.inner.ids, "Debounced speech request");
                    return Ok(SpeechOutcome::Debounced);
                }
            }

            if state.speaking || state.pending.is_some() {
                if state.pending.is_some() {
                    debug!(stream_id = %self.inner.ids, "Replacing pending utterance");
                }
                state.pending = Some(text.to_string());
                return Ok(SpeechOutcome::Queued);
            }

            state.speaking = true;
            state.last_dispatch_at = Some(now);
            self.inner.events.emit(AvatarEvent::SpeakingChanged(true));
            let handle = tokio::spawn(Arc::clone(&self.inner).dispatch_task(text.to_string()));
            state.active = Some(handle.abort_handle());
            handle
        };

        match handle.await {
            Ok(result) => result.map(|()| SpeechOutcome::Dispatched),
            Err(e) if e.is_cancelled() => Err(self.inner.closed_error()),
            Err(e) => Err(Error::Internal(format!("dispatch task failed: {}", e))),
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.inner.state.lock().speaking
    }

    pub fn pending(&self) -> Option<String> {
        self.inner.state.lock().pending.clone()
    }

    /// Cancel the running dispatch or speaking timer and drop the pending
    /// utterance
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        state.pending = None;
        state.speaking = false;
        if let Some(active) = state.active.take() {
            active.abort();
        }
    }
}

impl DispatcherInner {
    fn closed_error(&self) -> Error {
        Error::SessionClosed(format!("dispatcher for stream {} is shut down", self.ids))
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    // Boxed so the tasks spawned from `dispatch` do not make it a recursive
    // opaque type
    fn dispatch_task(self: Arc<Self>, text: String) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move { self.dispatch(text).await })
    }

    /// Send `text` with bounded retry; the speaking flag is already set
    async fn dispatch(self: &Arc<Self>, text: String) -> Result<()> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempts = 0;

        let last_error = loop {
            if self.is_closed() {
                return Err(self.closed_error());
            }
            attempts += 1;
            match self.signaling.request_animation(&self.ids, &text).await {
                Ok(()) => {
                    info!(
                        stream_id = %self.ids,
                        attempts,
                        chars = text.chars().count(),
                        "Animation requested"
                    );
                    self.start_speaking_timer(&text);
                    return Ok(());
                }
                Err(e) => {
                    warn!(stream_id = %self.ids, attempt = attempts, "Animation request failed: {}", e);
                    if attempts >= max_attempts || !e.is_retryable() {
                        break e;
                    }
                    tokio::time::sleep(self.config.retry_delay()).await;
                }
            }
        };

        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(self.closed_error());
            }
            state.speaking = false;
            state.active = None;
            self.events.emit(AvatarEvent::SpeakingChanged(false));

            if let Some(next) = state.pending.take() {
                let handle = tokio::spawn(Arc::clone(self).drain_pending(next));
                state.active = Some(handle.abort_handle());
            }
        }

        Err(Error::Animation {
            attempts,
            message: last_error.to_string(),
        })
    }

    fn start_speaking_timer(self: &Arc<Self>, text: &str) {
        let duration = estimate_speaking_duration(text, &self.config);

        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        // The previous holder is the task running this call; it returns
        // right after, so it is replaced rather than aborted.
        let timer = tokio::spawn(Arc::clone(self).speaking_timer(duration));
        state.active = Some(timer.abort_handle());
    }

    fn speaking_timer(self: Arc<Self>, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            tokio::time::sleep(duration).await;
            self.on_speaking_finished().await;
        })
    }

    fn drain_pending(self: Arc<Self>, text: String) -> BoxFuture<'static, ()> {
        Box::pin(async move { self.dispatch_pending(text).await })
    }

    async fn on_speaking_finished(self: &Arc<Self>) {
        let next = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            let next = state.pending.take();
            // Stay speaking when a queued utterance takes over, so no other
            // caller can slip in between
            state.speaking = next.is_some();
            if next.is_some() {
                state.last_dispatch_at = Some(Instant::now());
            } else {
                state.active = None;
            }
            next
        };

        self.events.emit(AvatarEvent::SpeakingChanged(false));

        if let Some(next) = next {
            self.events.emit(AvatarEvent::SpeakingChanged(true));
            if let Err(e) = self.dispatch(next).await {
                warn!(stream_id = %self.ids, "Queued utterance dropped: {}", e);
            }
        }
    }

    async fn dispatch_pending(self: &Arc<Self>, text: String) {
        {
            let mut state = self.state.lock();
            if state.closed || state.speaking {
                // Something else took the floor; put the text back
                if !state.closed && state.pending.is_none() {
                    state.pending = Some(text);
                }
                return;
            }
            state.speaking = true;
            state.last_dispatch_at = Some(Instant::now());
        }
        self.events.emit(AvatarEvent::SpeakingChanged(true));
        if let Err(e) = self.dispatch(text).await {
            warn!(stream_id = %self.ids, "Queued utterance dropped: {}", e);
        }
    }
}
