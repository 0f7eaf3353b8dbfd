//! Local ICE candidate sequencing
//!
//! The provider only accepts candidates for a stream whose SDP answer it has
//! already seen. Candidates gathered before that are buffered here and
//! flushed in gathering order once the session marks the handshake complete;
//! later candidates trickle straight through. The end-of-candidates marker
//! goes out once, last, and only after local gathering has finished.

use crate::error::Result;
use crate::signaling::{AvatarSignaling, LocalIceCandidate, StreamIds};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct IceState {
    queue: VecDeque<LocalIceCandidate>,
    handshake_complete: bool,
    gathering_complete: bool,
    sentinel_sent: bool,
    closed: bool,
}

/// Orders local ICE candidates behind the SDP handshake
///
/// The state lock is held across the signaling sends so concurrent flush
/// triggers never interleave or duplicate submissions.
pub struct IceCoordinator {
    signaling: Arc<dyn AvatarSignaling>,
    ids: StreamIds,
    state: Mutex<IceState>,
}

impl IceCoordinator {
    pub fn new(signaling: Arc<dyn AvatarSignaling>, ids: StreamIds) -> Self {
        Self {
            signaling,
            ids,
            state: Mutex::new(IceState::default()),
        }
    }

    /// Queue a gathered candidate, sending it at once after the handshake
    pub async fn enqueue(&self, candidate: LocalIceCandidate) -> Result<usize> {
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return Ok(0);
            }
            if state.sentinel_sent {
                debug!(stream_id = %self.ids, "Dropping candidate gathered after end-of-candidates");
                return Ok(0);
            }
            trace!(stream_id = %self.ids, candidate = %candidate.candidate, "Queued local candidate");
            state.queue.push_back(candidate);
        }
        self.flush().await
    }

    /// Record that local gathering finished
    pub async fn mark_gathering_complete(&self) -> Result<usize> {
        self.state.lock().await.gathering_complete = true;
        self.flush().await
    }

    /// Record that the provider accepted the local answer
    pub async fn mark_handshake_complete(&self) -> Result<usize> {
        self.state.lock().await.handshake_complete = true;
        self.flush().await
    }

    /// Send everything that may be sent; returns the number of submissions
    ///
    /// No-op until the handshake completes. A failed send leaves that
    /// candidate at the head of the queue.
    pub async fn flush(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        if state.closed || !state.handshake_complete {
            return Ok(0);
        }

        let mut sent = 0;
        while let Some(candidate) = state.queue.pop_front() {
            if let Err(e) = self
                .signaling
                .submit_ice_candidate(&self.ids, Some(&candidate))
                .await
            {
                state.queue.push_front(candidate);
                return Err(e);
            }
            sent += 1;
        }

        if state.gathering_complete && !state.sentinel_sent {
            self.signaling
                .submit_ice_candidate(&self.ids, None)
                .await?;
            state.sentinel_sent = true;
            sent += 1;
            debug!(stream_id = %self.ids, "Sent end-of-candidates");
        }

        Ok(sent)
    }

    /// Drop queued candidates and ignore everything after
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.queue.clear();
        state.closed = true;
    }

    pub async fn pending(&self) -> usize {
        self.state.lock().await.queue.len()
    }
}
