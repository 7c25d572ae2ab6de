use super::{ExitReason, SessionOutcome, SessionState};
use chrono::{DateTime, Utc};
use russh::ChannelId;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

/// State one session shares between the SSH engine callbacks and its driver.
///
/// `attempts` has a single writer, [`SessionShared::record_attempt`], called
/// from the callback handler; the state machine only reads it.
#[derive(Debug, Default)]
pub struct SessionShared {
    attempts: AtomicU32,
    attempt_signal: Notify,
    channels: Mutex<Vec<ChannelId>>,
}

impl SessionShared {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one attempt unless `max_attempts` is already reached.
    ///
    /// Returns the 1-based index of the counted attempt, `None` past the limit.
    pub fn record_attempt(&self, max_attempts: u32) -> Option<u32> {
        let previous = self
            .attempts
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max_attempts).then_some(n + 1)
            })
            .ok()?;
        self.attempt_signal.notify_one();
        Some(previous + 1)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    /// Resolves after the next counted attempt, or immediately if one was
    /// counted since the last call.
    pub async fn attempt_made(&self) {
        self.attempt_signal.notified().await
    }

    pub fn register_channel(&self, id: ChannelId) {
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(id);
    }

    /// Hands out the channels opened so far; each id is returned once.
    pub fn take_channels(&self) -> Vec<ChannelId> {
        std::mem::take(
            &mut *self
                .channels
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }
}

/// One-line summary logged when a session ends.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub peer: SocketAddr,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub exit_reason: Option<ExitReason>,
    pub final_state: SessionState,
    pub attempts: u32,
    pub captured: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionReport {
    pub fn from_outcome(
        session_id: Uuid,
        peer: SocketAddr,
        started_at: DateTime<Utc>,
        outcome: &SessionOutcome,
        captured: usize,
    ) -> Self {
        Self {
            session_id,
            peer,
            started_at,
            ended_at: Utc::now(),
            exit_reason: Some(outcome.reason),
            final_state: outcome.final_state,
            attempts: outcome.attempts,
            captured,
            error: None,
        }
    }

    /// Report of a session aborted for a protocol failure.
    pub fn aborted(
        session_id: Uuid,
        peer: SocketAddr,
        started_at: DateTime<Utc>,
        attempts: u32,
        captured: usize,
        error: String,
    ) -> Self {
        Self {
            session_id,
            peer,
            started_at,
            ended_at: Utc::now(),
            exit_reason: None,
            final_state: SessionState::ForceAborted,
            attempts,
            captured,
            error: Some(error),
        }
    }
}
