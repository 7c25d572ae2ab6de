//! Bounded lifetime of one connection.
//!
//! ```text
//!            attempts >= max_attempts          confirmed
//! Pending ──────────────────────────▶ Denied ──┐      ┌──▶ Closed
//!    │                                         ├─▶ Closing
//!    └─────────────────────────────▶ TimedOut ─┘      └──▶ ForceAborted
//!            ticks >= max_pending_ticks               teardown window expired
//! ```
//!
//! Both conditions are checked in that order on every tick and every counted
//! attempt. A connection is released at the latest
//! `max_pending_ticks + max_teardown_ticks` ticks after it was accepted.

use super::connection::Connection;
use super::session::SessionShared;
use super::{ExitReason, SessionOutcome, SessionState};
use crate::configuration::types::SessionPolicy;
use crate::error_handling::types::SessionError;
use log::{debug, trace, warn};
use std::sync::Arc;
use tokio::time::{interval_at, timeout_at, Instant, Interval, MissedTickBehavior};
use uuid::Uuid;

enum PendingEvent {
    Closed(Result<(), SessionError>),
    Attempt,
    Tick,
}

/// Drives one session from `Pending` to the end of its teardown.
pub struct SessionDriver<C: Connection> {
    session_id: Uuid,
    connection: C,
    shared: Arc<SessionShared>,
    policy: SessionPolicy,
    accepted_at: Instant,
    history: Vec<SessionState>,
    pending_ticks: u32,
    teardown_ticks: u32,
    released: bool,
}

impl<C: Connection> SessionDriver<C> {
    pub fn new(
        session_id: Uuid,
        connection: C,
        shared: Arc<SessionShared>,
        policy: SessionPolicy,
    ) -> Self {
        Self {
            session_id,
            connection,
            shared,
            policy,
            accepted_at: Instant::now(),
            history: vec![SessionState::Pending],
            pending_ticks: 0,
            teardown_ticks: 0,
            released: false,
        }
    }

    /// Counts pending ticks from `accepted_at` instead of from construction,
    /// so time spent before the engine took over is part of the budget.
    pub fn accepted_at(mut self, accepted_at: Instant) -> Self {
        self.accepted_at = accepted_at;
        self
    }

    pub fn state(&self) -> SessionState {
        self.history
            .last()
            .copied()
            .unwrap_or(SessionState::Pending)
    }

    /// Runs the session to completion.
    ///
    /// # Errors
    /// - [`SessionError::ProtocolFatal`] if the engine fails while pending;
    ///   the connection is released before returning
    pub async fn run(mut self) -> Result<SessionOutcome, SessionError> {
        let reason = match self.wait_pending().await {
            Ok(reason) => reason,
            Err(e) => {
                warn!("[{}] session aborted: {}", self.session_id, e);
                self.release(false);
                return Err(match e {
                    SessionError::ProtocolFatal(_) => e,
                    other => SessionError::ProtocolFatal(other.to_string()),
                });
            }
        };

        let final_state = self.teardown().await;

        Ok(SessionOutcome {
            reason,
            final_state,
            attempts: self.shared.attempts(),
            pending_ticks: self.pending_ticks,
            teardown_ticks: self.teardown_ticks,
            history: self.history.clone(),
        })
    }

    fn transition(&mut self, next: SessionState) {
        debug!(
            "[{}] session state {:?} -> {:?}",
            self.session_id,
            self.state(),
            next
        );
        self.history.push(next);
    }

    fn ticker(&self, start: Instant) -> Interval {
        let period = self.policy.poll_interval();
        let mut ticker = interval_at(start + period, period);
        // every elapsed period counts, even when the driver was busy
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
        ticker
    }

    fn policy_exit(&mut self) -> Option<ExitReason> {
        if self.shared.attempts() >= self.policy.max_attempts {
            self.transition(SessionState::Denied);
            Some(ExitReason::AttemptsExhausted)
        } else if self.pending_ticks >= self.policy.max_pending_ticks {
            self.transition(SessionState::TimedOut);
            Some(ExitReason::PendingTimeout)
        } else {
            None
        }
    }

    async fn wait_pending(&mut self) -> Result<ExitReason, SessionError> {
        let mut ticker = self.ticker(self.accepted_at);
        let shared = Arc::clone(&self.shared);

        loop {
            if let Some(reason) = self.policy_exit() {
                return Ok(reason);
            }

            let event = tokio::select! {
                biased;
                result = self.connection.closed() => PendingEvent::Closed(result),
                _ = shared.attempt_made() => PendingEvent::Attempt,
                _ = ticker.tick() => PendingEvent::Tick,
            };

            match event {
                PendingEvent::Attempt => {
                    trace!("[{}] attempt {} observed", self.session_id, shared.attempts());
                }
                PendingEvent::Tick => {
                    self.pending_ticks += 1;
                    trace!("[{}] pending tick {}", self.session_id, self.pending_ticks);
                }
                PendingEvent::Closed(result) => {
                    // the engine drops the connection itself after a past-limit attempt
                    if let Some(reason) = self.policy_exit() {
                        if let Err(e) = result {
                            debug!("[{}] connection ended: {}", self.session_id, e);
                        }
                        return Ok(reason);
                    }
                    return match result {
                        Ok(()) => {
                            debug!("[{}] peer disconnected", self.session_id);
                            Ok(ExitReason::PeerDisconnected)
                        }
                        Err(e) => Err(e),
                    };
                }
            }
        }
    }

    async fn teardown(&mut self) -> SessionState {
        self.transition(SessionState::Closing);

        let start = Instant::now();
        let deadline = start + self.policy.teardown_window();

        let connection = &mut self.connection;
        let requests = async {
            connection.shutdown_channels().await;
            connection.request_close().await;
        };
        if timeout_at(deadline, requests).await.is_err() {
            debug!("[{}] close requests did not complete", self.session_id);
        }

        let mut ticker = self.ticker(start);
        loop {
            let confirmed = tokio::select! {
                biased;
                result = self.connection.closed() => Some(result),
                _ = ticker.tick() => None,
            };

            match confirmed {
                Some(result) => {
                    if let Err(e) = result {
                        debug!("[{}] connection closed with: {}", self.session_id, e);
                    }
                    return self.finish(SessionState::Closed);
                }
                None => {
                    self.teardown_ticks += 1;
                    if self.teardown_ticks >= self.policy.max_teardown_ticks {
                        warn!(
                            "[{}] peer did not confirm close within {:?}, aborting",
                            self.session_id,
                            self.policy.teardown_window()
                        );
                        return self.finish(SessionState::ForceAborted);
                    }
                }
            }
        }
    }

    fn finish(&mut self, state: SessionState) -> SessionState {
        self.transition(state);
        self.release(state == SessionState::ForceAborted);
        state
    }

    /// Idempotent.
    fn release(&mut self, force: bool) {
        if self.released {
            return;
        }
        self.released = true;
        if force {
            self.connection.abort();
        }
        trace!("[{}] connection resources released", self.session_id);
    }
}
