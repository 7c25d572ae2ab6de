//! Session management core module.
//!
//! This module provides the lifecycle of one honeypot connection: the state
//! shared between the authentication callbacks and the driver, the callback
//! handler installed into the SSH engine, and the state machine that decides
//! when the connection is torn down.

use serde::Serialize;

/// Submodule for the SSH engine callback handler.
pub mod auth_bridge;
/// Submodule for the seam between the state machine and the SSH engine.
pub mod connection;
/// Submodule for per-session shared state and the end-of-session report.
pub mod session;
/// Submodule for session manager implementation.
pub mod session_manager;
/// Submodule for the bounded authentication state machine.
pub mod state_machine;

/// Lifecycle state of a session.
///
/// Transitions: `Pending → {Denied, TimedOut} → Closing → {Closed, ForceAborted}`.
/// A session that loses its peer while pending goes straight
/// `Pending → Closing → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    Denied,
    TimedOut,
    Closing,
    Closed,
    ForceAborted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionState::Pending)
    }
}

/// Why a session left `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    AttemptsExhausted,
    PendingTimeout,
    PeerDisconnected,
}

/// Result of driving one session to the end of its teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub reason: ExitReason,
    pub final_state: SessionState,
    pub attempts: u32,
    pub pending_ticks: u32,
    pub teardown_ticks: u32,
    /// Every state entered, in order, starting with `Pending`.
    pub history: Vec<SessionState>,
}

pub use session_manager::SessionManager;
