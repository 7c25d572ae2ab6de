use super::auth_bridge::CaptureHandler;
use super::connection::RusshConnection;
use super::session::{SessionReport, SessionShared};
use super::state_machine::SessionDriver;
use super::SessionOutcome;
use crate::configuration::config::Config;
use crate::configuration::types::{CaptureConfig, SessionPolicy};
use crate::data_capture::capture_channel::{CaptureChannel, CaptureSender};
use crate::data_capture::collector::collect;
use crate::error_handling::types::SessionError;
use chrono::Utc;
use log::{info, warn};
use russh::keys::PrivateKey;
use russh::{MethodKind, MethodSet, SshId};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{timeout, timeout_at, Instant};
use uuid::Uuid;

/// Authentication requests the engine tolerates on top of the password
/// budget, for the initial `none` probe and offered public keys.
const EXTRA_AUTH_REQUESTS: usize = 16;

/// The structure related to session management
///
/// Serves honeypot connections handed over by the network listener: one
/// capture channel, one collector and one state machine per connection.
///
/// # Fields Overview
///
/// - `ssh_config`: engine configuration shared by every session (banner, host key, methods)
/// - `policy`: attempt and time budget of a session
/// - `capture`: sizing of each session's capture channel
/// - `active_sessions`: number of sessions currently being served
pub struct SessionManager {
    ssh_config: Arc<russh::server::Config>,
    policy: SessionPolicy,
    capture: CaptureConfig,
    active_sessions: AtomicUsize,
}

impl SessionManager {
    pub fn new(config: &Config, host_key: PrivateKey) -> Self {
        let ssh_config = russh::server::Config {
            server_id: SshId::Standard(config.server.server_id.clone()),
            methods: MethodSet::from([MethodKind::Password, MethodKind::PublicKey].as_slice()),
            auth_rejection_time: config.server.auth_rejection_time(),
            auth_rejection_time_initial: Some(Duration::ZERO),
            keys: vec![host_key],
            max_auth_attempts: (config.policy.max_attempts as usize)
                .saturating_add(EXTRA_AUTH_REQUESTS),
            // session lifetime is bounded by the policy
            inactivity_timeout: None,
            ..Default::default()
        };

        Self {
            ssh_config: Arc::new(ssh_config),
            policy: config.policy,
            capture: config.capture,
            active_sessions: AtomicUsize::new(0),
        }
    }

    pub fn get_active_session_count(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Serves one connection with its own capture channel and collector,
    /// then logs and returns the session report.
    pub async fn handle_session<S>(&self, stream: S, peer: SocketAddr) -> SessionReport
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let session_id = Uuid::new_v4();
        let started_at = Utc::now();
        let active = self.active_sessions.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            "[{}] connection accepted from {} ({} active)",
            session_id, peer, active
        );

        let (sender, receiver) = CaptureChannel::create(&self.capture);
        let mut collector = tokio::spawn(collect(receiver, session_id, peer));

        let shared = Arc::new(SessionShared::new());
        let result = self
            .serve_with(session_id, stream, peer, Arc::clone(&shared), sender)
            .await;

        // the last sender goes away with the engine task
        let captured = match timeout(self.policy.teardown_window(), &mut collector).await {
            Ok(Ok(captured)) => captured,
            Ok(Err(e)) => {
                warn!("[{}] collector failed: {}", session_id, e);
                0
            }
            Err(_) => {
                warn!("[{}] collector did not finish, dropping it", session_id);
                collector.abort();
                0
            }
        };

        let report = match &result {
            Ok(outcome) => {
                SessionReport::from_outcome(session_id, peer, started_at, outcome, captured)
            }
            Err(e) => SessionReport::aborted(
                session_id,
                peer,
                started_at,
                shared.attempts(),
                captured,
                e.to_string(),
            ),
        };
        match serde_json::to_string(&report) {
            Ok(json) => info!("[{}] session report {}", session_id, json),
            Err(e) => warn!("[{}] unable to encode session report: {}", session_id, e),
        }

        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
        report
    }

    /// Runs one connection through the state machine, delivering captured
    /// records into `capture`.
    ///
    /// # Errors
    /// - [`SessionError::ProtocolFatal`] if the identification exchange does
    ///   not complete within the pending window, or the engine fails while
    ///   the session is pending
    pub async fn serve<S>(
        &self,
        session_id: Uuid,
        stream: S,
        peer: SocketAddr,
        capture: CaptureSender,
    ) -> Result<SessionOutcome, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let shared = Arc::new(SessionShared::new());
        self.serve_with(session_id, stream, peer, shared, capture)
            .await
    }

    async fn serve_with<S>(
        &self,
        session_id: Uuid,
        stream: S,
        peer: SocketAddr,
        shared: Arc<SessionShared>,
        capture: CaptureSender,
    ) -> Result<SessionOutcome, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let accepted_at = Instant::now();
        let handler = CaptureHandler::new(
            session_id,
            peer,
            Arc::clone(&shared),
            capture,
            self.policy.max_attempts,
        );

        let start = RusshConnection::start(
            Arc::clone(&self.ssh_config),
            stream,
            handler,
            Arc::clone(&shared),
        );
        let connection = match timeout_at(accepted_at + self.policy.pending_window(), start).await
        {
            Ok(connection) => connection?,
            Err(_) => {
                return Err(SessionError::ProtocolFatal(
                    "no identification string received".to_string(),
                ))
            }
        };

        SessionDriver::new(session_id, connection, shared, self.policy)
            .accepted_at(accepted_at)
            .run()
            .await
    }
}
