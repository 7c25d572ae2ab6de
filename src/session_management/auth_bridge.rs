//! SSH engine callbacks of a honeypot session.
//!
//! Every authentication request is rejected. Password attempts are counted
//! and forwarded to the capture channel; public keys are only logged.

use super::session::SessionShared;
use crate::data_capture::capture_channel::CaptureSender;
use crate::data_capture::types::CaptureRecord;
use crate::error_handling::types::SessionError;
use log::{debug, info, warn};
use russh::keys::ssh_key::HashAlg;
use russh::keys::PublicKey;
use russh::server::{Auth, Msg, Session};
use russh::{Channel, MethodKind, MethodSet};
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

/// Handler installed into the SSH engine for one connection.
pub struct CaptureHandler {
    session_id: Uuid,
    peer: SocketAddr,
    shared: Arc<SessionShared>,
    capture: CaptureSender,
    max_attempts: u32,
}

impl CaptureHandler {
    pub fn new(
        session_id: Uuid,
        peer: SocketAddr,
        shared: Arc<SessionShared>,
        capture: CaptureSender,
        max_attempts: u32,
    ) -> Self {
        Self {
            session_id,
            peer,
            shared,
            capture,
            max_attempts,
        }
    }

    fn reject(methods: &[MethodKind]) -> Auth {
        Auth::Reject {
            proceed_with_methods: Some(MethodSet::from(methods)),
            partial_success: false,
        }
    }

    /// Counts and captures one password attempt. The decision is always a
    /// rejection; `Err` past the limit makes the engine drop the connection.
    pub fn capture_password(&self, user: &[u8], password: &[u8]) -> Result<Auth, SessionError> {
        let attempt = match self.shared.record_attempt(self.max_attempts) {
            Some(attempt) => attempt,
            None => {
                warn!(
                    "[{}] password attempt from {} past the limit of {}",
                    self.session_id, self.peer, self.max_attempts
                );
                return Err(SessionError::AttemptLimitExceeded);
            }
        };

        let record = CaptureRecord::new(user, password, attempt);
        if let Err(e) = self.capture.send(&record) {
            warn!(
                "[{}] capture delivery failed for attempt {}: {}",
                self.session_id, attempt, e
            );
        }

        info!(
            "[{}] denied password attempt {}/{} from {} for user {:?}",
            self.session_id,
            attempt,
            self.max_attempts,
            self.peer,
            record.username_lossy()
        );
        Ok(Self::reject(&[MethodKind::Password]))
    }

    fn log_public_key(&self, user: &str, key: &PublicKey, stage: &str) {
        info!(
            "[{}] denied public key {} for user {:?} from {}: {} {}",
            self.session_id,
            stage,
            user,
            self.peer,
            key.algorithm().as_str(),
            key.fingerprint(HashAlg::Sha256)
        );
    }
}

impl russh::server::Handler for CaptureHandler {
    type Error = SessionError;

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        info!(
            "[{}] client {} connected for user {:?}",
            self.session_id, self.peer, user
        );
        Ok(Self::reject(&[MethodKind::Password, MethodKind::PublicKey]))
    }

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        self.capture_password(user.as_bytes(), password.as_bytes())
    }

    async fn auth_publickey_offered(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        self.log_public_key(user, public_key, "offer");
        Ok(Self::reject(&[MethodKind::Password]))
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        self.log_public_key(user, public_key, "signature");
        Ok(Self::reject(&[MethodKind::Password]))
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        debug!(
            "[{}] session channel {:?} opened by {}",
            self.session_id,
            channel.id(),
            self.peer
        );
        self.shared.register_channel(channel.id());
        Ok(true)
    }
}
