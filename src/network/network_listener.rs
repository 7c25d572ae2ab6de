//! # Network Listener Module
//!
//! This module accepts incoming TCP connections and hands each of them to the
//! [`SessionManager`] on its own task.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────┐    ┌─────────────────┐
//! │ Incoming        │───▶│ NetworkListener  │───▶│ SessionManager  │
//! │ Connections     │    │                  │    │ (task/session)  │
//! └─────────────────┘    │ - Session slots  │    └─────────────────┘
//!                        └──────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use snare::configuration::Config;
//! use snare::error_handling::types::NetworkError;
//! use snare::network::host_key::load_or_generate;
//! use snare::network::network_listener::NetworkListener;
//! use snare::session_management::SessionManager;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), NetworkError> {
//!     let config = Config::default();
//!     let key = load_or_generate(&config.server.host_key_path)?;
//!     let manager = Arc::new(SessionManager::new(&config, key));
//!
//!     let listener = NetworkListener::bind(&config, manager).await?;
//!     listener.start_listening().await
//! }
//! ```

use crate::configuration::config::Config;
use crate::error_handling::types::NetworkError;
use crate::session_management::SessionManager;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;

/// A TCP listener that serves every accepted connection as a honeypot session.
///
/// `NetworkListener` is responsible for:
/// - Binding the configured address and port
/// - Limiting the number of simultaneously served connections
/// - Spawning one session task per accepted connection
pub struct NetworkListener {
    /// The bound socket
    listener: TcpListener,

    /// Session manager serving accepted connections
    session_manager: Arc<SessionManager>,

    /// One permit per session slot
    session_slots: Arc<Semaphore>,
}

impl NetworkListener {
    /// Binds the listening socket described by `config.server`.
    ///
    /// # Errors
    ///
    /// Returns `NetworkError::BindError` if the address is invalid, already in
    /// use or requires privileges the process does not have.
    pub async fn bind(
        config: &Config,
        session_manager: Arc<SessionManager>,
    ) -> Result<Self, NetworkError> {
        let address = format!("{}:{}", config.server.bind_address, config.server.port);
        let listener = TcpListener::bind(&address).await.map_err(|e| {
            error!("[!] Unable to bind {}: {}", address, e);
            NetworkError::BindError(e)
        })?;

        Ok(Self {
            listener,
            session_manager,
            session_slots: Arc::new(Semaphore::new(config.server.max_sessions)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        self.listener.local_addr().map_err(NetworkError::BindError)
    }

    /// Accepts connections until the task is cancelled.
    ///
    /// Failed accepts are logged and the loop goes on. A connection arriving
    /// while every session slot is taken is closed right away.
    pub async fn start_listening(self) -> Result<(), NetworkError> {
        info!("Listening on {}", self.local_addr()?);

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("{}", NetworkError::AcceptError(e));
                    continue;
                }
            };

            let permit = match Arc::clone(&self.session_slots).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    warn!("Dropping connection from {}: no session slot left", peer);
                    drop(stream);
                    continue;
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!("Unable to set TCP_NODELAY for {}: {}", peer, e);
            }

            let manager = Arc::clone(&self.session_manager);
            tokio::spawn(async move {
                manager.handle_session(stream, peer).await;
                drop(permit);
            });
        }
    }
}
