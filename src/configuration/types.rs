use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Listener and SSH engine settings.
#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Identification string sent before key exchange, `SSH-2.0-` prefix included.
    pub server_id: String,
    pub host_key_path: PathBuf,
    /// Upper bound on simultaneously served connections.
    pub max_sessions: usize,
    /// Delay the engine applies before every rejection.
    pub auth_rejection_time_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: String::from("0.0.0.0"),
            port: 2222,
            server_id: String::from("SSH-2.0-OpenSSH_7.4p1 Raspbian-10+deb9u3"),
            host_key_path: PathBuf::from("snare_host_ed25519_key"),
            max_sessions: 256,
            auth_rejection_time_ms: 1000,
        }
    }
}

impl ServerConfig {
    pub fn auth_rejection_time(&self) -> Duration {
        Duration::from_millis(self.auth_rejection_time_ms)
    }
}

/// Per-connection budget enforced by the session state machine.
///
/// A connection is held for at most `max_pending_ticks` polling intervals
/// waiting for credentials, then for at most `max_teardown_ticks` more while
/// the close is confirmed.
#[derive(Debug, PartialEq, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SessionPolicy {
    pub max_attempts: u32,
    pub poll_interval_ms: u64,
    pub max_pending_ticks: u32,
    pub max_teardown_ticks: u32,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            poll_interval_ms: 100,
            max_pending_ticks: 1000,
            max_teardown_ticks: 50,
        }
    }
}

impl SessionPolicy {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Longest time a connection may stay `Pending`.
    pub fn pending_window(&self) -> Duration {
        self.poll_interval() * self.max_pending_ticks
    }

    pub fn teardown_window(&self) -> Duration {
        self.poll_interval() * self.max_teardown_ticks
    }

    /// Longest time a single connection can hold its resources.
    pub fn eviction_bound(&self) -> Duration {
        self.pending_window() + self.teardown_window()
    }
}

/// Sizing of the per-session capture channel.
#[derive(Debug, PartialEq, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Complete records accepted before `send` reports a full queue.
    pub queue_capacity: usize,
    /// Size of the in-process byte pipe between forwarder and consumer.
    pub buffer_bytes: usize,
    /// Largest payload a frame may carry.
    pub max_record_len: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 8,
            buffer_bytes: 64 * 1024,
            max_record_len: 64 * 1024,
        }
    }
}
