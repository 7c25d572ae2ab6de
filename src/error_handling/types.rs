use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// Failures moving a record through the capture channel.
///
/// None of these are fatal to a session: the producer logs them and the
/// authentication decision goes ahead unchanged.
#[derive(Debug)]
pub enum CaptureError {
    /// The bounded queue already holds as many records as it accepts.
    QueueFull,
    /// The forwarder or the consumer side is gone.
    ChannelClosed,
    /// The encoded record could exceed the configured payload bound.
    RecordTooLarge { worst_case: usize, limit: usize },
    /// A complete frame arrived but its payload is not a capture record.
    MalformedRecord(String),
    /// The stream ended in the middle of a frame.
    TruncatedFrame { buffered: usize },
    TransportError(std::io::Error),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::QueueFull => write!(f, "Capture queue is full"),
            CaptureError::ChannelClosed => write!(f, "Capture channel is closed"),
            CaptureError::RecordTooLarge { worst_case, limit } => write!(
                f,
                "Capture record too large: worst case {} bytes, limit {} bytes",
                worst_case, limit
            ),
            CaptureError::MalformedRecord(e) => write!(f, "Malformed capture record: {}", e),
            CaptureError::TruncatedFrame { buffered } => write!(
                f,
                "Capture stream ended mid-frame with {} byte(s) buffered",
                buffered
            ),
            CaptureError::TransportError(e) => write!(f, "Capture transport error: {}", e),
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::TransportError(err)
    }
}

#[derive(Debug)]
pub enum SessionError {
    /// Key exchange or transport failure; the session is aborted.
    ProtocolFatal(String),
    /// The engine delivered an authentication callback after the attempt
    /// budget was spent.
    AttemptLimitExceeded,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::ProtocolFatal(e) => write!(f, "Protocol error: {}", e),
            SessionError::AttemptLimitExceeded => {
                write!(f, "Authentication attempt limit exceeded")
            }
        }
    }
}

impl std::error::Error for SessionError {}

impl From<russh::Error> for SessionError {
    fn from(err: russh::Error) -> Self {
        SessionError::ProtocolFatal(err.to_string())
    }
}

#[derive(Debug)]
pub enum NetworkError {
    BindError(std::io::Error),
    AcceptError(std::io::Error),
    HostKeyError(String),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::BindError(e) => write!(f, "Network bind error: {}", e),
            NetworkError::AcceptError(e) => write!(f, "Accept failed: {}", e),
            NetworkError::HostKeyError(e) => write!(f, "Host key error: {}", e),
        }
    }
}

impl std::error::Error for NetworkError {}
