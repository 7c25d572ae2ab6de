//! Common data types used across the data_capture subsystem.

use std::fmt;

/// One authentication attempt as offered by the client.
///
/// Username and password are untrusted bytes of any content and length;
/// they are kept as raw bytes and only ever rendered through the encoder
/// or a lossy `{:?}` in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct CaptureRecord {
    pub username: Vec<u8>,
    pub password: Vec<u8>,
    /// 1-based index of the attempt within its session.
    pub attempt: u32,
}

impl CaptureRecord {
    pub fn new(username: impl Into<Vec<u8>>, password: impl Into<Vec<u8>>, attempt: u32) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            attempt,
        }
    }

    pub fn username_lossy(&self) -> String {
        String::from_utf8_lossy(&self.username).into_owned()
    }

    pub fn password_lossy(&self) -> String {
        String::from_utf8_lossy(&self.password).into_owned()
    }
}

impl fmt::Debug for CaptureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureRecord")
            .field("username", &self.username_lossy())
            .field("password", &self.password_lossy())
            .field("attempt", &self.attempt)
            .finish()
    }
}

/// Outcome of a single [`CaptureReceiver::receive`](super::capture_channel::CaptureReceiver::receive) call.
#[derive(Debug, PartialEq, Eq)]
pub enum Received {
    Record(CaptureRecord),
    /// The caller's timeout elapsed with no complete frame available.
    Timeout,
    /// The producer side finished and every frame has been read.
    Closed,
}
