use super::capture_channel::CaptureReceiver;
use super::types::Received;
use log::{debug, info, warn};
use std::net::SocketAddr;
use tokio::io::AsyncRead;
use uuid::Uuid;

/// Drains a session's capture channel, logging every record.
///
/// Waits without a timeout and returns the number of records collected once
/// the producer side is closed or the stream fails.
pub async fn collect<R>(mut receiver: CaptureReceiver<R>, session_id: Uuid, peer: SocketAddr) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut collected = 0;
    loop {
        match receiver.receive(None).await {
            Ok(Received::Record(record)) => {
                collected += 1;
                info!(
                    "[{}] captured credentials from {}: attempt={} username={:?} password={:?}",
                    session_id,
                    peer,
                    record.attempt,
                    record.username_lossy(),
                    record.password_lossy()
                );
            }
            // never produced without a timeout
            Ok(Received::Timeout) => continue,
            Ok(Received::Closed) => {
                debug!("[{}] capture channel closed", session_id);
                break;
            }
            Err(e) => {
                warn!("[{}] capture channel failed: {}", session_id, e);
                break;
            }
        }
    }
    collected
}
