//! # Capture Channel
//!
//! Moves capture records, one frame at a time, from the authentication
//! callbacks of a session to a consumer over a byte stream.
//!
//! ## Wire format
//!
//! ```text
//! ┌──────────────────────────┬──────────────────────────────┐
//! │ length: u32, big-endian  │ payload: `length` bytes      │
//! └──────────────────────────┴──────────────────────────────┘
//! ```
//!
//! The payload layout is described in [`super::encoder`].
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐ try_send ┌───────────┐ FramedWrite ┌──────────┐ FramedRead ┌─────────────────┐
//! │CaptureSender │─────────▶│ bounded   │────────────▶│ byte     │───────────▶│ CaptureReceiver │
//! │ (auth bridge)│  frames  │ queue     │  forwarder  │ stream   │            │ (collector)     │
//! └──────────────┘          └───────────┘    task     └──────────┘            └─────────────────┘
//! ```
//!
//! The producer never waits: a record is encoded and queued whole, or the
//! call fails with [`CaptureError::QueueFull`] or [`CaptureError::ChannelClosed`].

use super::encoder::{decode_record, encode_record};
use super::types::{CaptureRecord, Received};
use crate::configuration::types::CaptureConfig;
use crate::error_handling::types::CaptureError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use log::{debug, trace, warn};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};

const PREFIX_LEN: usize = 4;

/// Length-prefixed framing of capture payloads.
///
/// The decoder only consumes bytes once a whole frame is buffered, so a
/// stream ending anywhere inside a frame is reported as
/// [`CaptureError::TruncatedFrame`].
#[derive(Debug, Clone, Copy)]
pub struct CaptureCodec {
    max_record_len: usize,
}

impl CaptureCodec {
    pub fn new(max_record_len: usize) -> Self {
        Self { max_record_len }
    }
}

impl Decoder for CaptureCodec {
    type Item = CaptureRecord;
    type Error = CaptureError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<CaptureRecord>, CaptureError> {
        if src.len() < PREFIX_LEN {
            src.reserve(PREFIX_LEN - src.len());
            return Ok(None);
        }

        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > self.max_record_len {
            return Err(CaptureError::TransportError(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "frame of {} bytes exceeds the {} byte limit",
                    len, self.max_record_len
                ),
            )));
        }

        let frame_len = PREFIX_LEN + len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(PREFIX_LEN);
        let payload = src.split_to(len);
        trace!("Decoded capture frame of {} bytes", len);
        decode_record(&payload).map(Some)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<CaptureRecord>, CaptureError> {
        match self.decode(src)? {
            Some(record) => Ok(Some(record)),
            None if src.is_empty() => Ok(None),
            None => Err(CaptureError::TruncatedFrame {
                buffered: src.len(),
            }),
        }
    }
}

impl Encoder<Bytes> for CaptureCodec {
    type Error = CaptureError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<(), CaptureError> {
        if payload.len() > self.max_record_len {
            return Err(CaptureError::RecordTooLarge {
                worst_case: payload.len(),
                limit: self.max_record_len,
            });
        }
        dst.reserve(PREFIX_LEN + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.put_slice(&payload);
        Ok(())
    }
}

/// Constructors for the two ends of a capture channel.
pub struct CaptureChannel;

impl CaptureChannel {
    /// Creates a channel over an in-process byte pipe of
    /// `config.buffer_bytes` bytes.
    ///
    /// Must be called from within a tokio runtime: the forwarder is spawned
    /// on it.
    pub fn create(config: &CaptureConfig) -> (CaptureSender, CaptureReceiver<DuplexStream>) {
        let (writer, reader) = tokio::io::duplex(config.buffer_bytes);
        let sender = Self::with_transport(writer, config);
        (sender, CaptureReceiver::new(reader, config))
    }

    /// Creates the producer end over any byte stream, e.g. a socket to an
    /// external collector.
    ///
    /// The writer is shut down once every [`CaptureSender`] clone is dropped
    /// and the queued frames are written.
    pub fn with_transport<W>(writer: W, config: &CaptureConfig) -> CaptureSender
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let framed = FramedWrite::new(writer, CaptureCodec::new(config.max_record_len));
        tokio::spawn(forward(rx, framed));

        CaptureSender {
            tx,
            max_record_len: config.max_record_len,
        }
    }
}

async fn forward<W>(mut rx: mpsc::Receiver<Bytes>, mut framed: FramedWrite<W, CaptureCodec>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(payload) = rx.recv().await {
        if let Err(e) = framed.send(payload).await {
            warn!("Capture forwarder stopped: {}", e);
            return;
        }
    }

    if let Err(e) = framed.close().await {
        debug!("Capture transport shutdown failed: {}", e);
    }
}

/// Producer end. Clones share the same queue.
#[derive(Debug, Clone)]
pub struct CaptureSender {
    tx: mpsc::Sender<Bytes>,
    max_record_len: usize,
}

impl CaptureSender {
    /// Encodes and queues `record` without waiting.
    ///
    /// Success means the whole frame is queued; it is not a delivery
    /// acknowledgement.
    pub fn send(&self, record: &CaptureRecord) -> Result<(), CaptureError> {
        let payload = encode_record(record, self.max_record_len)?;
        self.tx.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => CaptureError::QueueFull,
            TrySendError::Closed(_) => CaptureError::ChannelClosed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer end, reading frames from any byte stream.
pub struct CaptureReceiver<R> {
    frames: FramedRead<R, CaptureCodec>,
    finished: bool,
}

impl<R> CaptureReceiver<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, config: &CaptureConfig) -> Self {
        Self {
            frames: FramedRead::new(reader, CaptureCodec::new(config.max_record_len)),
            finished: false,
        }
    }

    /// Waits for the next complete record, at most `timeout` if given.
    ///
    /// A timeout keeps any partially received frame for the next call. Once
    /// `Closed` or an error has been returned, every later call returns
    /// `Closed` immediately.
    pub async fn receive(&mut self, timeout: Option<Duration>) -> Result<Received, CaptureError> {
        if self.finished {
            return Ok(Received::Closed);
        }

        let next = match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.frames.next()).await {
                Ok(next) => next,
                Err(_) => return Ok(Received::Timeout),
            },
            None => self.frames.next().await,
        };

        match next {
            Some(Ok(record)) => Ok(Received::Record(record)),
            Some(Err(e)) => {
                self.finished = true;
                Err(e)
            }
            None => {
                self.finished = true;
                Ok(Received::Closed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio_test::io::Builder;

    fn config(queue_capacity: usize) -> CaptureConfig {
        CaptureConfig {
            queue_capacity,
            ..CaptureConfig::default()
        }
    }

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    fn admin_frame() -> Vec<u8> {
        frame(br#"{"username": "admin", "password": "p\"\\w", "attempt": 1}"#)
    }

    #[tokio::test]
    async fn test_records_arrive_in_order() {
        let (sender, mut receiver) = CaptureChannel::create(&config(8));

        for attempt in 1..=3 {
            sender
                .send(&CaptureRecord::new("root", format!("pw{}", attempt), attempt))
                .unwrap();
        }
        drop(sender);

        for attempt in 1..=3 {
            match receiver.receive(None).await.unwrap() {
                Received::Record(record) => {
                    assert_eq!(record.attempt, attempt);
                    assert_eq!(record.password, format!("pw{}", attempt).into_bytes());
                }
                other => panic!("expected a record, got {:?}", other),
            }
        }
        assert_eq!(receiver.receive(None).await.unwrap(), Received::Closed);
        assert_eq!(receiver.receive(None).await.unwrap(), Received::Closed);
    }

    #[tokio::test]
    async fn test_wire_format_is_big_endian_prefixed() {
        let (writer, mut reader) = tokio::io::duplex(1024);
        let sender = CaptureChannel::with_transport(writer, &config(8));

        sender
            .send(&CaptureRecord::new("admin", br#"p"\w"#.to_vec(), 1))
            .unwrap();
        drop(sender);

        let mut raw = Vec::new();
        reader.read_to_end(&mut raw).await.unwrap();
        assert_eq!(raw, admin_frame());
        assert_eq!(&raw[..4], &[0, 0, 0, 57]);
    }

    #[tokio::test]
    async fn test_fragmented_reads_yield_whole_record() {
        let bytes = admin_frame();
        let mock = Builder::new()
            .read(&bytes[..1])
            .read(&bytes[1..6])
            .read(&bytes[6..30])
            .read(&bytes[30..])
            .build();
        let mut receiver = CaptureReceiver::new(mock, &CaptureConfig::default());

        let expected = CaptureRecord::new("admin", br#"p"\w"#.to_vec(), 1);
        assert_eq!(
            receiver.receive(None).await.unwrap(),
            Received::Record(expected)
        );
        assert_eq!(receiver.receive(None).await.unwrap(), Received::Closed);
    }

    #[tokio::test]
    async fn test_truncated_payload_is_an_error() {
        let bytes = admin_frame();
        let cut = bytes.len() - 3;
        let mock = Builder::new().read(&bytes[..cut]).build();
        let mut receiver = CaptureReceiver::new(mock, &CaptureConfig::default());

        match receiver.receive(None).await {
            Err(CaptureError::TruncatedFrame { buffered }) => assert_eq!(buffered, cut),
            other => panic!("expected TruncatedFrame, got {:?}", other),
        }
        assert_eq!(receiver.receive(None).await.unwrap(), Received::Closed);
    }

    #[tokio::test]
    async fn test_truncated_prefix_is_an_error() {
        let mock = Builder::new().read(&[0, 0]).build();
        let mut receiver = CaptureReceiver::new(mock, &CaptureConfig::default());

        assert!(matches!(
            receiver.receive(None).await,
            Err(CaptureError::TruncatedFrame { buffered: 2 })
        ));
    }

    #[tokio::test]
    async fn test_header_without_payload_is_an_error() {
        let mock = Builder::new().read(&[0, 0, 0, 10]).build();
        let mut receiver = CaptureReceiver::new(mock, &CaptureConfig::default());

        assert!(matches!(
            receiver.receive(None).await,
            Err(CaptureError::TruncatedFrame { buffered: 4 })
        ));
    }

    #[tokio::test]
    async fn test_empty_frame_is_not_a_record() {
        let mock = Builder::new().read(&[0, 0, 0, 0]).build();
        let mut receiver = CaptureReceiver::new(mock, &CaptureConfig::default());

        assert!(matches!(
            receiver.receive(None).await,
            Err(CaptureError::MalformedRecord(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let cfg = CaptureConfig {
            max_record_len: 128,
            ..CaptureConfig::default()
        };
        let mock = Builder::new().read(&129u32.to_be_bytes()).build();
        let mut receiver = CaptureReceiver::new(mock, &cfg);

        assert!(matches!(
            receiver.receive(None).await,
            Err(CaptureError::TransportError(_))
        ));
    }

    #[tokio::test]
    async fn test_send_without_consumer_is_bounded() {
        let (sender, _receiver) = CaptureChannel::create(&config(2));
        let record = CaptureRecord::new("user", "pass", 1);

        // the forwarder has not run yet, so only the queue holds frames
        assert!(sender.send(&record).is_ok());
        assert!(sender.send(&record).is_ok());
        assert!(matches!(sender.send(&record), Err(CaptureError::QueueFull)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_timeout_then_record() {
        let (sender, mut receiver) = CaptureChannel::create(&config(8));

        assert_eq!(
            receiver
                .receive(Some(Duration::from_millis(50)))
                .await
                .unwrap(),
            Received::Timeout
        );

        sender.send(&CaptureRecord::new("a", "b", 1)).unwrap();
        assert_eq!(
            receiver
                .receive(Some(Duration::from_secs(1)))
                .await
                .unwrap(),
            Received::Record(CaptureRecord::new("a", "b", 1))
        );
    }

    #[tokio::test]
    async fn test_dropped_consumer_closes_channel() {
        let (sender, receiver) = CaptureChannel::create(&config(8));
        drop(receiver);

        let record = CaptureRecord::new("a", "b", 1);
        let closed = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match sender.send(&record) {
                    Err(CaptureError::ChannelClosed) => break,
                    Ok(()) | Err(CaptureError::QueueFull) => tokio::task::yield_now().await,
                    Err(e) => panic!("unexpected error: {}", e),
                }
            }
        })
        .await;

        assert!(closed.is_ok(), "forwarder never noticed the missing consumer");
        assert!(sender.is_closed());
    }

    #[tokio::test]
    async fn test_record_too_large_is_not_queued() {
        let cfg = CaptureConfig {
            queue_capacity: 1,
            max_record_len: 64,
            ..CaptureConfig::default()
        };
        let (sender, _receiver) = CaptureChannel::create(&cfg);

        let big = CaptureRecord::new(vec![b'x'; 64], "", 1);
        assert!(matches!(
            sender.send(&big),
            Err(CaptureError::RecordTooLarge { .. })
        ));
        assert!(sender.send(&CaptureRecord::new("x", "y", 1)).is_ok());
    }
}
