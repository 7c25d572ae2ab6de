pub mod capture_channel;
pub mod collector;
pub mod encoder;
pub mod types;

pub use capture_channel::{CaptureChannel, CaptureCodec, CaptureReceiver, CaptureSender};
pub use collector::collect;
pub use types::{CaptureRecord, Received};
