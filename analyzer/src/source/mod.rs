pub mod ffmpeg;
#[allow(dead_code)]
pub mod memory;

use std::future::Future;
use traffic_monitor_common::frame::Frame;

/// Where frames come from.
///
/// Opening is implementation-specific (see [`ffmpeg::FfmpegSource::open`]);
/// once open, a source yields frames strictly in acquisition order.
pub trait FrameSource: Send {
    /// The next frame, `Ok(None)` at end of stream, or the read failure.
    /// This is the only step of the loop expected to wait on I/O.
    fn next_frame(&mut self) -> impl Future<Output = Result<Option<Frame>, CaptureError>> + Send;

    /// Release the underlying device or file. Safe to call more than once.
    fn close(&mut self) -> impl Future<Output = ()> + Send;

    /// Human-readable source identifier for logs and the health record.
    fn describe(&self) -> &str;
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("capture source {0} unavailable: {1}")]
    Unavailable(String, String),
    #[error("frame read failed: {0}")]
    Read(String),
}
