use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use traffic_monitor_common::frame::Frame;

use super::{CaptureError, FrameSource};

/// One scripted outcome of `next_frame`.
#[derive(Debug)]
pub enum Step {
    Frame(Frame),
    Fail(String),
}

/// Replays a fixed sequence of frames and read failures, then ends the stream
/// (or, with [`MemorySource::hold_open`], waits forever like an idle live feed).
#[derive(Debug, Default)]
pub struct MemorySource {
    steps: VecDeque<Step>,
    hold_open: bool,
    /// Shared so tests can observe the close after the source moved into the loop.
    close_calls: Arc<AtomicU32>,
}

impl MemorySource {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            hold_open: false,
            close_calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn from_frames(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self::new(frames.into_iter().map(Step::Frame))
    }

    /// Block in `next_frame` once the script is exhausted instead of ending.
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.close_calls.load(Ordering::SeqCst) > 0
    }

    pub fn close_counter(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.close_calls)
    }
}

impl FrameSource for MemorySource {
    async fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        if self.is_closed() {
            return Ok(None);
        }
        match self.steps.pop_front() {
            Some(Step::Frame(frame)) => Ok(Some(frame)),
            Some(Step::Fail(reason)) => Err(CaptureError::Read(reason)),
            None if self.hold_open => std::future::pending().await,
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.steps.clear();
    }

    fn describe(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn frame(seq: u64) -> Frame {
        Frame::from_rgb24(2, 2, vec![0; 12], Utc::now(), seq).unwrap()
    }

    #[tokio::test]
    async fn replays_in_order_then_ends() {
        let mut source = MemorySource::new([
            Step::Frame(frame(0)),
            Step::Fail("decoder hiccup".into()),
            Step::Frame(frame(1)),
        ]);
        assert_eq!(source.next_frame().await.unwrap().unwrap().seq, 0);
        assert!(matches!(source.next_frame().await, Err(CaptureError::Read(_))));
        assert_eq!(source.next_frame().await.unwrap().unwrap().seq, 1);
        assert!(source.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn held_open_source_blocks_when_exhausted() {
        let mut source = MemorySource::from_frames([frame(0)]).hold_open();
        assert!(source.next_frame().await.unwrap().is_some());
        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(20), source.next_frame()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mut source = MemorySource::from_frames([frame(0), frame(1)]);
        source.close().await;
        source.close().await;
        assert!(source.is_closed());
        assert_eq!(source.close_counter().load(Ordering::SeqCst), 2);
        assert!(source.next_frame().await.unwrap().is_none());
    }
}
