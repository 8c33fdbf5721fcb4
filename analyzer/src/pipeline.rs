use chrono::Utc;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use traffic_monitor_common::config::{Config, Region};
use traffic_monitor_common::exchange::SnapshotPublisher;
use traffic_monitor_common::frame::Frame;
use traffic_monitor_common::health::{LoopHealth, LoopState};
use traffic_monitor_common::snapshot::{Snapshot, StatsPolicy};

use crate::counter::VehicleCounter;
use crate::detector::{DetectError, MotionDetector};
use crate::source::{CaptureError, FrameSource};

const SUMMARY_EVERY_FRAMES: u64 = 100;

/// Whether the analysis loop is currently active. Cheap to clone; all clones
/// observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    running: Arc<AtomicBool>,
}

impl RunState {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn set(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }
}

/// Holds RunState at `true` for its lifetime, including an unwinding task.
struct RunGuard(RunState);

impl RunGuard {
    fn engage(state: &RunState) -> Self {
        state.set(true);
        Self(state.clone())
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    EndOfStream,
    StopRequested,
}

#[derive(Debug, Clone)]
pub struct LoopReport {
    pub exit: LoopExit,
    pub health: LoopHealth,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    CaptureUnavailable(CaptureError),
    #[error("analysis task panicked: {0}")]
    Panicked(String),
}

/// Detector, counter, aggregator and publisher for one run of the loop.
///
/// All detection state lives here and is dropped with the loop, so a stopped
/// analyzer is restarted by building a new one.
pub struct Analyzer<P> {
    detector: MotionDetector,
    counter: VehicleCounter,
    roi: Option<Region>,
    policy: StatsPolicy,
    publisher: P,
    health_path: Option<PathBuf>,
    stall_after: u32,
    read_retry: Duration,
    run_state: RunState,
    health: LoopHealth,
}

impl<P: SnapshotPublisher> Analyzer<P> {
    pub fn new(config: &Config, publisher: P) -> Self {
        Self {
            detector: MotionDetector::new(config.detector.clone()),
            counter: VehicleCounter::new(&config.counter),
            roi: config.counter.roi,
            policy: StatsPolicy::new(config.stats),
            publisher,
            health_path: None,
            stall_after: config.pipeline.stall_after_failures,
            read_retry: Duration::from_millis(config.pipeline.read_retry_ms),
            run_state: RunState::default(),
            health: LoopHealth::new(&config.source.uri),
        }
    }

    /// Persist loop health to `path` on every state change.
    pub fn with_health_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.health_path = Some(path.into());
        self
    }

    pub fn run_state(&self) -> RunState {
        self.run_state.clone()
    }

    /// Run one frame through detection, counting and aggregation.
    pub fn analyze(&mut self, frame: &Frame) -> Result<Snapshot, DetectError> {
        let blobs = self.detector.update(frame)?;
        let roi = self
            .roi
            .unwrap_or_else(|| Region::new(0, 0, frame.width(), frame.height()));
        let vehicles = self.counter.count(&blobs, &roi);
        Ok(self.policy.aggregate(vehicles))
    }

    /// Open the source, run the loop until end of stream or a stop request,
    /// then release the source. RunState is `true` only between a successful
    /// open and the release.
    ///
    /// A stop requested while `open` is still pending drops the open future
    /// along with whatever it had acquired. A source that did open is always
    /// closed before this returns, even when the stop arrived during `open`.
    pub async fn start<S, F>(
        mut self,
        open: F,
        mut stop: watch::Receiver<bool>,
    ) -> Result<LoopReport, PipelineError>
    where
        S: FrameSource,
        F: Future<Output = Result<S, CaptureError>>,
    {
        self.set_state(LoopState::Starting);

        let opened = tokio::select! {
            biased;
            _ = wait_for_stop(&mut stop) => None,
            opened = open => Some(opened),
        };
        let mut source = match opened {
            Some(Ok(source)) => source,
            Some(Err(e)) => {
                error!(error = %e, "capture unavailable, analysis not started");
                self.health.last_error = Some(e.to_string());
                self.set_state(LoopState::Failed);
                return Err(PipelineError::CaptureUnavailable(e));
            }
            None => {
                info!("stop requested before capture opened");
                self.set_state(LoopState::Stopped);
                return Ok(self.report(LoopExit::StopRequested));
            }
        };

        let exit = {
            let _running = RunGuard::engage(&self.run_state);
            info!(source = source.describe(), "analysis loop started");
            self.set_state(LoopState::Running);

            let exit = self.run_loop(&mut source, &mut stop).await;
            source.close().await;
            exit
        };

        info!(
            ?exit,
            frames = self.health.frames_processed,
            dropped = self.health.frames_dropped,
            read_failures = self.health.read_failures,
            publish_failures = self.health.publish_failures,
            "analysis loop stopped"
        );
        self.set_state(LoopState::Stopped);
        Ok(self.report(exit))
    }

    async fn run_loop<S: FrameSource>(
        &mut self,
        source: &mut S,
        stop: &mut watch::Receiver<bool>,
    ) -> LoopExit {
        loop {
            if *stop.borrow() {
                return LoopExit::StopRequested;
            }

            let next = tokio::select! {
                biased;
                _ = wait_for_stop(stop) => return LoopExit::StopRequested,
                next = source.next_frame() => next,
            };

            match next {
                Ok(Some(frame)) => self.handle_frame(&frame),
                Ok(None) => {
                    info!(source = source.describe(), "end of stream");
                    return LoopExit::EndOfStream;
                }
                Err(e) => {
                    self.handle_read_failure(&e);
                    if !self.read_retry.is_zero() {
                        tokio::select! {
                            biased;
                            _ = wait_for_stop(stop) => return LoopExit::StopRequested,
                            _ = tokio::time::sleep(self.read_retry) => {}
                        }
                    }
                }
            }
        }
    }

    fn handle_frame(&mut self, frame: &Frame) {
        if self.health.consecutive_read_failures > 0 {
            debug!(
                failures = self.health.consecutive_read_failures,
                "frame read recovered"
            );
            self.health.consecutive_read_failures = 0;
            if self.health.state == LoopState::Degraded {
                info!("capture recovered, leaving degraded state");
                self.set_state(LoopState::Running);
            }
        }

        let snapshot = match self.analyze(frame) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, seq = frame.seq, "dropping frame");
                self.health.frames_dropped += 1;
                return;
            }
        };

        if let Err(e) = self.publisher.publish(&snapshot) {
            warn!(error = %e, seq = frame.seq, "failed to publish snapshot, keeping previous");
            self.health.publish_failures += 1;
            self.health.last_error = Some(e.to_string());
        }

        self.health.frames_processed += 1;
        debug!(
            seq = frame.seq,
            vehicles = snapshot.total_vehicles,
            status = %snapshot.status,
            "frame analysed"
        );

        if self.health.frames_processed % SUMMARY_EVERY_FRAMES == 0 {
            info!(
                frames = self.health.frames_processed,
                vehicles = snapshot.total_vehicles,
                status = %snapshot.status,
                queue_length = snapshot.queue_length,
                dropped = self.health.frames_dropped,
                read_failures = self.health.read_failures,
                "analysis progress"
            );
            self.write_health();
        }
    }

    fn handle_read_failure(&mut self, e: &CaptureError) {
        self.health.read_failures += 1;
        self.health.consecutive_read_failures += 1;
        self.health.last_error = Some(e.to_string());
        warn!(
            error = %e,
            consecutive = self.health.consecutive_read_failures,
            "frame read failed, skipping"
        );

        if self.stall_after > 0
            && self.health.consecutive_read_failures >= self.stall_after
            && self.health.state != LoopState::Degraded
        {
            error!(
                consecutive = self.health.consecutive_read_failures,
                "capture stalled, loop degraded"
            );
            self.set_state(LoopState::Degraded);
        }
    }

    fn set_state(&mut self, state: LoopState) {
        self.health.state = state;
        self.write_health();
    }

    fn write_health(&mut self) {
        self.health.running = self.run_state.is_running();
        self.health.updated_at = Utc::now();
        let Some(path) = &self.health_path else {
            return;
        };
        if let Err(e) = self.health.write(path) {
            warn!(error = %e, path = %path.display(), "failed to write health file");
        }
    }

    fn report(&self, exit: LoopExit) -> LoopReport {
        LoopReport {
            exit,
            health: self.health.clone(),
        }
    }
}

/// Resolves once a stop is requested, or when every stop sender is gone.
async fn wait_for_stop(stop: &mut watch::Receiver<bool>) {
    // wait_for errors only when the sender is dropped; treat that as a stop too.
    let _ = stop.wait_for(|requested| *requested).await;
}

/// Requests a cooperative stop of a spawned loop. Clones share the signal.
#[derive(Debug, Clone)]
pub struct StopSignal(Arc<watch::Sender<bool>>);

impl StopSignal {
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }
}

/// Control interface for a loop running on its own task.
pub struct AnalysisHandle {
    stop: StopSignal,
    task: JoinHandle<Result<LoopReport, PipelineError>>,
    run_state: RunState,
    health_path: Option<PathBuf>,
    source: String,
}

impl AnalysisHandle {
    #[allow(dead_code)]
    pub fn run_state(&self) -> RunState {
        self.run_state.clone()
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Request a stop and wait until the capture is released and RunState is false.
    #[allow(dead_code)]
    pub async fn stop(self) -> Result<LoopReport, PipelineError> {
        self.stop.trigger();
        self.join().await
    }

    /// Wait for the loop to end on its own (end of stream or an external stop signal).
    /// A panicked loop never wrote its final state, so it is recorded here.
    pub async fn join(self) -> Result<LoopReport, PipelineError> {
        let AnalysisHandle {
            stop,
            task,
            health_path,
            source,
            ..
        } = self;
        let result = match task.await {
            Ok(result) => result,
            Err(e) => {
                let reason = e.to_string();
                error!(error = %reason, source = %source, "analysis task aborted");
                if let Some(path) = &health_path {
                    record_abort(path, &source, &reason);
                }
                Err(PipelineError::Panicked(reason))
            }
        };
        drop(stop);
        result
    }
}

/// Run `analyzer` on a new task, opening the capture with `open` first.
pub fn spawn_analysis<S, F, P>(open: F, analyzer: Analyzer<P>) -> AnalysisHandle
where
    S: FrameSource + 'static,
    F: Future<Output = Result<S, CaptureError>> + Send + 'static,
    P: SnapshotPublisher + 'static,
{
    let (stop_tx, stop_rx) = watch::channel(false);
    let run_state = analyzer.run_state();
    let health_path = analyzer.health_path.clone();
    let source = analyzer.health.source.clone();
    let task = tokio::spawn(analyzer.start(open, stop_rx));
    AnalysisHandle {
        stop: StopSignal(Arc::new(stop_tx)),
        task,
        run_state,
        health_path,
        source,
    }
}

/// Mark the persisted health failed, keeping whatever counters were last written.
fn record_abort(path: &Path, source: &str, reason: &str) {
    let mut health = match LoopHealth::read(path) {
        Ok(Some(health)) => health,
        _ => LoopHealth::new(source),
    };
    health.state = LoopState::Failed;
    health.running = false;
    health.last_error = Some(reason.to_string());
    health.updated_at = Utc::now();
    if let Err(e) = health.write(path) {
        warn!(error = %e, path = %path.display(), "failed to write health file");
    }
}
