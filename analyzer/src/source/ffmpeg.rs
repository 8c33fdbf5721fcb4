use chrono::Utc;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tracing::{debug, info, warn};
use traffic_monitor_common::config::SourceConfig;
use traffic_monitor_common::frame::Frame;

use super::{CaptureError, FrameSource};

/// Decoder output as seen by [`RawFrameReader`].
type DecoderOutput = Box<dyn AsyncRead + Send + Unpin>;

/// Splits a raw `rgb24` byte stream into fixed-size frames.
pub struct RawFrameReader<R> {
    inner: R,
    width: u32,
    height: u32,
    seq: u64,
    ended: bool,
}

impl<R: AsyncRead + Unpin> RawFrameReader<R> {
    pub fn new(inner: R, width: u32, height: u32) -> Self {
        Self {
            inner,
            width,
            height,
            seq: 0,
            ended: false,
        }
    }

    pub fn frames_read(&self) -> u64 {
        self.seq
    }

    /// The next whole frame, or `None` once the stream is exhausted. A
    /// trailing partial frame is a read error, after which the stream
    /// reports end of stream.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        if self.ended {
            return Ok(None);
        }

        let frame_len = self.width as usize * self.height as usize * 3;
        let mut buf = vec![0u8; frame_len];
        let mut filled = 0;
        while filled < frame_len {
            let n = match self.inner.read(&mut buf[filled..]).await {
                Ok(n) => n,
                Err(e) => {
                    self.ended = true;
                    return Err(CaptureError::Read(e.to_string()));
                }
            };
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            self.ended = true;
            return Ok(None);
        }
        if filled < frame_len {
            self.ended = true;
            return Err(CaptureError::Read(format!(
                "truncated frame: {filled} of {frame_len} bytes"
            )));
        }

        let seq = self.seq;
        self.seq += 1;
        Frame::from_rgb24(self.width, self.height, buf, Utc::now(), seq)
            .map(Some)
            .map_err(|e| CaptureError::Read(e.to_string()))
    }
}

/// Decodes a file or stream through an `ffmpeg` subprocess that writes raw
/// `rgb24` frames, scaled to the configured raster, on its stdout.
pub struct FfmpegSource {
    uri: String,
    child: Option<Child>,
    reader: Option<RawFrameReader<DecoderOutput>>,
    /// First frame, decoded by `open` to prove the source is readable.
    pending: Option<Frame>,
    frames: u64,
}

impl FfmpegSource {
    /// Start decoding `config.uri`. Succeeds only once the first frame has
    /// been decoded; that frame is returned by the first `next_frame`.
    pub async fn open(config: &SourceConfig) -> Result<Self, CaptureError> {
        let uri = config.uri.clone();
        if !is_stream_uri(&uri) && !Path::new(&uri).exists() {
            return Err(CaptureError::Unavailable(uri, "file does not exist".into()));
        }

        let mut child = Command::new(&config.ffmpeg_bin)
            .args(ffmpeg_args(config))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CaptureError::Unavailable(uri.clone(), format!("failed to spawn ffmpeg: {e}"))
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            CaptureError::Unavailable(uri.clone(), "could not get ffmpeg stdout handle".into())
        })?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr, uri.clone()));
        }

        debug!(
            uri,
            width = config.width,
            height = config.height,
            realtime = config.realtime,
            "ffmpeg decoder started"
        );

        let reader = RawFrameReader::new(
            Box::new(stdout) as DecoderOutput,
            config.width,
            config.height,
        );
        Self::with_reader(uri, Some(child), reader).prime().await
    }

    fn with_reader(
        uri: String,
        child: Option<Child>,
        reader: RawFrameReader<DecoderOutput>,
    ) -> Self {
        Self {
            uri,
            child,
            reader: Some(reader),
            pending: None,
            frames: 0,
        }
    }

    /// Decode the first frame and hold it for the first `next_frame`.
    async fn prime(mut self) -> Result<Self, CaptureError> {
        match self.read_frame().await {
            Ok(Some(frame)) => {
                info!(
                    uri = self.uri,
                    width = frame.width(),
                    height = frame.height(),
                    "capture opened"
                );
                self.pending = Some(frame);
                Ok(self)
            }
            Ok(None) => {
                self.close().await;
                Err(CaptureError::Unavailable(self.uri, "no frame could be decoded".into()))
            }
            Err(e) => {
                self.close().await;
                Err(CaptureError::Unavailable(self.uri, e.to_string()))
            }
        }
    }

    async fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        let frame = reader.read_frame().await;
        self.frames = reader.frames_read();
        frame
    }
}

impl FrameSource for FfmpegSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }
        self.read_frame().await
    }

    async fn close(&mut self) {
        let was_open = self.reader.take().is_some();
        self.pending = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                debug!(error = %e, uri = self.uri, "ffmpeg already exited");
            }
        }
        if was_open {
            info!(uri = self.uri, frames = self.frames, "capture closed");
        }
    }

    fn describe(&self) -> &str {
        &self.uri
    }
}

/// `scheme://...` sources are opened by ffmpeg directly; anything else is a file path.
fn is_stream_uri(uri: &str) -> bool {
    uri.contains("://")
}

fn ffmpeg_args(config: &SourceConfig) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    if config.realtime && !is_stream_uri(&config.uri) {
        args.push("-re".into());
    }
    if config.uri.starts_with("rtsp://") || config.uri.starts_with("rtsps://") {
        args.push("-rtsp_transport".into());
        args.push(config.rtsp_transport.clone());
    }

    args.push("-i".into());
    args.push(config.uri.clone());
    args.push("-an".into());
    args.push("-vf".into());
    args.push(format!("scale={}:{}", config.width, config.height));
    for arg in ["-pix_fmt", "rgb24", "-f", "rawvideo", "pipe:1"] {
        args.push(arg.into());
    }
    args
}

async fn forward_stderr(stderr: ChildStderr, uri: String) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        warn!(uri, "ffmpeg: {line}");
    }
}

/// Check whether ffmpeg is available. Logs a warning if not found.
pub async fn check_ffmpeg_available(ffmpeg_bin: &str) {
    match Command::new(ffmpeg_bin).arg("-version").output().await {
        Ok(out) if out.status.success() => {
            debug!(ffmpeg_bin, "ffmpeg is available");
        }
        Ok(_) => {
            warn!(ffmpeg_bin, "ffmpeg returned non-zero for -version; capture may fail");
        }
        Err(e) => {
            warn!(
                error = %e,
                ffmpeg_bin,
                "ffmpeg not found; frame capture will fail. Install ffmpeg or set source.ffmpeg_bin."
            );
        }
    }
}
