use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub counter: CounterConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// File path or stream URI (`rtsp://...`, `http://...`). Resolved once at startup.
    pub uri: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Pace file playback at the native frame rate instead of decoding as fast as possible.
    #[serde(default)]
    pub realtime: bool,
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: String,
    #[serde(default = "default_rtsp_transport")]
    pub rtsp_transport: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    /// Weight of the current frame when blending it into the background (0..1).
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,
    /// Luma deviation above which a pixel is foreground.
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_min_blob_area")]
    pub min_blob_area: u32,
    /// Radius of the morphological opening applied to the mask. 0 disables it.
    #[serde(default = "default_open_radius")]
    pub open_radius: u8,
    #[serde(default = "default_warmup_frames")]
    pub warmup_frames: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
            threshold: default_threshold(),
            min_blob_area: default_min_blob_area(),
            open_radius: default_open_radius(),
            warmup_frames: default_warmup_frames(),
        }
    }
}

/// Axis-aligned rectangle in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Area of the overlap between two regions, 0 when disjoint.
    pub fn intersection_area(&self, other: &Region) -> u64 {
        let x0 = self.x.max(other.x) as u64;
        let y0 = self.y.max(other.y) as u64;
        let x1 = (self.x as u64 + self.width as u64).min(other.x as u64 + other.width as u64);
        let y1 = (self.y as u64 + self.height as u64).min(other.y as u64 + other.height as u64);
        if x1 <= x0 || y1 <= y0 {
            return 0;
        }
        (x1 - x0) * (y1 - y0)
    }
}

/// What to do with a blob larger than `max_area`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OversizePolicy {
    /// Count it as a single vehicle.
    #[default]
    Cap,
    /// Count it as `ceil(area / max_area)` vehicles.
    Split,
    /// Drop it entirely.
    Discard,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CounterConfig {
    /// Counting area. `None` counts over the whole frame.
    #[serde(default)]
    pub roi: Option<Region>,
    /// Fraction of a blob's bounding box that must fall inside the ROI.
    #[serde(default = "default_min_overlap")]
    pub min_overlap: f64,
    #[serde(default = "default_min_area")]
    pub min_area: u32,
    #[serde(default)]
    pub max_area: Option<u32>,
    #[serde(default)]
    pub oversize: OversizePolicy,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            roi: None,
            min_overlap: default_min_overlap(),
            min_area: default_min_area(),
            max_area: None,
            oversize: OversizePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StatsConfig {
    /// Counts strictly below this are `Low`.
    #[serde(default = "default_low_threshold")]
    pub low_threshold: u32,
    /// Counts strictly above this are `High`.
    #[serde(default = "default_high_threshold")]
    pub high_threshold: u32,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            low_threshold: default_low_threshold(),
            high_threshold: default_high_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishConfig {
    #[serde(default = "default_publish_path")]
    pub path: PathBuf,
    #[serde(default = "default_health_path")]
    pub health_path: PathBuf,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            path: default_publish_path(),
            health_path: default_health_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Consecutive read failures after which the loop reports itself degraded.
    #[serde(default = "default_stall_after_failures")]
    pub stall_after_failures: u32,
    #[serde(default = "default_read_retry_ms")]
    pub read_retry_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stall_after_failures: default_stall_after_failures(),
            read_retry_ms: default_read_retry_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.source.width == 0 || self.source.height == 0 {
            return Err(ConfigError::Invalid(
                "source.width and source.height must be non-zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.detector.learning_rate) {
            return Err(ConfigError::Invalid(format!(
                "detector.learning_rate must be within [0, 1], got {}",
                self.detector.learning_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.counter.min_overlap) {
            return Err(ConfigError::Invalid(format!(
                "counter.min_overlap must be within [0, 1], got {}",
                self.counter.min_overlap
            )));
        }
        if let Some(max) = self.counter.max_area {
            if max == 0 || max < self.counter.min_area {
                return Err(ConfigError::Invalid(format!(
                    "counter.max_area ({max}) must be non-zero and >= min_area ({})",
                    self.counter.min_area
                )));
            }
        }
        // low == high + 1 leaves Medium empty, anything beyond that would overlap Low and High.
        if self.stats.low_threshold > self.stats.high_threshold.saturating_add(1) {
            return Err(ConfigError::Invalid(format!(
                "stats.low_threshold ({}) exceeds high_threshold ({}) + 1",
                self.stats.low_threshold, self.stats.high_threshold
            )));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    360
}
fn default_ffmpeg_bin() -> String {
    "ffmpeg".into()
}
fn default_rtsp_transport() -> String {
    "tcp".into()
}
fn default_learning_rate() -> f32 {
    0.02
}
fn default_threshold() -> f32 {
    30.0
}
fn default_min_blob_area() -> u32 {
    50
}
fn default_open_radius() -> u8 {
    1
}
fn default_warmup_frames() -> u32 {
    10
}
fn default_min_overlap() -> f64 {
    0.5
}
fn default_min_area() -> u32 {
    150
}
fn default_low_threshold() -> u32 {
    20
}
fn default_high_threshold() -> u32 {
    50
}
fn default_publish_path() -> PathBuf {
    PathBuf::from("traffic_stats.json")
}
fn default_health_path() -> PathBuf {
    PathBuf::from("analyzer_health.json")
}
fn default_stall_after_failures() -> u32 {
    10
}
fn default_read_retry_ms() -> u64 {
    100
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::parse("[source]\nuri = \"traffic.mp4\"\n").unwrap();
        assert_eq!(config.source.uri, "traffic.mp4");
        assert_eq!((config.source.width, config.source.height), (640, 360));
        assert_eq!(config.stats.low_threshold, 20);
        assert_eq!(config.stats.high_threshold, 50);
        assert_eq!(config.counter.oversize, OversizePolicy::Cap);
        assert!(config.counter.roi.is_none());
        assert_eq!(config.publish.path, PathBuf::from("traffic_stats.json"));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn full_config_parses() {
        let toml = r#"
            [source]
            uri = "rtsp://camera.local/stream"
            width = 1280
            height = 720
            realtime = true

            [counter]
            roi = { x = 100, y = 200, width = 800, height = 400 }
            min_overlap = 1.0
            max_area = 20000
            oversize = "split"

            [stats]
            low_threshold = 10
            high_threshold = 50

            [pipeline]
            stall_after_failures = 3
        "#;
        let config = Config::parse(toml).unwrap();
        assert_eq!(config.counter.roi, Some(Region::new(100, 200, 800, 400)));
        assert_eq!(config.counter.oversize, OversizePolicy::Split);
        assert_eq!(config.counter.max_area, Some(20000));
        assert_eq!(config.stats.low_threshold, 10);
        assert_eq!(config.pipeline.stall_after_failures, 3);
        assert!(config.source.realtime);
    }

    #[test]
    fn missing_source_is_a_parse_error() {
        assert!(matches!(
            Config::parse("[stats]\nlow_threshold = 5\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let toml = "[source]\nuri = \"a.mp4\"\n[stats]\nlow_threshold = 60\nhigh_threshold = 50\n";
        assert!(matches!(Config::parse(toml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn empty_medium_band_allowed() {
        let toml = "[source]\nuri = \"a.mp4\"\n[stats]\nlow_threshold = 51\nhigh_threshold = 50\n";
        assert!(Config::parse(toml).is_ok());
    }

    #[test]
    fn max_area_below_min_area_rejected() {
        let toml = "[source]\nuri = \"a.mp4\"\n[counter]\nmin_area = 500\nmax_area = 100\n";
        assert!(matches!(Config::parse(toml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn region_intersection() {
        let a = Region::new(0, 0, 10, 10);
        assert_eq!(a.intersection_area(&Region::new(5, 5, 10, 10)), 25);
        assert_eq!(a.intersection_area(&Region::new(10, 0, 5, 5)), 0);
        assert_eq!(a.intersection_area(&Region::new(2, 2, 3, 3)), 9);
        assert_eq!(a.area(), 100);
    }
}
