use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::exchange::{read_json, write_json_atomic, ExchangeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    Starting,
    Running,
    /// Too many consecutive frame reads have failed.
    Degraded,
    /// Stopped on request or at end of stream.
    Stopped,
    /// Could not start, or ended on a fatal error.
    Failed,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoopState::Starting => "starting",
            LoopState::Running => "running",
            LoopState::Degraded => "degraded",
            LoopState::Stopped => "stopped",
            LoopState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Persisted view of the analysis loop for supervisors and the status tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopHealth {
    pub state: LoopState,
    pub running: bool,
    pub source: String,
    pub frames_processed: u64,
    pub frames_dropped: u64,
    pub read_failures: u64,
    pub consecutive_read_failures: u32,
    pub publish_failures: u64,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl LoopHealth {
    pub fn new(source: &str) -> Self {
        Self {
            state: LoopState::Starting,
            running: false,
            source: source.to_string(),
            frames_processed: 0,
            frames_dropped: 0,
            read_failures: 0,
            consecutive_read_failures: 0,
            publish_failures: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    pub fn write(&self, path: &Path) -> Result<(), ExchangeError> {
        write_json_atomic(path, self)
    }

    /// `Ok(None)` when the analyzer has not written a health record yet.
    pub fn read(path: &Path) -> Result<Option<Self>, ExchangeError> {
        read_json(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_serializes_lowercase() {
        let mut health = LoopHealth::new("traffic.mp4");
        health.state = LoopState::Degraded;
        let value = serde_json::to_value(&health).unwrap();
        assert_eq!(value["state"], "degraded");
        assert_eq!(value["running"], false);
        assert_eq!(value["source"], "traffic.mp4");
    }

    #[test]
    fn write_and_read_back() {
        let dir = std::env::temp_dir().join(format!("traffic-health-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("analyzer_health.json");
        let _ = std::fs::remove_file(&path);
        assert!(LoopHealth::read(&path).unwrap().is_none());

        let mut health = LoopHealth::new("rtsp://cam/stream");
        health.state = LoopState::Running;
        health.running = true;
        health.frames_processed = 42;
        health.write(&path).unwrap();

        let back = LoopHealth::read(&path).unwrap().unwrap();
        assert_eq!(back, health);
    }
}
