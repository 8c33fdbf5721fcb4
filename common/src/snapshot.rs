use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::StatsConfig;

/// Vehicles per queued slot.
const QUEUE_DIVISOR: u32 = 5;
/// Vehicles per recorded violation.
const VIOLATION_DIVISOR: u32 = 20;
/// Vehicle count at which queue density saturates.
const DENSITY_SATURATION: f64 = 100.0;

/// Congestion classification derived from the vehicle count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrafficLevel {
    Low,
    Medium,
    High,
}

impl TrafficLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            TrafficLevel::Low => "Low",
            TrafficLevel::Medium => "Medium",
            TrafficLevel::High => "High",
        }
    }
}

impl fmt::Display for TrafficLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable set of traffic metrics. Every field except `updated_at`
/// is a projection of `total_vehicles`.
///
/// Persisted as a flat JSON object:
///
/// ```json
/// {"total_vehicles":55,"status":"High","queue_length":11,
///  "queue_density":0.55,"violation_count":2,"updated_at":"2026-10-19T08:00:00.000000Z"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub total_vehicles: u32,
    pub status: TrafficLevel,
    pub queue_length: u32,
    pub queue_density: f64,
    pub violation_count: u32,
    pub updated_at: DateTime<Utc>,
}

/// Consumer view: the classification plus enough context to display it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrafficStatus {
    pub status: TrafficLevel,
    pub total_vehicles: u32,
    pub updated_at: DateTime<Utc>,
}

/// Consumer view: the numeric metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub total_vehicles: u32,
    pub queue_length: u32,
    pub queue_density: f64,
    pub violation_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn traffic_status(&self) -> TrafficStatus {
        TrafficStatus {
            status: self.status,
            total_vehicles: self.total_vehicles,
            updated_at: self.updated_at,
        }
    }

    pub fn metrics(&self) -> Metrics {
        Metrics {
            total_vehicles: self.total_vehicles,
            queue_length: self.queue_length,
            queue_density: self.queue_density,
            violation_count: self.violation_count,
            updated_at: self.updated_at,
        }
    }
}

/// Turns a vehicle count into a [`Snapshot`]. Holds only thresholds; no state
/// carries over between calls.
#[derive(Debug, Clone, Copy)]
pub struct StatsPolicy {
    low_threshold: u32,
    high_threshold: u32,
}

impl StatsPolicy {
    pub fn new(config: StatsConfig) -> Self {
        Self {
            low_threshold: config.low_threshold,
            high_threshold: config.high_threshold,
        }
    }

    pub fn classify(&self, vehicle_count: u32) -> TrafficLevel {
        if vehicle_count > self.high_threshold {
            TrafficLevel::High
        } else if vehicle_count < self.low_threshold {
            TrafficLevel::Low
        } else {
            TrafficLevel::Medium
        }
    }

    /// Snapshot stamped with the current wall-clock time.
    pub fn aggregate(&self, vehicle_count: u32) -> Snapshot {
        self.aggregate_at(vehicle_count, Utc::now())
    }

    pub fn aggregate_at(&self, vehicle_count: u32, at: DateTime<Utc>) -> Snapshot {
        Snapshot {
            total_vehicles: vehicle_count,
            status: self.classify(vehicle_count),
            queue_length: vehicle_count / QUEUE_DIVISOR,
            queue_density: (vehicle_count as f64 / DENSITY_SATURATION).min(1.0),
            violation_count: vehicle_count / VIOLATION_DIVISOR,
            updated_at: at,
        }
    }

    /// True when every derived field of `snapshot` agrees with its `total_vehicles`.
    pub fn is_consistent(&self, snapshot: &Snapshot) -> bool {
        let expected = self.aggregate_at(snapshot.total_vehicles, snapshot.updated_at);
        expected == *snapshot
    }
}

impl Default for StatsPolicy {
    fn default() -> Self {
        Self::new(StatsConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> StatsPolicy {
        StatsPolicy::default()
    }

    #[test]
    fn projections_hold_over_range() {
        let p = policy();
        for v in 0..=500u32 {
            let s = p.aggregate(v);
            assert_eq!(s.total_vehicles, v);
            assert_eq!(s.queue_length, v / 5, "queue_length for {v}");
            assert_eq!(s.violation_count, v / 20, "violation_count for {v}");
            assert_eq!(s.status == TrafficLevel::High, v > 50, "status for {v}");
            assert!((0.0..=1.0).contains(&s.queue_density), "density for {v}");
            if v >= 100 {
                assert_eq!(s.queue_density, 1.0);
            }
        }
    }

    #[test]
    fn fifty_five_vehicles() {
        let s = policy().aggregate(55);
        assert_eq!(s.total_vehicles, 55);
        assert_eq!(s.status, TrafficLevel::High);
        assert_eq!(s.queue_length, 11);
        assert_eq!(s.queue_density, 0.55);
        assert_eq!(s.violation_count, 2);
    }

    #[test]
    fn empty_road() {
        let s = policy().aggregate(0);
        assert_eq!(s.status, TrafficLevel::Low);
        assert_eq!(s.queue_length, 0);
        assert_eq!(s.queue_density, 0.0);
        assert_eq!(s.violation_count, 0);
    }

    #[test]
    fn status_boundaries() {
        let p = policy();
        assert_eq!(p.classify(19), TrafficLevel::Low);
        assert_eq!(p.classify(20), TrafficLevel::Medium);
        assert_eq!(p.classify(50), TrafficLevel::Medium);
        assert_eq!(p.classify(51), TrafficLevel::High);
    }

    #[test]
    fn configured_low_threshold() {
        let p = StatsPolicy::new(StatsConfig {
            low_threshold: 5,
            high_threshold: 50,
        });
        assert_eq!(p.classify(4), TrafficLevel::Low);
        assert_eq!(p.classify(5), TrafficLevel::Medium);
    }

    #[test]
    fn same_input_same_snapshot() {
        let p = policy();
        let at = Utc::now();
        assert_eq!(p.aggregate_at(37, at), p.aggregate_at(37, at));
    }

    #[test]
    fn consistency_check_detects_mismatch() {
        let p = policy();
        let mut s = p.aggregate(3);
        assert!(p.is_consistent(&s));
        s.status = TrafficLevel::High;
        assert!(!p.is_consistent(&s));
    }

    #[test]
    fn json_field_names() {
        let s = policy().aggregate(55);
        let value = serde_json::to_value(&s).unwrap();
        let obj = value.as_object().unwrap();
        let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(
            keys,
            [
                "queue_density",
                "queue_length",
                "status",
                "total_vehicles",
                "updated_at",
                "violation_count"
            ]
        );
        assert_eq!(obj["status"], "High");
        assert_eq!(obj["total_vehicles"], 55);
        assert!(obj["updated_at"].is_string());
    }

    #[test]
    fn views_project_snapshot() {
        let s = policy().aggregate(42);
        let status = s.traffic_status();
        assert_eq!(status.status, TrafficLevel::Medium);
        assert_eq!(status.total_vehicles, 42);
        let metrics = s.metrics();
        assert_eq!(metrics.queue_length, 8);
        assert_eq!(metrics.violation_count, 2);
        assert_eq!(metrics.updated_at, s.updated_at);
    }
}
