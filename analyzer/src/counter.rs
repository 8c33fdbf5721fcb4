use tracing::debug;
use traffic_monitor_common::config::{CounterConfig, OversizePolicy, Region};

use crate::detector::Blob;

/// Counts vehicle-like blobs inside a region of interest.
///
/// Answers "how many vehicles are visible right now"; nothing is remembered
/// between frames.
#[derive(Debug, Clone)]
pub struct VehicleCounter {
    min_overlap: f64,
    min_area: u32,
    max_area: Option<u32>,
    oversize: OversizePolicy,
}

impl VehicleCounter {
    pub fn new(config: &CounterConfig) -> Self {
        Self {
            min_overlap: config.min_overlap,
            min_area: config.min_area,
            max_area: config.max_area,
            oversize: config.oversize,
        }
    }

    pub fn count(&self, blobs: &[Blob], roi: &Region) -> u32 {
        let mut total = 0u32;
        for blob in blobs {
            if blob.area < self.min_area || !self.inside(blob, roi) {
                continue;
            }
            total += self.weight(blob);
        }
        debug!(blobs = blobs.len(), vehicles = total, "counted vehicles");
        total
    }

    fn inside(&self, blob: &Blob, roi: &Region) -> bool {
        let box_area = blob.bounds.area();
        if box_area == 0 {
            return false;
        }
        let overlap = blob.bounds.intersection_area(roi) as f64 / box_area as f64;
        overlap > 0.0 && overlap >= self.min_overlap
    }

    fn weight(&self, blob: &Blob) -> u32 {
        match self.max_area {
            Some(max) if blob.area > max => {
                debug!(
                    area = blob.area,
                    x = blob.centroid.0,
                    y = blob.centroid.1,
                    policy = ?self.oversize,
                    "oversize blob"
                );
                match self.oversize {
                    OversizePolicy::Cap => 1,
                    OversizePolicy::Split => blob.area.div_ceil(max),
                    OversizePolicy::Discard => 0,
                }
            }
            _ => 1,
        }
    }
}
