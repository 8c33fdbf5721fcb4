pub mod background;
pub mod blobs;

use tracing::{debug, info};
use traffic_monitor_common::config::DetectorConfig;
use traffic_monitor_common::frame::Frame;

use background::BackgroundModel;
pub use blobs::Blob;

/// Background-subtraction motion detector.
///
/// The background model is created from the first frame and updated with
/// every frame after it, so frames must be fed strictly in order.
pub struct MotionDetector {
    config: DetectorConfig,
    background: Option<BackgroundModel>,
}

impl MotionDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            background: None,
        }
    }

    /// Foreground blobs in `frame`, after folding it into the background.
    ///
    /// The first frame seeds the model and yields nothing; so do the
    /// configured warmup frames. A frame whose dimensions differ from the
    /// model is rejected without touching the model.
    pub fn update(&mut self, frame: &Frame) -> Result<Vec<Blob>, DetectError> {
        let luma = frame.luma();

        let Some(model) = self.background.as_mut() else {
            info!(
                width = frame.width(),
                height = frame.height(),
                seq = frame.seq,
                "background model initialised"
            );
            self.background = Some(BackgroundModel::from_luma(&luma, self.config.learning_rate));
            return Ok(Vec::new());
        };

        if luma.dimensions() != model.dimensions() {
            return Err(DetectError::MalformedFrame {
                expected: model.dimensions(),
                got: luma.dimensions(),
            });
        }

        let mask = model.subtract_and_update(&luma, self.config.threshold);
        if model.frames_seen() <= self.config.warmup_frames as u64 {
            debug!(frames_seen = model.frames_seen(), "warmup, learning background");
            return Ok(Vec::new());
        }

        let blobs = blobs::extract_blobs(&mask, self.config.open_radius, self.config.min_blob_area);
        debug!(seq = frame.seq, blobs = blobs.len(), "motion detected");
        Ok(blobs)
    }

    /// Drop the background model; the next frame starts a fresh one.
    #[cfg(test)]
    pub fn reset(&mut self) {
        self.background = None;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("malformed frame: expected {expected:?} pixels, got {got:?}")]
    MalformedFrame { expected: (u32, u32), got: (u32, u32) },
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Utc;
    use image::{Rgb, RgbImage};
    use traffic_monitor_common::config::Region;

    pub(crate) const ROAD: u8 = 60;

    /// Grey road with bright rectangular "vehicles".
    pub(crate) fn scene(width: u32, height: u32, vehicles: &[Region], seq: u64) -> Frame {
        let mut image = RgbImage::from_pixel(width, height, Rgb([ROAD, ROAD, ROAD]));
        for v in vehicles {
            for y in v.y..v.y + v.height {
                for x in v.x..v.x + v.width {
                    image.put_pixel(x, y, Rgb([230, 220, 210]));
                }
            }
        }
        Frame::new(image, Utc::now(), seq)
    }

    fn detector(warmup_frames: u32) -> MotionDetector {
        MotionDetector::new(DetectorConfig {
            learning_rate: 0.05,
            threshold: 30.0,
            min_blob_area: 20,
            open_radius: 1,
            warmup_frames,
        })
    }

    #[test]
    fn first_frame_seeds_model() {
        let mut det = detector(0);
        let blobs = det.update(&scene(80, 60, &[Region::new(10, 10, 12, 8)], 0)).unwrap();
        assert!(blobs.is_empty());
    }

    #[test]
    fn vehicles_on_empty_road_are_detected() {
        let mut det = detector(0);
        det.update(&scene(80, 60, &[], 0)).unwrap();
        let cars = [Region::new(5, 5, 12, 8), Region::new(50, 30, 15, 10)];
        let blobs = det.update(&scene(80, 60, &cars, 1)).unwrap();
        assert_eq!(blobs.len(), 2);
        assert_eq!(blobs[0].bounds, cars[0]);
        assert_eq!(blobs[1].bounds, cars[1]);
        assert_eq!(blobs[1].area, 150);
    }

    #[test]
    fn static_scene_stays_quiet() {
        let mut det = detector(0);
        for seq in 0..20 {
            assert!(det.update(&scene(40, 30, &[], seq)).unwrap().is_empty());
        }
    }

    #[test]
    fn warmup_suppresses_blobs() {
        let mut det = detector(3);
        det.update(&scene(40, 30, &[], 0)).unwrap();
        let car = [Region::new(5, 5, 10, 10)];
        // frames_seen reaches 2 and 3: still warming up
        assert!(det.update(&scene(40, 30, &car, 1)).unwrap().is_empty());
        assert!(det.update(&scene(40, 30, &car, 2)).unwrap().is_empty());
        assert_eq!(det.update(&scene(40, 30, &car, 3)).unwrap().len(), 1);
    }

    #[test]
    fn wrong_dimensions_fail_fast() {
        let mut det = detector(0);
        det.update(&scene(40, 30, &[], 0)).unwrap();
        let err = det.update(&scene(30, 40, &[], 1)).unwrap_err();
        assert!(matches!(
            err,
            DetectError::MalformedFrame { expected: (40, 30), got: (30, 40) }
        ));
        // Model untouched: a correctly sized frame still works.
        assert!(det.update(&scene(40, 30, &[], 2)).unwrap().is_empty());
    }

    #[test]
    fn reset_reseeds() {
        let mut det = detector(0);
        det.update(&scene(40, 30, &[], 0)).unwrap();
        det.reset();
        let blobs = det.update(&scene(30, 40, &[Region::new(1, 1, 9, 9)], 1)).unwrap();
        assert!(blobs.is_empty());
    }
}
