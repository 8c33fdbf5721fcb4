use image::{GrayImage, Luma};

/// Running per-pixel mean of scene luma.
///
/// Each update blends the current frame in with weight `learning_rate`, so
/// gradual lighting changes are absorbed over roughly `1 / learning_rate`
/// frames while a passing vehicle barely moves the estimate.
#[derive(Debug, Clone)]
pub struct BackgroundModel {
    width: u32,
    height: u32,
    mean: Vec<f32>,
    learning_rate: f32,
    frames_seen: u64,
}

impl BackgroundModel {
    /// Seed the model with the first observed frame.
    pub fn from_luma(luma: &GrayImage, learning_rate: f32) -> Self {
        Self {
            width: luma.width(),
            height: luma.height(),
            mean: luma.pixels().map(|p| p.0[0] as f32).collect(),
            learning_rate,
            frames_seen: 1,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    /// Foreground mask against the current estimate (255 = foreground), then
    /// blend `luma` into the estimate. Caller guarantees matching dimensions.
    pub fn subtract_and_update(&mut self, luma: &GrayImage, threshold: f32) -> GrayImage {
        debug_assert_eq!(luma.dimensions(), self.dimensions());
        let alpha = self.learning_rate;
        let mut mask = GrayImage::new(self.width, self.height);

        for ((observed, mean), out) in luma
            .pixels()
            .zip(self.mean.iter_mut())
            .zip(mask.pixels_mut())
        {
            let value = observed.0[0] as f32;
            if (value - *mean).abs() > threshold {
                *out = Luma([255]);
            }
            *mean += alpha * (value - *mean);
        }

        self.frames_seen += 1;
        mask
    }

    /// Current estimate rounded to 8 bits.
    #[cfg(test)]
    pub fn estimate(&self) -> GrayImage {
        let data = self
            .mean
            .iter()
            .map(|m| m.round().clamp(0.0, 255.0) as u8)
            .collect();
        GrayImage::from_raw(self.width, self.height, data)
            .unwrap_or_else(|| GrayImage::new(self.width, self.height))
    }
}
