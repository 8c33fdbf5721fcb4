use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::morphology::open;
use imageproc::region_labelling::{connected_components, Connectivity};
use traffic_monitor_common::config::Region;

/// A connected foreground region in a single frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    pub bounds: Region,
    /// Number of foreground pixels, not the bounding box area.
    pub area: u32,
    pub centroid: (f64, f64),
}

#[derive(Debug, Clone, Copy)]
struct Extent {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    area: u32,
    sum_x: u64,
    sum_y: u64,
}

impl Extent {
    fn new(x: u32, y: u32) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            area: 0,
            sum_x: 0,
            sum_y: 0,
        }
    }

    fn add(&mut self, x: u32, y: u32) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
        self.area += 1;
        self.sum_x += x as u64;
        self.sum_y += y as u64;
    }

    fn into_blob(self) -> Blob {
        Blob {
            bounds: Region::new(
                self.min_x,
                self.min_y,
                self.max_x - self.min_x + 1,
                self.max_y - self.min_y + 1,
            ),
            area: self.area,
            centroid: (
                self.sum_x as f64 / self.area as f64,
                self.sum_y as f64 / self.area as f64,
            ),
        }
    }
}

/// Suppress speckle with a morphological opening, label 8-connected
/// foreground regions and keep those with at least `min_area` pixels.
pub fn extract_blobs(mask: &GrayImage, open_radius: u8, min_area: u32) -> Vec<Blob> {
    let cleaned = if open_radius > 0 {
        open(mask, Norm::LInf, open_radius)
    } else {
        mask.clone()
    };

    let labels = connected_components(&cleaned, Connectivity::Eight, Luma([0u8]));
    let mut extents: Vec<Option<Extent>> = Vec::new();

    for (x, y, label) in labels.enumerate_pixels() {
        let label = label.0[0] as usize;
        if label == 0 {
            continue;
        }
        if extents.len() < label {
            extents.resize(label, None);
        }
        extents[label - 1]
            .get_or_insert_with(|| Extent::new(x, y))
            .add(x, y);
    }

    let mut blobs: Vec<Blob> = extents
        .into_iter()
        .flatten()
        .filter(|e| e.area >= min_area)
        .map(Extent::into_blob)
        .collect();
    blobs.sort_by_key(|b| (b.bounds.y, b.bounds.x));
    blobs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_with(width: u32, height: u32, rects: &[Region]) -> GrayImage {
        let mut mask = GrayImage::new(width, height);
        for r in rects {
            for y in r.y..r.y + r.height {
                for x in r.x..r.x + r.width {
                    mask.put_pixel(x, y, Luma([255]));
                }
            }
        }
        mask
    }

    #[test]
    fn empty_mask_has_no_blobs() {
        assert!(extract_blobs(&GrayImage::new(32, 32), 1, 1).is_empty());
    }

    #[test]
    fn separate_rectangles_become_separate_blobs() {
        let mask = mask_with(
            64,
            48,
            &[Region::new(2, 2, 10, 6), Region::new(30, 20, 12, 12)],
        );
        let blobs = extract_blobs(&mask, 1, 10);
        assert_eq!(blobs.len(), 2);
        assert_eq!(blobs[0].bounds, Region::new(2, 2, 10, 6));
        assert_eq!(blobs[0].area, 60);
        assert_eq!(blobs[1].bounds, Region::new(30, 20, 12, 12));
        assert_eq!(blobs[1].centroid, (35.5, 25.5));
    }

    #[test]
    fn opening_removes_speckle() {
        let mut mask = mask_with(40, 40, &[Region::new(10, 10, 8, 8)]);
        mask.put_pixel(30, 30, Luma([255]));
        mask.put_pixel(2, 35, Luma([255]));
        let blobs = extract_blobs(&mask, 1, 1);
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].bounds, Region::new(10, 10, 8, 8));
    }

    #[test]
    fn small_regions_dropped_by_area() {
        let mask = mask_with(40, 40, &[Region::new(1, 1, 4, 4), Region::new(20, 20, 10, 10)]);
        let blobs = extract_blobs(&mask, 0, 20);
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].area, 100);
    }

    #[test]
    fn diagonal_pixels_are_connected() {
        let mut mask = GrayImage::new(10, 10);
        for i in 0..5 {
            mask.put_pixel(i, i, Luma([255]));
        }
        let blobs = extract_blobs(&mask, 0, 1);
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].area, 5);
        assert_eq!(blobs[0].bounds, Region::new(0, 0, 5, 5));
    }
}
