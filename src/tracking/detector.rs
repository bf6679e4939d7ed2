use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::region_labelling::{connected_components, Connectivity};

use crate::common::Frame;
use crate::config::DetectionSettings;
use crate::error::DetectionError;

const MASK_ON: u8 = 255;

/// Centroid and pixel mass of the detected object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Blob {
    pub x: f64,
    pub y: f64,
    pub area: u32,
}

/// Estimates the tracked object's position in a single frame.
///
/// `Ok(None)` is an ordinary miss. `Err` is reserved for frames the detector cannot work on.
pub trait Detector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Option<Blob>, DetectionError>;
    fn name(&self) -> &'static str;
}

/// Thresholds the frame in HSV space and takes the centroid of the largest blob.
#[derive(Debug, Clone)]
pub struct ColorThresholdDetector {
    lower: [u8; 3],
    upper: [u8; 3],
    min_area: u32,
    connected: bool,
}

impl ColorThresholdDetector {
    pub fn new(settings: &DetectionSettings) -> Self {
        Self {
            lower: settings.hsv_lower,
            upper: settings.hsv_upper,
            min_area: settings.min_area.max(1),
            connected: settings.connected_components,
        }
    }

    fn in_range(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|i| self.lower[i] <= hsv[i] && hsv[i] <= self.upper[i])
    }

    pub fn mask(&self, image: &RgbImage) -> GrayImage {
        GrayImage::from_fn(image.width(), image.height(), |x, y| {
            if self.in_range(rgb_to_hsv(image.get_pixel(x, y))) {
                Luma([MASK_ON])
            } else {
                Luma([0])
            }
        })
    }

    fn largest_component(&self, mask: &GrayImage) -> Option<Blob> {
        let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));
        // (area, sum x, sum y) per label, label 0 is background
        let mut moments: Vec<(u32, u64, u64)> = Vec::new();
        for (x, y, label) in labels.enumerate_pixels() {
            let label = label[0] as usize;
            if label == 0 {
                continue;
            }
            if moments.len() <= label {
                moments.resize(label + 1, (0, 0, 0));
            }
            let entry = &mut moments[label];
            entry.0 += 1;
            entry.1 += x as u64;
            entry.2 += y as u64;
        }
        moments
            .into_iter()
            .filter(|(area, _, _)| *area > 0)
            .max_by_key(|(area, _, _)| *area)
            .map(|(area, sx, sy)| centroid(area, sx, sy))
    }

    fn pixel_mass(&self, mask: &GrayImage) -> Option<Blob> {
        let (mut area, mut sx, mut sy) = (0u32, 0u64, 0u64);
        for (x, y, pixel) in mask.enumerate_pixels() {
            if pixel[0] == MASK_ON {
                area += 1;
                sx += x as u64;
                sy += y as u64;
            }
        }
        (area > 0).then(|| centroid(area, sx, sy))
    }
}

impl Detector for ColorThresholdDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Option<Blob>, DetectionError> {
        let image = frame.image();
        if image.width() == 0 || image.height() == 0 {
            return Err(DetectionError::EmptyImage(frame.sequence_id()));
        }
        let mask = self.mask(image);
        let blob = if self.connected {
            self.largest_component(&mask)
        } else {
            self.pixel_mass(&mask)
        };
        Ok(blob.filter(|blob| blob.area >= self.min_area))
    }

    fn name(&self) -> &'static str {
        "color-threshold"
    }
}

fn centroid(area: u32, sum_x: u64, sum_y: u64) -> Blob {
    Blob {
        x: sum_x as f64 / area as f64,
        y: sum_y as f64 / area as f64,
        area,
    }
}

/// 8-bit HSV with OpenCV's scaling: hue in 0..=180, saturation and value in 0..=255.
pub fn rgb_to_hsv(pixel: &Rgb<u8>) -> [u8; 3] {
    let [r, g, b] = pixel.0.map(|c| c as f32);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let saturation = if max > 0.0 { 255.0 * delta / max } else { 0.0 };
    let hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta)
    } else if max == g {
        60.0 * ((b - r) / delta) + 120.0
    } else {
        60.0 * ((r - g) / delta) + 240.0
    };
    let hue = if hue < 0.0 { hue + 360.0 } else { hue };

    [
        (hue / 2.0).round() as u8,
        saturation.round() as u8,
        max.round() as u8,
    ]
}
