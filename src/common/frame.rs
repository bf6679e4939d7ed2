use chrono::{DateTime, Utc};
use image::RgbImage;
use std::sync::Arc;

/// A decoded video frame. The image is never mutated after creation, clones share the buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    sequence_id: u64,
    image: Arc<RgbImage>,
    capture_time: DateTime<Utc>,
}

impl Frame {
    pub fn new(sequence_id: u64, image: RgbImage, capture_time: DateTime<Utc>) -> Self {
        Self {
            sequence_id,
            image: Arc::new(image),
            capture_time,
        }
    }

    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn capture_time(&self) -> DateTime<Utc> {
        self.capture_time
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}
