use serde::{Deserialize, Serialize};

/// Outcome of running detection on exactly one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub sequence_id: u64,
    pub estimated_x: f64,
    pub estimated_y: f64,
    pub found: bool,
    /// Pixel mass of the blob the estimate came from, 0 on a miss.
    pub area: u32,
}

impl DetectionResult {
    pub fn found(sequence_id: u64, estimated_x: f64, estimated_y: f64, area: u32) -> Self {
        Self {
            sequence_id,
            estimated_x,
            estimated_y,
            found: true,
            area,
        }
    }

    /// A miss keeps the last known coordinates so consumers always have a position to show.
    pub fn missed(sequence_id: u64, last_position: (f64, f64)) -> Self {
        Self {
            sequence_id,
            estimated_x: last_position.0,
            estimated_y: last_position.1,
            found: false,
            area: 0,
        }
    }
}
