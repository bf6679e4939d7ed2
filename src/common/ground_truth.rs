use serde::{Deserialize, Serialize};

/// Generator-known object position for one emitted frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthRecord {
    pub sequence_id: u64,
    pub true_x: f64,
    pub true_y: f64,
}

/// Positional error for one matched feedback message.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ErrorSample {
    pub sequence_id: u64,
    pub error_distance: f64,
    pub dx: f64,
    pub dy: f64,
}

impl ErrorSample {
    pub fn between(truth: &GroundTruthRecord, x: f64, y: f64) -> Self {
        let dx = (x - truth.true_x).abs();
        let dy = (y - truth.true_y).abs();
        Self {
            sequence_id: truth.sequence_id,
            error_distance: dx.hypot(dy),
            dx,
            dy,
        }
    }
}
