use serde::{Deserialize, Serialize};

use crate::common::DetectionResult;
use crate::error::MessageError;

/// Wire form of a detection result sent from consumer to producer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeedbackMessage {
    pub sequence_id: u64,
    pub x: f64,
    pub y: f64,
    pub found: bool,
}

impl From<&DetectionResult> for FeedbackMessage {
    fn from(result: &DetectionResult) -> Self {
        Self {
            sequence_id: result.sequence_id,
            x: result.estimated_x,
            y: result.estimated_y,
            found: result.found,
        }
    }
}

/// Producer reply for each feedback message it evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub sequence_id: u64,
    /// Scored against ground truth with the ball found. Misses and late feedback are `false`.
    pub matched: bool,
    pub error_distance: Option<f64>,
}

/// Everything carried on the side channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SideMessage {
    Feedback(FeedbackMessage),
    Ack(Acknowledgement),
}

impl SideMessage {
    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        serde_json::to_vec(self).map_err(MessageError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        serde_json::from_slice(bytes).map_err(MessageError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feedback_wire_shape_is_stable() {
        let message = SideMessage::Feedback(FeedbackMessage {
            sequence_id: 42,
            x: 1.5,
            y: 2.0,
            found: true,
        });
        let json: serde_json::Value = serde_json::from_slice(&message.encode().unwrap()).unwrap();
        assert_eq!(json["kind"], "feedback");
        assert_eq!(json["sequence_id"], 42);
        assert_eq!(json["found"], true);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(SideMessage::decode(b"Location 1 2 Timestamp 3").is_err());
    }

    #[test]
    fn feedback_copies_detection_fields() {
        let result = DetectionResult::missed(9, (4.0, 5.0));
        let feedback = FeedbackMessage::from(&result);
        assert_eq!(feedback.sequence_id, 9);
        assert_eq!((feedback.x, feedback.y), (4.0, 5.0));
        assert!(!feedback.found);
    }
}
