pub mod detection;
pub mod frame;
pub mod ground_truth;
pub mod message;

pub use detection::DetectionResult;
pub use frame::Frame;
pub use ground_truth::{ErrorSample, GroundTruthRecord};
pub use message::{Acknowledgement, FeedbackMessage, SideMessage};
