pub mod generator;
pub mod source;

pub use generator::{SceneFrame, SceneGenerator};
pub use source::FrameSource;
