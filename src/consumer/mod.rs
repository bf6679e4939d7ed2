pub mod display;
pub mod endpoint;
pub mod sink;
pub mod transmitter;

pub use display::{BroadcastDisplay, FrameDisplay, LogDisplay};
pub use endpoint::Consumer;
pub use sink::FrameSink;
pub use transmitter::{FeedbackTransmitter, TickOutcome};
