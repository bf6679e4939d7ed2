pub mod app;
pub mod common;
pub mod config;
pub mod consumer;
pub mod error;
pub mod logging;
pub mod producer;
pub mod scene;
pub mod tracking;
pub mod transport;

pub use config::Settings;
pub use consumer::Consumer;
pub use error::{AppError, DetectionError, FrameError, MessageError};
pub use producer::Producer;
pub use transport::MediaSession;
