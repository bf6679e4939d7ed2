use thiserror::Error;

// Main Application Error Type

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Failed to bind to {1}: {0}")]
    Bind(std::io::Error, String),
    #[error("Failed to connect to {1}: {0}")]
    Connect(std::io::Error, String),
    #[error("Frame Error: {0}")]
    Frame(#[from] FrameError),
    #[error("Message Error: {0}")]
    Message(#[from] MessageError),
    #[error("Configuration Error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Media session closed: {0}")]
    SessionClosed(String),
    #[error("Handshake failed: {0}")]
    Handshake(String),
    #[error("Detection worker died: {0}")]
    WorkerDied(String),
    #[error("Side channel stayed full for {0:?}")]
    SendTimeout(std::time::Duration),
    #[error("Feedback channel failed after {0} attempts")]
    FeedbackExhausted(u32),
    #[error("Display Error: {0}")]
    Display(String),
    #[error("UI Error: {0}")]
    Ui(String),
    #[error("Shutdown did not complete within {0:?}")]
    ShutdownTimeout(std::time::Duration),
}

// Wire level errors
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Invalid frame length, expected {0} bytes, got {1}")]
    InvalidFrameLength(usize, usize),
    #[error("Invalid frame tag: {0}")]
    InvalidFrameTag(u8),
    #[error("Malformed image {width}x{height} with {len} pixel bytes")]
    MalformedImage { width: u32, height: u32, len: usize },
    #[error("Frame exceeds maximum size: {0} bytes")]
    TooLarge(usize),
    #[error("Failed to read frame: {0}")]
    Read(std::io::Error),
    #[error("Failed to write frame: {0}")]
    Write(std::io::Error),
}

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Frame {0} has an empty image")]
    EmptyImage(u64),
    #[error("Detector panicked on frame {0}: {1}")]
    Panicked(u64, String),
}

#[derive(Error, Debug)]
pub enum MessageError {
    #[error("Failed to encode side message: {0}")]
    Encode(serde_json::Error),
    #[error("Failed to decode side message: {0}")]
    Decode(serde_json::Error),
}
