use std::time::Duration;

use serde::Deserialize;

use crate::error::AppError;

const ENV_PREFIX: &str = "BOUNCE_TRACK";
const CONFIG_PATH_ENV: &str = "BOUNCE_TRACK_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/default";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log_level: LogLevel,
    pub network: NetworkSettings,
    pub scene: SceneSettings,
    pub detection: DetectionSettings,
    pub pipeline: PipelineSettings,
    pub display: DisplaySettings,
}

impl Settings {
    /// Loads settings from the optional config file, then environment overrides,
    /// e.g. `BOUNCE_TRACK__PIPELINE__FEEDBACK_INTERVAL_MS=50`.
    pub fn load() -> Result<Self, AppError> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&path).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub host: String,
    pub port: u16,
}

impl NetworkSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SceneSettings {
    pub width: u32,
    pub height: u32,
    pub radius: u32,
    /// Pixels travelled per tick.
    pub speed: f64,
    pub color: [u8; 3],
    pub seed: Option<u64>,
    pub tick_ms: u64,
}

impl SceneSettings {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

impl Default for SceneSettings {
    fn default() -> Self {
        Self {
            width: 800,
            height: 400,
            radius: 30,
            speed: 20.0,
            color: [255, 255, 255],
            seed: None,
            tick_ms: 33,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Inclusive HSV lower bound, OpenCV scale (H 0-180, S and V 0-255).
    pub hsv_lower: [u8; 3],
    pub hsv_upper: [u8; 3],
    pub min_area: u32,
    pub connected_components: bool,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            hsv_lower: [0, 0, 200],
            hsv_upper: [180, 55, 255],
            min_area: 4,
            connected_components: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Replace the oldest pending frame with the incoming one.
    #[default]
    DropOldest,
    /// Keep what is pending and discard the incoming frame.
    DropNewest,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackFailurePolicy {
    /// Keep streaming video without feedback.
    #[default]
    Continue,
    /// Stop the consuming endpoint.
    Terminate,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub handoff_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    pub worker_fault_threshold: u32,
    pub max_worker_restarts: u32,
    pub worker_poll_ms: u64,
    pub feedback_interval_ms: u64,
    pub send_retries: u32,
    pub retry_backoff_ms: u64,
    /// How long one feedback send may wait for room in the outgoing queue.
    pub send_timeout_ms: u64,
    pub feedback_failure_policy: FeedbackFailurePolicy,
    /// Number of most recent sequence ids kept for ground truth matching.
    pub retention: usize,
    pub shutdown_timeout_ms: u64,
    pub stats_interval_ms: u64,
    pub max_frames: Option<u64>,
    /// How long the producer keeps listening for late feedback once it stops streaming.
    pub linger_ms: u64,
}

impl PipelineSettings {
    pub fn worker_poll(&self) -> Duration {
        Duration::from_millis(self.worker_poll_ms.max(1))
    }

    pub fn feedback_interval(&self) -> Duration {
        Duration::from_millis(self.feedback_interval_ms.max(1))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms.max(1))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms.max(1))
    }

    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            handoff_capacity: 1,
            overflow_policy: OverflowPolicy::DropOldest,
            worker_fault_threshold: 5,
            max_worker_restarts: 1,
            worker_poll_ms: 50,
            feedback_interval_ms: 100,
            send_retries: 3,
            retry_backoff_ms: 20,
            send_timeout_ms: 50,
            feedback_failure_policy: FeedbackFailurePolicy::Continue,
            retention: 300,
            shutdown_timeout_ms: 2_000,
            stats_interval_ms: 5_000,
            max_frames: None,
            linger_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    pub window: bool,
    pub title: String,
    pub broadcast_capacity: usize,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            window: false,
            title: "Ball Tracking".to_string(),
            broadcast_capacity: 8,
        }
    }
}
