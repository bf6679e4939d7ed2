pub mod detector;
pub mod dispatcher;
pub mod mailbox;
pub mod metrics;
pub mod slot;
pub mod worker;

pub use detector::{Blob, ColorThresholdDetector, Detector};
pub use dispatcher::{DetectorFactory, TrackingDispatcher};
pub use mailbox::{FrameMailbox, Handoff, Take};
pub use metrics::{Counter, MetricsSnapshot, TrackingMetrics};
pub use slot::ResultSlot;
pub use worker::{DetectionWorker, WorkerConfig, WorkerContext, WorkerSummary};
