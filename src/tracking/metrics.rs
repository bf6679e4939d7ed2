use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

const LATENCY_ALPHA: f64 = 0.1; // EWMA smoothing factor

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    FramesReceived,
    FramesOutOfOrder,
    FramesDisplayed,
    DisplayFailures,
    FramesHandedOff,
    FramesDropped,
    DetectionsFound,
    DetectionsMissed,
    WorkerFaults,
    WorkerRestarts,
    FeedbackSent,
    FeedbackSuppressed,
    FeedbackSendFailures,
    AcksReceived,
}

#[derive(Debug, Default)]
struct LatencyStats {
    average_us: f64,
    max_us: u64,
    samples: u64,
}

/// Counters shared between the consumer's main path, the detection worker and the
/// feedback transmitter. Every update is lock free except the latency average.
#[derive(Debug, Default)]
pub struct TrackingMetrics {
    frames_received: AtomicU64,
    frames_out_of_order: AtomicU64,
    frames_displayed: AtomicU64,
    display_failures: AtomicU64,
    frames_handed_off: AtomicU64,
    frames_dropped: AtomicU64,
    detections_found: AtomicU64,
    detections_missed: AtomicU64,
    worker_faults: AtomicU64,
    worker_restarts: AtomicU64,
    feedback_sent: AtomicU64,
    feedback_suppressed: AtomicU64,
    feedback_send_failures: AtomicU64,
    acks_received: AtomicU64,
    latency: Mutex<LatencyStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub frames_received: u64,
    pub frames_out_of_order: u64,
    pub frames_displayed: u64,
    pub display_failures: u64,
    pub frames_handed_off: u64,
    pub frames_dropped: u64,
    pub detections_found: u64,
    pub detections_missed: u64,
    pub worker_faults: u64,
    pub worker_restarts: u64,
    pub feedback_sent: u64,
    pub feedback_suppressed: u64,
    pub feedback_send_failures: u64,
    pub acks_received: u64,
    pub average_detection_us: f64,
    pub max_detection_us: u64,
}

impl TrackingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::FramesReceived => &self.frames_received,
            Counter::FramesOutOfOrder => &self.frames_out_of_order,
            Counter::FramesDisplayed => &self.frames_displayed,
            Counter::DisplayFailures => &self.display_failures,
            Counter::FramesHandedOff => &self.frames_handed_off,
            Counter::FramesDropped => &self.frames_dropped,
            Counter::DetectionsFound => &self.detections_found,
            Counter::DetectionsMissed => &self.detections_missed,
            Counter::WorkerFaults => &self.worker_faults,
            Counter::WorkerRestarts => &self.worker_restarts,
            Counter::FeedbackSent => &self.feedback_sent,
            Counter::FeedbackSuppressed => &self.feedback_suppressed,
            Counter::FeedbackSendFailures => &self.feedback_send_failures,
            Counter::AcksReceived => &self.acks_received,
        }
    }

    pub fn incr(&self, counter: Counter) {
        self.counter(counter).fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counter(counter).load(Ordering::Relaxed)
    }

    pub fn record_detection_latency(&self, elapsed: Duration) {
        let micros = elapsed.as_micros() as u64;
        let mut latency = self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        latency.average_us = if latency.samples == 0 {
            micros as f64
        } else {
            update_ewma(latency.average_us, micros, LATENCY_ALPHA)
        };
        latency.max_us = latency.max_us.max(micros);
        latency.samples += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let latency = self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        MetricsSnapshot {
            frames_received: self.get(Counter::FramesReceived),
            frames_out_of_order: self.get(Counter::FramesOutOfOrder),
            frames_displayed: self.get(Counter::FramesDisplayed),
            display_failures: self.get(Counter::DisplayFailures),
            frames_handed_off: self.get(Counter::FramesHandedOff),
            frames_dropped: self.get(Counter::FramesDropped),
            detections_found: self.get(Counter::DetectionsFound),
            detections_missed: self.get(Counter::DetectionsMissed),
            worker_faults: self.get(Counter::WorkerFaults),
            worker_restarts: self.get(Counter::WorkerRestarts),
            feedback_sent: self.get(Counter::FeedbackSent),
            feedback_suppressed: self.get(Counter::FeedbackSuppressed),
            feedback_send_failures: self.get(Counter::FeedbackSendFailures),
            acks_received: self.get(Counter::AcksReceived),
            average_detection_us: latency.average_us,
            max_detection_us: latency.max_us,
        }
    }
}

fn update_ewma(current: f64, new_value: u64, alpha: f64) -> f64 {
    current * (1.0 - alpha) + new_value as f64 * alpha
}
