use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::common::Frame;
use crate::consumer::display::FrameDisplay;
use crate::error::AppError;
use crate::tracking::{Counter, TrackingDispatcher, TrackingMetrics};

/// Entry point for every frame that arrives on the consumer.
///
/// `on_frame` runs on the reception path and only does bounded work: display, then a
/// non-blocking handoff to detection.
pub struct FrameSink {
    display: Box<dyn FrameDisplay>,
    dispatcher: TrackingDispatcher,
    metrics: Arc<TrackingMetrics>,
    last_sequence: Option<u64>,
}

impl FrameSink {
    pub fn new(
        display: Box<dyn FrameDisplay>,
        dispatcher: TrackingDispatcher,
        metrics: Arc<TrackingMetrics>,
    ) -> Self {
        Self {
            display,
            dispatcher,
            metrics,
            last_sequence: None,
        }
    }

    /// Fails only when the detection worker is gone for good.
    pub fn on_frame(&mut self, frame: Frame) -> Result<(), AppError> {
        self.metrics.incr(Counter::FramesReceived);
        let sequence_id = frame.sequence_id();
        if let Some(last) = self.last_sequence {
            if sequence_id <= last {
                self.metrics.incr(Counter::FramesOutOfOrder);
                warn!(
                    "Dropping frame {} that arrived after frame {}",
                    sequence_id, last
                );
                return Ok(());
            }
        }
        self.last_sequence = Some(sequence_id);

        match self.display.show(&frame) {
            Ok(()) => self.metrics.incr(Counter::FramesDisplayed),
            Err(e) => {
                self.metrics.incr(Counter::DisplayFailures);
                warn!("Display failed for frame {}: {}", sequence_id, e);
            }
        }

        self.dispatcher.dispatch(frame)
    }

    pub fn check_worker(&mut self) -> Result<(), AppError> {
        self.dispatcher.check_worker()
    }

    pub async fn shutdown(self, timeout: Duration) -> Result<(), AppError> {
        self.dispatcher.shutdown(timeout).await
    }
}
