use tokio::sync::broadcast;
use tracing::trace;

use crate::common::Frame;
use crate::error::AppError;

/// Live display for received frames. Implementations must return quickly.
pub trait FrameDisplay: Send {
    fn show(&mut self, frame: &Frame) -> Result<(), AppError>;
}

/// Headless display, frames only show up in the trace log.
#[derive(Debug, Default)]
pub struct LogDisplay;

impl FrameDisplay for LogDisplay {
    fn show(&mut self, frame: &Frame) -> Result<(), AppError> {
        let (width, height) = frame.dimensions();
        trace!(
            "Frame {} ({}x{}) captured at {}",
            frame.sequence_id(),
            width,
            height,
            frame.capture_time()
        );
        Ok(())
    }
}

/// Publishes frames to any number of viewers, slow viewers lag instead of blocking.
#[derive(Clone)]
pub struct BroadcastDisplay {
    frame_tx: broadcast::Sender<Frame>,
}

impl BroadcastDisplay {
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<Frame>) {
        let (frame_tx, frame_rx) = broadcast::channel(capacity.max(1));
        (Self { frame_tx }, frame_rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.frame_tx.subscribe()
    }
}

impl FrameDisplay for BroadcastDisplay {
    fn show(&mut self, frame: &Frame) -> Result<(), AppError> {
        if self.frame_tx.receiver_count() == 0 {
            trace!("No viewer attached for frame {}", frame.sequence_id());
            return Ok(());
        }
        self.frame_tx
            .send(frame.clone())
            .map(|_| ())
            .map_err(|e| AppError::Display(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use image::RgbImage;

    #[test]
    fn broadcast_display_reaches_subscribers() {
        let (mut display, mut rx) = BroadcastDisplay::new(4);
        display
            .show(&Frame::new(3, RgbImage::new(1, 1), Utc::now()))
            .unwrap();
        assert_eq!(rx.try_recv().unwrap().sequence_id(), 3);
    }

    #[test]
    fn broadcast_display_without_viewers_is_fine() {
        let (mut display, rx) = BroadcastDisplay::new(4);
        drop(rx);
        assert!(display
            .show(&Frame::new(0, RgbImage::new(1, 1), Utc::now()))
            .is_ok());
    }
}
