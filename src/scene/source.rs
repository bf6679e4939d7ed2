use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::common::{Frame, GroundTruthRecord};
use crate::scene::generator::SceneGenerator;
use crate::transport::VideoTrack;

/// Feeds the scene generator into the media session as a paced video track.
///
/// Every emitted frame gets the next sequence id, starting at 0, and its ground truth is
/// published on the truth channel before the frame is returned.
pub struct FrameSource {
    generator: SceneGenerator,
    ticker: Interval,
    next_sequence: u64,
    truth_tx: mpsc::Sender<GroundTruthRecord>,
    stopped: bool,
}

impl FrameSource {
    pub fn new(
        generator: SceneGenerator,
        tick: Duration,
        truth_capacity: usize,
    ) -> (Self, mpsc::Receiver<GroundTruthRecord>) {
        let (truth_tx, truth_rx) = mpsc::channel(truth_capacity.max(1));
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        (
            Self {
                generator,
                ticker,
                next_sequence: 0,
                truth_tx,
                stopped: false,
            },
            truth_rx,
        )
    }

    /// Later pulls return end of stream.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn frames_emitted(&self) -> u64 {
        self.next_sequence
    }
}

#[async_trait]
impl VideoTrack for FrameSource {
    async fn recv(&mut self) -> Option<Frame> {
        if self.stopped {
            return None;
        }
        self.ticker.tick().await;
        if self.stopped {
            return None;
        }

        let scene = self.generator.advance();
        let sequence_id = self.next_sequence;
        self.next_sequence += 1;

        let truth = GroundTruthRecord {
            sequence_id,
            true_x: scene.x,
            true_y: scene.y,
        };
        match self.truth_tx.try_send(truth) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Ground truth channel full, frame {} will not be evaluated", sequence_id);
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Ground truth receiver dropped");
            }
        }

        Some(Frame::new(sequence_id, scene.image, Utc::now()))
    }
}
