use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::common::{FeedbackMessage, SideMessage};
use crate::config::FeedbackFailurePolicy;
use crate::error::AppError;
use crate::tracking::{Counter, ResultSlot, TrackingMetrics};
use crate::transport::SideSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Sent { sequence_id: u64 },
    /// Slot empty, or its result already went out.
    Suppressed,
}

/// Periodically reports the newest detection result to the producer.
///
/// Runs on its own cadence, unrelated to frame or detection rates, and never sends the same
/// sequence id twice in a row.
pub struct FeedbackTransmitter {
    slot: Arc<ResultSlot>,
    sender: SideSender,
    metrics: Arc<TrackingMetrics>,
    last_sent: Option<u64>,
    retries: u32,
    backoff: Duration,
    send_timeout: Duration,
}

impl FeedbackTransmitter {
    pub fn new(
        slot: Arc<ResultSlot>,
        sender: SideSender,
        metrics: Arc<TrackingMetrics>,
        retries: u32,
        backoff: Duration,
        send_timeout: Duration,
    ) -> Self {
        Self {
            slot,
            sender,
            metrics,
            last_sent: None,
            retries,
            backoff,
            send_timeout,
        }
    }

    pub fn last_sent(&self) -> Option<u64> {
        self.last_sent
    }

    pub async fn tick(&mut self) -> Result<TickOutcome, AppError> {
        let Some(result) = self.slot.latest() else {
            return Ok(TickOutcome::Suppressed);
        };
        if self.last_sent == Some(result.sequence_id) {
            self.metrics.incr(Counter::FeedbackSuppressed);
            return Ok(TickOutcome::Suppressed);
        }

        let bytes = SideMessage::Feedback(FeedbackMessage::from(&result)).encode()?;
        self.send_with_retry(bytes).await?;
        // Only a delivered id counts, so a failed send is retried on the next tick.
        self.last_sent = Some(result.sequence_id);
        self.metrics.incr(Counter::FeedbackSent);
        debug!(
            "Sent feedback for frame {} at ({:.1}, {:.1}), found: {}",
            result.sequence_id, result.estimated_x, result.estimated_y, result.found
        );
        Ok(TickOutcome::Sent {
            sequence_id: result.sequence_id,
        })
    }

    /// Retries while the outgoing queue is full. A closed channel never reopens, so it
    /// fails on the first attempt.
    async fn send_with_retry(&self, bytes: Vec<u8>) -> Result<(), AppError> {
        let attempts = self.retries + 1;
        for attempt in 1..=attempts {
            match self
                .sender
                .send_within(bytes.clone(), self.send_timeout)
                .await
            {
                Ok(()) => return Ok(()),
                Err(AppError::SendTimeout(waited)) => {
                    self.metrics.incr(Counter::FeedbackSendFailures);
                    warn!(
                        "Feedback send attempt {}/{} found the side channel full for {:?}",
                        attempt, attempts, waited
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
                Err(e) => {
                    self.metrics.incr(Counter::FeedbackSendFailures);
                    return Err(e);
                }
            }
        }
        Err(AppError::FeedbackExhausted(attempts))
    }

    /// Ticks every `interval` until cancelled. Returns an error only under
    /// `FeedbackFailurePolicy::Terminate`.
    pub async fn run(
        mut self,
        interval: Duration,
        policy: FeedbackFailurePolicy,
        cancel: CancellationToken,
    ) -> Result<(), AppError> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Feedback transmitter stopping, last sent {:?}", self.last_sent);
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.tick().await {
                error!("Feedback channel failed: {}", e);
                return match policy {
                    FeedbackFailurePolicy::Terminate => Err(e),
                    FeedbackFailurePolicy::Continue => {
                        info!("Feedback disabled, video keeps streaming");
                        Ok(())
                    }
                };
            }
        }
    }
}
