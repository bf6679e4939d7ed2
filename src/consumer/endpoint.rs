use std::sync::Arc;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::common::SideMessage;
use crate::config::Settings;
use crate::consumer::display::FrameDisplay;
use crate::consumer::sink::FrameSink;
use crate::consumer::transmitter::FeedbackTransmitter;
use crate::error::AppError;
use crate::tracking::{
    ColorThresholdDetector, Counter, Detector, DetectorFactory, FrameMailbox, MetricsSnapshot,
    ResultSlot, TrackingDispatcher, TrackingMetrics, WorkerConfig, WorkerContext,
};
use crate::transport::MediaSession;

/// The receiving endpoint: displays frames, tracks the ball and reports positions back.
pub struct Consumer {
    settings: Settings,
    session: MediaSession,
    display: Box<dyn FrameDisplay>,
    factory: DetectorFactory,
    slot: Arc<ResultSlot>,
    metrics: Arc<TrackingMetrics>,
}

impl Consumer {
    pub fn new(settings: Settings, session: MediaSession, display: Box<dyn FrameDisplay>) -> Self {
        let detection = settings.detection.clone();
        let factory: DetectorFactory = Arc::new(move || {
            Box::new(ColorThresholdDetector::new(&detection)) as Box<dyn Detector>
        });
        Self {
            settings,
            session,
            display,
            factory,
            slot: Arc::new(ResultSlot::new()),
            metrics: Arc::new(TrackingMetrics::new()),
        }
    }

    pub fn with_detector_factory(mut self, factory: DetectorFactory) -> Self {
        self.factory = factory;
        self
    }

    /// Shared with viewers that overlay the current estimate.
    pub fn slot(&self) -> Arc<ResultSlot> {
        Arc::clone(&self.slot)
    }

    pub fn metrics(&self) -> Arc<TrackingMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Runs until cancelled, the frame stream ends, or the pipeline fails.
    pub async fn run(self, cancel: CancellationToken) -> Result<MetricsSnapshot, AppError> {
        let Consumer {
            settings,
            mut session,
            display,
            factory,
            slot,
            metrics,
        } = self;
        let pipeline = &settings.pipeline;
        let stop = cancel.child_token();
        info!("Consumer running on session {}", session.id);

        let context = WorkerContext {
            mailbox: Arc::new(FrameMailbox::new(
                pipeline.handoff_capacity,
                pipeline.overflow_policy,
            )),
            slot: Arc::clone(&slot),
            metrics: Arc::clone(&metrics),
            cancel: stop.clone(),
            config: WorkerConfig {
                poll: pipeline.worker_poll(),
                fault_threshold: pipeline.worker_fault_threshold,
            },
        };
        let dispatcher = TrackingDispatcher::start(context, factory, pipeline.max_worker_restarts)?;
        let mut sink = FrameSink::new(display, dispatcher, Arc::clone(&metrics));

        let transmitter = FeedbackTransmitter::new(
            Arc::clone(&slot),
            session.side_tx.clone(),
            Arc::clone(&metrics),
            pipeline.send_retries,
            pipeline.retry_backoff(),
            pipeline.send_timeout(),
        );
        let mut transmitter_task = tokio::spawn(transmitter.run(
            pipeline.feedback_interval(),
            pipeline.feedback_failure_policy,
            stop.clone(),
        ));
        let mut transmitter_done = false;

        let mut stats = tokio::time::interval_at(
            Instant::now() + pipeline.stats_interval(),
            pipeline.stats_interval(),
        );
        stats.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut side_open = true;

        let outcome = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Consumer cancelled");
                    break Ok(());
                }
                frame = session.frames.pull_frame() => match frame {
                    Some(frame) => {
                        if let Err(e) = sink.on_frame(frame) {
                            break Err(e);
                        }
                    }
                    None => match session.take_fault() {
                        Some(fault) => break Err(fault.into()),
                        None => {
                            info!("Frame stream ended");
                            break Ok(());
                        }
                    },
                },
                bytes = session.side_rx.receive(), if side_open => match bytes {
                    Some(bytes) => handle_side_message(&bytes, &metrics),
                    None => {
                        debug!("Side channel closed by peer");
                        side_open = false;
                    }
                },
                _ = stats.tick() => {
                    if let Err(e) = sink.check_worker() {
                        break Err(e);
                    }
                    info!("Consumer stats: {:?}", metrics.snapshot());
                }
                joined = &mut transmitter_task, if !transmitter_done => {
                    transmitter_done = true;
                    match joined {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => break Err(e),
                        Err(e) => {
                            break Err(AppError::SessionClosed(format!(
                                "feedback transmitter task failed: {}",
                                e
                            )))
                        }
                    }
                }
            }
        };
        if let Err(e) = &outcome {
            error!("Consumer stopping: {}", e);
        }

        stop.cancel();
        let timeout = pipeline.shutdown_timeout();
        let shutdown = async {
            sink.shutdown(timeout).await?;
            if !transmitter_done {
                match transmitter_task.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("Feedback transmitter ended with {}", e),
                    Err(e) => warn!("Feedback transmitter task failed: {}", e),
                }
            }
            Ok::<(), AppError>(())
        };
        let shutdown_result = tokio::time::timeout(timeout, shutdown)
            .await
            .unwrap_or(Err(AppError::ShutdownTimeout(timeout)));
        session.close(timeout).await;

        let snapshot = metrics.snapshot();
        info!("Consumer finished: {:?}", snapshot);
        outcome?;
        shutdown_result?;
        Ok(snapshot)
    }
}

fn handle_side_message(bytes: &[u8], metrics: &TrackingMetrics) {
    match SideMessage::decode(bytes) {
        Ok(SideMessage::Ack(ack)) => {
            metrics.incr(Counter::AcksReceived);
            match ack.error_distance {
                Some(distance) => debug!(
                    "Producer matched frame {} with error {:.2}px",
                    ack.sequence_id, distance
                ),
                None => debug!(
                    "Producer acknowledged frame {}, matched: {}",
                    ack.sequence_id, ack.matched
                ),
            }
        }
        Ok(other) => warn!("Unexpected side message on consumer: {:?}", other),
        Err(e) => warn!("Ignoring side message: {}", e),
    }
}
