use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::common::{Acknowledgement, GroundTruthRecord, SideMessage};
use crate::config::Settings;
use crate::error::AppError;
use crate::producer::evaluator::{ErrorEvaluator, Evaluation, EvaluationReport};
use crate::scene::{FrameSource, SceneGenerator};
use crate::transport::{MediaSession, VideoTrack};

/// The sending endpoint: streams the synthetic scene and scores the feedback it gets back.
pub struct Producer {
    settings: Settings,
    session: MediaSession,
    track: Box<dyn VideoTrack>,
    truth_rx: mpsc::Receiver<GroundTruthRecord>,
    evaluator: ErrorEvaluator,
}

impl Producer {
    pub fn new(
        settings: Settings,
        session: MediaSession,
        track: Box<dyn VideoTrack>,
        truth_rx: mpsc::Receiver<GroundTruthRecord>,
    ) -> Self {
        let evaluator = ErrorEvaluator::new(settings.pipeline.retention);
        Self {
            settings,
            session,
            track,
            truth_rx,
            evaluator,
        }
    }

    /// Streams the bouncing ball scene configured in `settings.scene`.
    pub fn from_settings(settings: Settings, session: MediaSession) -> Self {
        let generator = SceneGenerator::new(settings.scene.clone());
        info!(
            "Scene {}x{} with radius {}, seed {}",
            settings.scene.width,
            settings.scene.height,
            settings.scene.radius,
            generator.seed()
        );
        let (source, truth_rx) =
            FrameSource::new(generator, settings.scene.tick(), settings.pipeline.retention);
        Self::new(settings, session, Box::new(source), truth_rx)
    }

    /// Streams until cancelled, the track ends, `max_frames` is reached, or the consumer
    /// leaves. Once streaming stops, late feedback is still evaluated for `linger`.
    pub async fn run(self, cancel: CancellationToken) -> Result<EvaluationReport, AppError> {
        let Producer {
            settings,
            mut session,
            mut track,
            mut truth_rx,
            mut evaluator,
        } = self;
        let pipeline = &settings.pipeline;
        info!("Producer streaming on session {}", session.id);

        let mut frames_sent: u64 = 0;
        let mut streaming = pipeline.max_frames != Some(0);
        let linger = tokio::time::sleep(pipeline.linger());
        tokio::pin!(linger);

        let outcome = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Producer cancelled after {} frames", frames_sent);
                    break Ok(());
                }
                frame = track.recv(), if streaming => {
                    let Some(frame) = frame else {
                        info!("Video track ended after {} frames", frames_sent);
                        streaming = false;
                        linger.as_mut().reset(Instant::now() + pipeline.linger());
                        continue;
                    };
                    drain_truth(&mut truth_rx, &mut evaluator);
                    if let Err(e) = session.outbound.push_frame(&frame).await {
                        break Err(e);
                    }
                    frames_sent += 1;
                    if pipeline.max_frames.is_some_and(|max| frames_sent >= max) {
                        info!("Sent {} frames, waiting for late feedback", frames_sent);
                        streaming = false;
                        linger.as_mut().reset(Instant::now() + pipeline.linger());
                    }
                }
                bytes = session.side_rx.receive() => {
                    let Some(bytes) = bytes else {
                        if let Some(fault) = session.take_fault() {
                            break Err(fault.into());
                        }
                        info!("Consumer closed the session");
                        break Ok(());
                    };
                    drain_truth(&mut truth_rx, &mut evaluator);
                    if let Some(ack) = evaluate(&bytes, &mut evaluator) {
                        let sent = match SideMessage::Ack(ack).encode() {
                            Ok(bytes) => session.side_tx.send(bytes).await,
                            Err(e) => Err(e.into()),
                        };
                        if let Err(e) = sent {
                            warn!("Failed to acknowledge frame {}: {}", ack.sequence_id, e);
                        }
                    }
                }
                _ = &mut linger, if !streaming => {
                    debug!("Linger period over");
                    break Ok(());
                }
            }
        };
        if let Err(e) = &outcome {
            error!("Producer stopping: {}", e);
        }

        session.close(pipeline.shutdown_timeout()).await;
        drain_truth(&mut truth_rx, &mut evaluator);
        let report = evaluator.finish();
        info!(
            "Producer finished after {} frames: {:?}",
            frames_sent, report.stats
        );
        outcome?;
        Ok(report)
    }
}

fn drain_truth(
    truth_rx: &mut mpsc::Receiver<GroundTruthRecord>,
    evaluator: &mut ErrorEvaluator,
) {
    while let Ok(truth) = truth_rx.try_recv() {
        evaluator.record(truth);
    }
}

/// Scores one side message. Returns the acknowledgement to send back, if any.
fn evaluate(bytes: &[u8], evaluator: &mut ErrorEvaluator) -> Option<Acknowledgement> {
    let feedback = match SideMessage::decode(bytes) {
        Ok(SideMessage::Feedback(feedback)) => feedback,
        Ok(other) => {
            warn!("Unexpected side message on producer: {:?}", other);
            return None;
        }
        Err(e) => {
            warn!("Ignoring side message: {}", e);
            return None;
        }
    };

    let ack = match evaluator.on_feedback(&feedback) {
        Evaluation::Matched(sample) => {
            info!(
                "Frame {} error {:.2}px (dx {:.1}, dy {:.1})",
                sample.sequence_id, sample.error_distance, sample.dx, sample.dy
            );
            Acknowledgement {
                sequence_id: sample.sequence_id,
                matched: true,
                error_distance: Some(sample.error_distance),
            }
        }
        Evaluation::Missed { sequence_id } => {
            debug!("Consumer lost the ball on frame {}", sequence_id);
            Acknowledgement {
                sequence_id,
                matched: false,
                error_distance: None,
            }
        }
        Evaluation::Unmatched {
            sequence_id,
            reason,
        } => {
            debug!("Feedback for frame {} not scored: {:?}", sequence_id, reason);
            Acknowledgement {
                sequence_id,
                matched: false,
                error_distance: None,
            }
        }
    };
    Some(ack)
}
