use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::common::{DetectionResult, Frame};
use crate::error::{AppError, DetectionError};
use crate::tracking::detector::Detector;
use crate::tracking::mailbox::{FrameMailbox, Take};
use crate::tracking::metrics::{Counter, TrackingMetrics};
use crate::tracking::slot::ResultSlot;

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// How long a single wait on the mailbox lasts before the cancel token is rechecked.
    pub poll: Duration,
    /// Consecutive faults after which the worker gives up.
    pub fault_threshold: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerSummary {
    pub generation: u32,
    pub frames_processed: u64,
    pub last_sequence_id: Option<u64>,
}

/// Shared state every worker generation is wired to.
#[derive(Clone)]
pub struct WorkerContext {
    pub mailbox: Arc<FrameMailbox>,
    pub slot: Arc<ResultSlot>,
    pub metrics: Arc<TrackingMetrics>,
    pub cancel: CancellationToken,
    pub config: WorkerConfig,
}

/// Handle to a detection thread.
pub struct DetectionWorker {
    generation: u32,
    thread: JoinHandle<Result<WorkerSummary, AppError>>,
}

impl DetectionWorker {
    pub fn spawn(
        generation: u32,
        detector: Box<dyn Detector>,
        context: WorkerContext,
    ) -> Result<Self, AppError> {
        let worker_loop = WorkerLoop {
            generation,
            detector,
            context,
            consecutive_faults: 0,
            last_position: (0.0, 0.0),
            summary: WorkerSummary {
                generation,
                ..WorkerSummary::default()
            },
        };
        let thread = std::thread::Builder::new()
            .name(format!("detection-{}", generation))
            .spawn(move || worker_loop.run())
            .map_err(|e| AppError::WorkerDied(format!("failed to spawn thread: {}", e)))?;
        Ok(Self { generation, thread })
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Blocks until the thread exits. A panic that escaped the fault boundary is reported
    /// as a worker death.
    pub fn join(self) -> Result<WorkerSummary, AppError> {
        match self.thread.join() {
            Ok(result) => result,
            Err(panic) => Err(AppError::WorkerDied(format!(
                "generation {} panicked: {}",
                self.generation,
                panic_message(panic.as_ref())
            ))),
        }
    }
}

struct WorkerLoop {
    generation: u32,
    detector: Box<dyn Detector>,
    context: WorkerContext,
    consecutive_faults: u32,
    last_position: (f64, f64),
    summary: WorkerSummary,
}

impl WorkerLoop {
    fn run(mut self) -> Result<WorkerSummary, AppError> {
        info!(
            "Detection worker {} started with {}",
            self.generation,
            self.detector.name()
        );
        loop {
            if self.context.cancel.is_cancelled() {
                debug!("Detection worker {} cancelled", self.generation);
                break;
            }
            match self.context.mailbox.take(self.context.config.poll) {
                Take::Frame(frame) => self.process(frame)?,
                Take::Timeout => continue,
                Take::Closed => {
                    debug!("Detection worker {} mailbox closed", self.generation);
                    break;
                }
            }
        }
        info!(
            "Detection worker {} stopped after {} frames",
            self.generation, self.summary.frames_processed
        );
        Ok(self.summary)
    }

    fn process(&mut self, frame: Frame) -> Result<(), AppError> {
        let sequence_id = frame.sequence_id();
        let started = Instant::now();
        let detector = &mut self.detector;
        let outcome = catch_unwind(AssertUnwindSafe(|| detector.detect(&frame)))
            .unwrap_or_else(|panic| {
                Err(DetectionError::Panicked(
                    sequence_id,
                    panic_message(panic.as_ref()),
                ))
            });
        self.context
            .metrics
            .record_detection_latency(started.elapsed());

        let result = match outcome {
            Ok(Some(blob)) => {
                self.consecutive_faults = 0;
                self.last_position = (blob.x, blob.y);
                self.context.metrics.incr(Counter::DetectionsFound);
                DetectionResult::found(sequence_id, blob.x, blob.y, blob.area)
            }
            Ok(None) => {
                self.consecutive_faults = 0;
                self.context.metrics.incr(Counter::DetectionsMissed);
                debug!("No object found in frame {}", sequence_id);
                DetectionResult::missed(sequence_id, self.last_position)
            }
            Err(e) => {
                self.consecutive_faults += 1;
                self.context.metrics.incr(Counter::WorkerFaults);
                error!(
                    "Detection worker {} skipped frame {}: {} ({} consecutive)",
                    self.generation, sequence_id, e, self.consecutive_faults
                );
                if self.consecutive_faults >= self.context.config.fault_threshold.max(1) {
                    return Err(AppError::WorkerDied(format!(
                        "generation {} hit {} consecutive faults, last: {}",
                        self.generation, self.consecutive_faults, e
                    )));
                }
                DetectionResult::missed(sequence_id, self.last_position)
            }
        };

        if !self.context.slot.publish(result) {
            warn!(
                "Detection worker {} result for frame {} is older than the published one",
                self.generation, sequence_id
            );
        }
        self.summary.frames_processed += 1;
        self.summary.last_sequence_id = Some(sequence_id);
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
