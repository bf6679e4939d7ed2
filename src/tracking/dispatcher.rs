use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::common::Frame;
use crate::error::AppError;
use crate::tracking::detector::Detector;
use crate::tracking::mailbox::Handoff;
use crate::tracking::metrics::Counter;
use crate::tracking::worker::{DetectionWorker, WorkerContext};

/// Builds a fresh detector for every worker generation.
pub type DetectorFactory = Arc<dyn Fn() -> Box<dyn Detector> + Send + Sync>;

/// Hands frames from the reception path to the detection worker without blocking, and
/// supervises the worker thread.
pub struct TrackingDispatcher {
    context: WorkerContext,
    factory: DetectorFactory,
    worker: Option<DetectionWorker>,
    next_generation: u32,
    restarts_left: u32,
}

impl TrackingDispatcher {
    pub fn start(
        context: WorkerContext,
        factory: DetectorFactory,
        max_restarts: u32,
    ) -> Result<Self, AppError> {
        let mut dispatcher = Self {
            context,
            factory,
            worker: None,
            next_generation: 0,
            restarts_left: max_restarts,
        };
        dispatcher.spawn_worker()?;
        Ok(dispatcher)
    }

    fn spawn_worker(&mut self) -> Result<(), AppError> {
        let generation = self.next_generation;
        self.next_generation += 1;
        let worker = DetectionWorker::spawn(generation, (self.factory)(), self.context.clone())?;
        self.worker = Some(worker);
        Ok(())
    }

    /// Surfaces a dead worker. Restarts it while the restart budget lasts, then fails.
    pub fn check_worker(&mut self) -> Result<(), AppError> {
        if self.context.cancel.is_cancelled() {
            return Ok(());
        }
        let finished = self
            .worker
            .as_ref()
            .map(DetectionWorker::is_finished)
            .unwrap_or(true);
        if !finished {
            return Ok(());
        }

        let cause = match self.worker.take().map(DetectionWorker::join) {
            Some(Err(e)) => e.to_string(),
            Some(Ok(summary)) => format!(
                "generation {} exited after {} frames",
                summary.generation, summary.frames_processed
            ),
            None => "no worker running".to_string(),
        };
        error!("Detection worker stopped: {}", cause);

        if self.restarts_left == 0 {
            return Err(AppError::WorkerDied(cause));
        }
        self.restarts_left -= 1;
        self.context.metrics.incr(Counter::WorkerRestarts);
        self.spawn_worker()?;
        warn!(
            "Restarted detection worker as generation {}, {} restarts left",
            self.next_generation - 1,
            self.restarts_left
        );
        Ok(())
    }

    /// Offers the frame to the worker. Never waits for detection to finish.
    pub fn dispatch(&mut self, frame: Frame) -> Result<(), AppError> {
        self.check_worker()?;
        let sequence_id = frame.sequence_id();
        match self.context.mailbox.offer(frame) {
            Handoff::Accepted => {
                self.context.metrics.incr(Counter::FramesHandedOff);
            }
            Handoff::Replaced { dropped } => {
                self.context.metrics.incr(Counter::FramesHandedOff);
                self.context.metrics.incr(Counter::FramesDropped);
                debug!(
                    "Worker busy, frame {} replaced pending frame {}",
                    sequence_id, dropped
                );
            }
            Handoff::Rejected { dropped } => {
                self.context.metrics.incr(Counter::FramesDropped);
                debug!("Worker busy, frame {} dropped", dropped);
            }
            Handoff::Closed => {
                debug!("Mailbox closed, frame {} not handed off", sequence_id);
            }
        }
        Ok(())
    }

    /// Stops the worker after its current frame, waiting at most `timeout`.
    ///
    /// The join runs on a detached thread rather than the blocking pool, so a detector that
    /// never returns is abandoned on timeout and cannot hold the runtime open.
    pub async fn shutdown(mut self, timeout: Duration) -> Result<(), AppError> {
        self.context.cancel.cancel();
        self.context.mailbox.close();
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        let generation = worker.generation();
        let (joined_tx, joined_rx) = oneshot::channel();
        std::thread::Builder::new()
            .name(format!("detection-{}-join", generation))
            .spawn(move || {
                // The receiver is gone once shutdown gave up waiting.
                let _ = joined_tx.send(worker.join());
            })
            .map_err(|e| AppError::WorkerDied(format!("failed to spawn join thread: {}", e)))?;

        match tokio::time::timeout(timeout, joined_rx).await {
            Ok(Ok(Ok(summary))) => {
                info!(
                    "Detection worker {} joined after {} frames",
                    generation, summary.frames_processed
                );
                Ok(())
            }
            Ok(Ok(Err(e))) => {
                warn!("Detection worker {} ended with error: {}", generation, e);
                Ok(())
            }
            Ok(Err(_)) => Err(AppError::WorkerDied(format!(
                "join thread for generation {} vanished",
                generation
            ))),
            Err(_) => {
                error!(
                    "Detection worker {} still busy after {:?}, abandoning it",
                    generation, timeout
                );
                Err(AppError::ShutdownTimeout(timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OverflowPolicy;
    use crate::error::DetectionError;
    use crate::tracking::detector::Blob;
    use crate::tracking::mailbox::FrameMailbox;
    use crate::tracking::metrics::TrackingMetrics;
    use crate::tracking::slot::ResultSlot;
    use crate::tracking::worker::WorkerConfig;
    use chrono::Utc;
    use image::RgbImage;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Mutex};
    use std::time::Instant;
    use tokio_util::sync::CancellationToken;

    fn context() -> WorkerContext {
        WorkerContext {
            mailbox: Arc::new(FrameMailbox::new(1, OverflowPolicy::DropOldest)),
            slot: Arc::new(ResultSlot::new()),
            metrics: Arc::new(TrackingMetrics::new()),
            cancel: CancellationToken::new(),
            config: WorkerConfig {
                poll: Duration::from_millis(5),
                fault_threshold: 1,
            },
        }
    }

    fn frame(id: u64) -> Frame {
        Frame::new(id, RgbImage::new(2, 2), Utc::now())
    }

    /// Records what it saw and takes longer than the frame interval.
    struct SlowDetector {
        delay: Duration,
        seen: Arc<Mutex<Vec<u64>>>,
    }

    impl Detector for SlowDetector {
        fn detect(&mut self, frame: &Frame) -> Result<Option<Blob>, DetectionError> {
            self.seen.lock().unwrap().push(frame.sequence_id());
            std::thread::sleep(self.delay);
            Ok(None)
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    struct FailingDetector;

    impl Detector for FailingDetector {
        fn detect(&mut self, frame: &Frame) -> Result<Option<Blob>, DetectionError> {
            Err(DetectionError::EmptyImage(frame.sequence_id()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn slow_worker_skips_frames_but_stays_fresh() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let factory_seen = Arc::clone(&seen);
        let context = context();
        let mut dispatcher = TrackingDispatcher::start(
            context.clone(),
            Arc::new(move || {
                Box::new(SlowDetector {
                    delay: Duration::from_millis(30),
                    seen: Arc::clone(&factory_seen),
                }) as Box<dyn Detector>
            }),
            0,
        )
        .unwrap();

        let started = Instant::now();
        for id in 0..40 {
            dispatcher.dispatch(frame(id)).unwrap();
            assert!(context.mailbox.pending() <= 1);
            tokio::time::sleep(Duration::from_millis(3)).await;
        }
        // Dispatching never waited on detection.
        assert!(started.elapsed() < Duration::from_millis(40 * 30));

        let deadline = Instant::now() + Duration::from_secs(5);
        while context.slot.latest().map(|r| r.sequence_id) != Some(39) {
            assert!(Instant::now() < deadline, "last frame never analysed");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        dispatcher.shutdown(Duration::from_secs(2)).await.unwrap();

        let seen = seen.lock().unwrap().clone();
        assert!(seen.len() < 40, "expected dropped frames, saw {:?}", seen);
        assert!(seen.windows(2).all(|w| w[0] < w[1]), "out of order: {:?}", seen);
        assert_eq!(seen.last(), Some(&39));
        assert!(context.metrics.get(Counter::FramesDropped) > 0);
    }

    #[tokio::test]
    async fn dead_worker_is_restarted_then_surfaced() {
        let context = context();
        let mut dispatcher = TrackingDispatcher::start(
            context.clone(),
            Arc::new(|| Box::new(FailingDetector) as Box<dyn Detector>),
            1,
        )
        .unwrap();

        dispatcher.dispatch(frame(0)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !dispatcher.worker.as_ref().unwrap().is_finished() {
            assert!(Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        dispatcher.check_worker().unwrap();
        assert_eq!(dispatcher.worker.as_ref().unwrap().generation(), 1);
        assert_eq!(context.metrics.get(Counter::WorkerRestarts), 1);

        dispatcher.dispatch(frame(1)).unwrap();
        while !dispatcher.worker.as_ref().unwrap().is_finished() {
            assert!(Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(matches!(
            dispatcher.dispatch(frame(2)),
            Err(AppError::WorkerDied(_))
        ));
    }

    /// Blocks inside `detect` until released.
    struct StuckDetector {
        entered: Arc<AtomicBool>,
        release: Option<mpsc::Receiver<()>>,
    }

    impl Detector for StuckDetector {
        fn detect(&mut self, _frame: &Frame) -> Result<Option<Blob>, DetectionError> {
            self.entered.store(true, Ordering::SeqCst);
            if let Some(release) = &self.release {
                let _ = release.recv();
            }
            Ok(None)
        }

        fn name(&self) -> &'static str {
            "stuck"
        }
    }

    #[test]
    fn stuck_detector_does_not_hold_the_runtime() {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Arc::new(Mutex::new(Some(release_rx)));
        let entered = Arc::new(AtomicBool::new(false));
        let factory_entered = Arc::clone(&entered);
        let factory: DetectorFactory = Arc::new(move || {
            Box::new(StuckDetector {
                entered: Arc::clone(&factory_entered),
                release: release_rx.lock().unwrap().take(),
            }) as Box<dyn Detector>
        });

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        let started = Instant::now();
        let outcome = runtime.block_on(async {
            let mut dispatcher = TrackingDispatcher::start(context(), factory, 0).unwrap();
            dispatcher.dispatch(frame(0)).unwrap();
            while !entered.load(Ordering::SeqCst) {
                assert!(started.elapsed() < Duration::from_secs(5));
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            dispatcher.shutdown(Duration::from_millis(100)).await
        });
        assert!(matches!(outcome, Err(AppError::ShutdownTimeout(_))));

        drop(runtime);
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "runtime drop waited {:?}",
            started.elapsed()
        );
        drop(release_tx);
    }

    #[tokio::test]
    async fn shutdown_lets_the_current_frame_finish_and_skips_pending_ones() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let factory_seen = Arc::clone(&seen);
        let context = context();
        let mut dispatcher = TrackingDispatcher::start(
            context.clone(),
            Arc::new(move || {
                Box::new(SlowDetector {
                    delay: Duration::from_millis(100),
                    seen: Arc::clone(&factory_seen),
                }) as Box<dyn Detector>
            }),
            0,
        )
        .unwrap();

        dispatcher.dispatch(frame(0)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.lock().unwrap().is_empty() {
            assert!(Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        dispatcher.dispatch(frame(1)).unwrap();

        let started = Instant::now();
        dispatcher.shutdown(Duration::from_secs(2)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(*seen.lock().unwrap(), vec![0]);
        assert_eq!(context.slot.latest().map(|r| r.sequence_id), Some(0));
    }

    #[tokio::test]
    async fn shutdown_joins_an_idle_worker() {
        let dispatcher = TrackingDispatcher::start(
            context(),
            Arc::new(|| Box::new(FailingDetector) as Box<dyn Detector>),
            0,
        )
        .unwrap();
        dispatcher.shutdown(Duration::from_secs(1)).await.unwrap();
    }
}
