use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::app::views::{frame_view::FrameView, View};
use crate::common::Frame;
use crate::config::DisplaySettings;
use crate::error::AppError;
use crate::tracking::{ResultSlot, TrackingMetrics};

/// Window showing the incoming video with the tracker's estimate overlaid.
pub struct LiveView {
    frame_rx: broadcast::Receiver<Frame>,
    slot: Arc<ResultSlot>,
    metrics: Arc<TrackingMetrics>,
    frame_view: FrameView,
    errors: Vec<AppError>,
}

impl LiveView {
    pub fn new(
        frame_rx: broadcast::Receiver<Frame>,
        slot: Arc<ResultSlot>,
        metrics: Arc<TrackingMetrics>,
    ) -> Self {
        Self {
            frame_rx,
            slot,
            metrics,
            frame_view: FrameView::default(),
            errors: Vec::new(),
        }
    }

    /// Blocks the calling thread until the window is closed.
    pub fn start_gui(self, settings: &DisplaySettings) -> Result<(), AppError> {
        let options = eframe::NativeOptions {
            viewport: egui::ViewportBuilder::default()
                .with_inner_size(egui::vec2(1024.0, 640.0))
                .with_title(settings.title.clone()),
            ..Default::default()
        };
        info!("Opening live view");
        eframe::run_native(
            &settings.title,
            options,
            Box::new(move |_cc| Ok(Box::new(self))),
        )
        .map_err(|e| AppError::Ui(e.to_string()))
    }

    /// Keeps only the newest frame queued on the broadcast channel.
    fn newest_frame(&mut self) -> Option<Frame> {
        let mut newest = None;
        loop {
            match self.frame_rx.try_recv() {
                Ok(frame) => newest = Some(frame),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Live view lagged behind, skipping {} frames", n);
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    if self.errors.is_empty() {
                        self.errors.push(AppError::Ui(
                            "Frame stream closed. The session has ended.".to_string(),
                        ));
                    }
                    break;
                }
                Err(broadcast::error::TryRecvError::Empty) => break,
            }
        }
        newest
    }
}

impl eframe::App for LiveView {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let frame = self.newest_frame();
        self.frame_view.update(frame, self.slot.latest());

        egui::TopBottomPanel::top("stats_panel").show(ctx, |ui| {
            let stats = self.metrics.snapshot();
            ui.horizontal(|ui| {
                ui.label(format!("Received: {}", stats.frames_received));
                ui.label(format!("Dropped: {}", stats.frames_dropped));
                ui.label(format!(
                    "Found: {} / Missed: {}",
                    stats.detections_found, stats.detections_missed
                ));
                ui.label(format!("Feedback sent: {}", stats.feedback_sent));
                ui.label(format!(
                    "Detection: {:.0}us avg",
                    stats.average_detection_us
                ));
            });
        });

        egui::TopBottomPanel::bottom("error_panel")
            .resizable(true)
            .show(ctx, |ui| {
                ui.heading("Error Log");
                egui::ScrollArea::vertical().show(ui, |ui| {
                    for error in self.errors.iter().rev() {
                        ui.label(format!("[ERROR] {}", error));
                    }
                });
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            self.frame_view.draw(ui);
        });
        ctx.request_repaint();
    }
}
