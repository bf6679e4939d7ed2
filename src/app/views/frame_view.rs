use egui::{Color32, Pos2, Stroke, TextureHandle, TextureOptions};

use crate::app::views::View;
use crate::common::{DetectionResult, Frame};

const OVERLAY_RADIUS: f32 = 12.0;

/// Draws one frame with the latest estimate on top of it.
pub struct FrameView {
    texture: Option<TextureHandle>,
    shown_sequence: Option<u64>,
    current_frame: Option<Frame>,
    estimate: Option<DetectionResult>,
    show_estimate: bool,
}

impl Default for FrameView {
    fn default() -> Self {
        Self {
            texture: None,
            shown_sequence: None,
            current_frame: None,
            estimate: None,
            show_estimate: true,
        }
    }
}

impl FrameView {
    pub fn update(&mut self, frame: Option<Frame>, estimate: Option<DetectionResult>) {
        if frame.is_some() {
            self.current_frame = frame;
        }
        self.estimate = estimate;
    }

    fn draw_frame_info(&self, ui: &mut egui::Ui, frame: &Frame) {
        ui.group(|ui| {
            let (width, height) = frame.dimensions();
            ui.label(format!("Frame {}", frame.sequence_id()));
            ui.label(format!("Size: {}x{}", width, height));
            ui.label(format!("Captured: {}", frame.capture_time()));
            match &self.estimate {
                Some(result) if result.found => ui.label(format!(
                    "Estimate for frame {}: ({:.1}, {:.1}), area {}",
                    result.sequence_id, result.estimated_x, result.estimated_y, result.area
                )),
                Some(result) => ui.label(format!("Ball lost at frame {}", result.sequence_id)),
                None => ui.label("No estimate yet"),
            };
        });
    }

    fn draw_image(&mut self, ui: &mut egui::Ui, frame: &Frame) {
        if self.shown_sequence != Some(frame.sequence_id()) {
            let image = frame.image();
            let color_image = egui::ColorImage::from_rgb(
                [image.width() as usize, image.height() as usize],
                image.as_raw().as_slice(),
            );
            match &mut self.texture {
                Some(texture) => texture.set(color_image, TextureOptions::default()),
                None => {
                    self.texture = Some(ui.ctx().load_texture(
                        "live_frame",
                        color_image,
                        TextureOptions::default(),
                    ))
                }
            }
            self.shown_sequence = Some(frame.sequence_id());
        }

        let Some(texture) = &self.texture else {
            return;
        };
        let response = ui.image(texture);
        if !self.show_estimate {
            return;
        }
        if let Some(result) = self.estimate.filter(|r| r.found) {
            let rect = response.rect;
            let (width, _) = frame.dimensions();
            let scale = rect.width() / width.max(1) as f32;
            let center = Pos2::new(
                rect.min.x + result.estimated_x as f32 * scale,
                rect.min.y + result.estimated_y as f32 * scale,
            );
            ui.painter()
                .circle_stroke(center, OVERLAY_RADIUS, Stroke::new(2.0, Color32::RED));
        }
    }
}

impl View for FrameView {
    fn draw(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.checkbox(&mut self.show_estimate, "Show Estimate");
        });
        ui.separator();

        if let Some(frame) = self.current_frame.clone() {
            self.draw_frame_info(ui, &frame);
            self.draw_image(ui, &frame);
        } else {
            ui.heading("Waiting for video");
        }
    }
}
