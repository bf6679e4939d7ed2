use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_circle_mut;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::config::SceneSettings;

/// One rendered tick of the scene together with the object's true position.
#[derive(Debug, Clone)]
pub struct SceneFrame {
    pub image: RgbImage,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct BallState {
    x: f64,
    y: f64,
    vx: f64,
    vy: f64,
}

/// Renders a ball bouncing inside the frame with reflective walls.
pub struct SceneGenerator {
    settings: SceneSettings,
    seed: u64,
    initial: BallState,
    state: BallState,
}

impl SceneGenerator {
    pub fn new(settings: SceneSettings) -> Self {
        let seed = settings.seed.unwrap_or_else(|| rand::rng().random());
        Self::with_seed(settings, seed)
    }

    pub fn with_seed(settings: SceneSettings, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let (x_min, x_max) = axis_bounds(settings.width, settings.radius);
        let (y_min, y_max) = axis_bounds(settings.height, settings.radius);
        let angle = rng.random_range(0.0..std::f64::consts::TAU);
        let initial = BallState {
            x: sample_in(&mut rng, x_min, x_max),
            y: sample_in(&mut rng, y_min, y_max),
            vx: settings.speed * angle.cos(),
            vy: settings.speed * angle.sin(),
        };
        tracing::debug!(seed, ?initial, "Scene generator seeded");
        Self {
            settings,
            seed,
            initial,
            state: initial,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Restarts the motion from the seeded initial state.
    pub fn reset(&mut self) {
        self.state = self.initial;
    }

    pub fn position(&self) -> (f64, f64) {
        (self.state.x.round(), self.state.y.round())
    }

    /// Steps the physics by one tick and renders the result.
    pub fn advance(&mut self) -> SceneFrame {
        self.step();
        let (x, y) = self.position();
        let mut image = RgbImage::new(self.settings.width, self.settings.height);
        draw_filled_circle_mut(
            &mut image,
            (x as i32, y as i32),
            self.settings.radius as i32,
            Rgb(self.settings.color),
        );
        SceneFrame { image, x, y }
    }

    fn step(&mut self) {
        let (x_min, x_max) = axis_bounds(self.settings.width, self.settings.radius);
        let (y_min, y_max) = axis_bounds(self.settings.height, self.settings.radius);
        let state = &mut self.state;
        state.x += state.vx;
        state.y += state.vy;
        reflect(&mut state.x, &mut state.vx, x_min, x_max);
        reflect(&mut state.y, &mut state.vy, y_min, y_max);
    }
}

fn axis_bounds(extent: u32, radius: u32) -> (f64, f64) {
    let min = radius as f64;
    let max = (extent as f64 - radius as f64).max(min);
    (min, max)
}

fn sample_in(rng: &mut StdRng, min: f64, max: f64) -> f64 {
    if max > min {
        rng.random_range(min..max).round()
    } else {
        min
    }
}

fn reflect(position: &mut f64, velocity: &mut f64, min: f64, max: f64) {
    if *position <= min {
        *position = min;
        *velocity = velocity.abs();
    } else if *position >= max {
        *position = max;
        *velocity = -velocity.abs();
    }
}
