//! Movement classification: separates exertion from anxiety.
//!
//! Intensity is the acceleration norm with the static gravity component removed, scaled to
//! 0..=100. Missing motion data is treated as stationary.

use nalgebra::Vector3;

use crate::settings::MovementConfig;
use crate::domain::{Sample, Vec3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementTag {
    pub intensity: f64,
    pub exercise_like: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MovementClassifier {
    pub cfg: MovementConfig,
}

impl MovementClassifier {
    pub fn new(cfg: MovementConfig) -> Self {
        Self { cfg }
    }

    /// `min(100, |‖accel‖ − g| × scale)`.
    pub fn intensity(&self, accel: Option<&Vec3>) -> f64 {
        let Some(a) = accel else {
            return 0.0;
        };
        let norm = Vector3::new(a.x, a.y, a.z).norm();
        ((norm - self.cfg.gravity).abs() * self.cfg.scale).min(100.0)
    }

    /// Exercise-like: very high intensity, or moderate intensity with a proportional HR rise.
    pub fn is_exercise_like(&self, intensity: f64, heart_rate: f64, baseline_hr: f64) -> bool {
        if intensity > self.cfg.exercise_intensity {
            return true;
        }
        let elevation_pct = if baseline_hr > 0.0 {
            (heart_rate - baseline_hr) / baseline_hr * 100.0
        } else {
            0.0
        };
        intensity > self.cfg.moderate_intensity && elevation_pct > self.cfg.exercise_elevation_pct
    }

    pub fn classify(&self, sample: &Sample, baseline_hr: f64) -> MovementTag {
        let intensity = self.intensity(sample.accel.as_ref());
        MovementTag {
            intensity,
            exercise_like: self.is_exercise_like(intensity, sample.heart_rate, baseline_hr),
        }
    }
}
