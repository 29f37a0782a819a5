use crate::settings::DetectorConfig;
use crate::domain::{Sample, Vec3};

/// Input validation layer for incoming samples.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SampleError {
    #[error("heart rate is not a finite number")]
    NonFiniteHeartRate,
    #[error("heart rate {0} BPM outside plausible range")]
    ImplausibleHeartRate(f64),
    #[error("{0} contains NaN/Inf")]
    NonFiniteField(&'static str),
}

/// Validate a sample before it reaches the analyzer.
///
/// A rejected sample means "cannot evaluate"; the engine reports it as skipped.
pub fn validate_sample(sample: &Sample, cfg: &DetectorConfig) -> Result<(), SampleError> {
    if !sample.heart_rate.is_finite() {
        return Err(SampleError::NonFiniteHeartRate);
    }
    if sample.heart_rate < cfg.min_plausible_hr || sample.heart_rate > cfg.max_plausible_hr {
        return Err(SampleError::ImplausibleHeartRate(sample.heart_rate));
    }
    if matches!(sample.spo2, Some(v) if !v.is_finite()) {
        return Err(SampleError::NonFiniteField("spo2"));
    }
    if matches!(sample.body_temp, Some(v) if !v.is_finite()) {
        return Err(SampleError::NonFiniteField("body_temp"));
    }
    if matches!(sample.accel, Some(v) if !Vec3::is_finite(&v)) {
        return Err(SampleError::NonFiniteField("accel"));
    }
    if matches!(sample.gyro, Some(v) if !Vec3::is_finite(&v)) {
        return Err(SampleError::NonFiniteField("gyro"));
    }
    Ok(())
}
