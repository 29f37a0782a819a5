use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::domain::{Severity, US_PER_SEC};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config source: {0}")]
    Source(#[from] config::ConfigError),
    #[error("toml: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Sustained-window detection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// A sample is elevated when `heart_rate >= baseline * threshold_ratio`.
    pub threshold_ratio: f64,
    /// Minimum wall-clock length of an elevated run to count as sustained.
    pub min_sustained_secs: f64,
    /// History windows shorter than this are not trusted.
    pub min_history_points: usize,
    /// How far back the history window reaches from the triggering sample.
    pub lookback_secs: u64,
    pub min_plausible_hr: f64,
    pub max_plausible_hr: f64,
    /// Used only when set explicitly; otherwise a missing baseline skips detection.
    pub fallback_baseline_hr: Option<f64>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold_ratio: 1.2,
            min_sustained_secs: 120.0,
            min_history_points: 3,
            lookback_secs: 600,
            min_plausible_hr: 20.0,
            max_plausible_hr: 250.0,
            fallback_baseline_hr: None,
        }
    }
}

impl DetectorConfig {
    pub fn min_sustained_us(&self) -> i64 {
        (self.min_sustained_secs * US_PER_SEC as f64).round() as i64
    }
}

/// Motion thresholds used to tell exertion from anxiety.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    /// Static gravity component removed from the acceleration norm (m/s^2).
    pub gravity: f64,
    /// Intensity points per m/s^2 of residual acceleration.
    pub scale: f64,
    /// Above this intensity a sample is exercise regardless of heart rate.
    pub exercise_intensity: f64,
    /// Above this intensity a sample is exercise if heart rate is also well above baseline.
    pub moderate_intensity: f64,
    /// Heart-rate elevation (% over baseline) that pairs with `moderate_intensity`.
    pub exercise_elevation_pct: f64,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            gravity: 9.81,
            scale: 10.0,
            exercise_intensity: 50.0,
            moderate_intensity: 30.0,
            exercise_elevation_pct: 30.0,
        }
    }
}

/// Cooldown tuple for one severity bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownPolicy {
    /// Default cooldown, also used after a confirmed alert.
    pub base_cooldown_secs: u64,
    /// Used after the subject denied being anxious.
    pub confirmed_cooldown_secs: u64,
    /// Used after the subject ignored or deferred the alert.
    pub dismissed_cooldown_secs: u64,
    /// Feedback older than this no longer adjusts the cooldown.
    pub max_cooldown_age_secs: u64,
}

impl CooldownPolicy {
    pub const fn new(base: u64, confirmed: u64, dismissed: u64, max_age: u64) -> Self {
        Self {
            base_cooldown_secs: base,
            confirmed_cooldown_secs: confirmed,
            dismissed_cooldown_secs: dismissed,
            max_cooldown_age_secs: max_age,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub mild: CooldownPolicy,
    pub moderate: CooldownPolicy,
    pub severe: CooldownPolicy,
    pub critical: CooldownPolicy,
    /// Subject-wide minimum gap between any two notifications.
    pub min_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            mild: CooldownPolicy::new(30 * 60, 60 * 60, 45 * 60, 24 * 3600),
            moderate: CooldownPolicy::new(20 * 60, 60 * 60, 30 * 60, 24 * 3600),
            severe: CooldownPolicy::new(10 * 60, 45 * 60, 20 * 60, 12 * 3600),
            critical: CooldownPolicy::new(5 * 60, 15 * 60, 10 * 60, 6 * 3600),
            min_interval_secs: 60,
        }
    }
}

impl RateLimitConfig {
    pub fn policy(&self, severity: Severity) -> &CooldownPolicy {
        match severity {
            Severity::Mild => &self.mild,
            Severity::Moderate => &self.moderate,
            Severity::Severe => &self.severe,
            Severity::Critical => &self.critical,
        }
    }

    pub fn min_interval_us(&self) -> i64 {
        self.min_interval_secs as i64 * US_PER_SEC
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    pub detector: DetectorConfig,
    pub movement: MovementConfig,
    pub rate_limit: RateLimitConfig,
}

impl VigilConfig {
    /// Load defaults, then an optional TOML file, then `VIGIL__SECTION__KEY` env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(p) = path {
            builder = builder.add_source(
                config::File::new(&p.to_string_lossy(), config::FileFormat::Toml).required(true),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix("VIGIL")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );
        let cfg: VigilConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: VigilConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.detector;
        if !(d.threshold_ratio > 1.0) {
            return Err(ConfigError::Invalid("detector.threshold_ratio must be > 1.0".into()));
        }
        if !(d.min_sustained_secs > 0.0) {
            return Err(ConfigError::Invalid("detector.min_sustained_secs must be > 0".into()));
        }
        if d.lookback_secs == 0 {
            return Err(ConfigError::Invalid("detector.lookback_secs must be > 0".into()));
        }
        if (d.lookback_secs as f64) < d.min_sustained_secs {
            return Err(ConfigError::Invalid(
                "detector.lookback_secs shorter than min_sustained_secs".into(),
            ));
        }
        if !(d.min_plausible_hr < d.max_plausible_hr) {
            return Err(ConfigError::Invalid("detector plausible HR range is empty".into()));
        }
        if matches!(d.fallback_baseline_hr, Some(b) if !(b > 0.0)) {
            return Err(ConfigError::Invalid("detector.fallback_baseline_hr must be > 0".into()));
        }
        if !(self.movement.scale > 0.0) {
            return Err(ConfigError::Invalid("movement.scale must be > 0".into()));
        }
        for sev in Severity::ALL {
            let p = self.rate_limit.policy(sev);
            if p.base_cooldown_secs == 0 {
                return Err(ConfigError::Invalid(format!("rate_limit.{sev}.base_cooldown_secs must be > 0")));
            }
        }
        Ok(())
    }
}
