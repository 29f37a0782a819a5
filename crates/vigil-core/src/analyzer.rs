//! Sustained-window analysis.
//!
//! Finds the longest contiguous run of valid, elevated, worn, non-exercise samples in a subject's
//! recent history and decides whether it is long enough to count as a sustained anomaly.
//!
//! # Invariants
//! - Points are scanned oldest first, whatever order the history source returned them in.
//! - Durations use data timestamps only; the evaluation clock never enters the math.
//! - `percentage_above` is computed from exactly the points of the winning run.
//! - A history point that fails sample validation breaks a run the same way an unworn one does.

use crate::settings::{DetectorConfig, MovementConfig};
use crate::domain::{AnomalyResult, Sample, US_PER_SEC};
use crate::movement::{MovementClassifier, MovementTag};
use crate::severity::classify_severity;
use crate::validation::validate_sample;

#[derive(Debug, Clone, Default)]
pub struct SustainedWindowAnalyzer {
    pub cfg: DetectorConfig,
    pub movement: MovementClassifier,
}

/// One history point after tagging.
#[derive(Debug, Clone, Copy)]
struct Point<'a> {
    sample: &'a Sample,
    movement: MovementTag,
    valid: bool,
}

/// Inclusive index range into the sorted points plus its wall-clock length.
#[derive(Debug, Clone, Copy)]
struct Run {
    start: usize,
    end: usize,
    duration_us: i64,
}

impl SustainedWindowAnalyzer {
    pub fn new(cfg: DetectorConfig, movement: MovementConfig) -> Self {
        Self { cfg, movement: MovementClassifier::new(movement) }
    }

    pub fn analyze(&self, current: &Sample, baseline_hr: f64, history: &[Sample]) -> AnomalyResult {
        if history.len() < self.cfg.min_history_points {
            return AnomalyResult::not_sustained(
                0.0,
                format!(
                    "insufficient history: {} points, need {}",
                    history.len(),
                    self.cfg.min_history_points
                ),
            );
        }
        if !(baseline_hr.is_finite() && baseline_hr > 0.0) {
            return AnomalyResult::not_sustained(0.0, format!("invalid baseline {baseline_hr}"));
        }

        let points = self.prepare(current, baseline_hr, history);
        let threshold = baseline_hr * self.cfg.threshold_ratio;

        let Some(best) = longest_run(&points, |p| {
            p.valid && p.sample.worn && p.sample.heart_rate >= threshold && !p.movement.exercise_like
        }) else {
            return AnomalyResult::not_sustained(
                0.0,
                format!("no valid, worn, non-exercise samples at or above {threshold:.1} BPM"),
            );
        };

        let sustained_seconds = best.duration_us as f64 / US_PER_SEC as f64;
        if best.duration_us < self.cfg.min_sustained_us() {
            return AnomalyResult::not_sustained(
                sustained_seconds,
                format!(
                    "longest elevated run {:.0}s, need {:.0}s",
                    sustained_seconds, self.cfg.min_sustained_secs
                ),
            );
        }

        let run = &points[best.start..=best.end];
        let average_hr = run.iter().map(|p| p.sample.heart_rate).sum::<f64>() / run.len() as f64;
        let percentage_above = (average_hr - baseline_hr) / baseline_hr * 100.0;

        let Some(severity) = classify_severity(percentage_above) else {
            return AnomalyResult::not_sustained(
                sustained_seconds,
                format!("elevation {percentage_above:.1}% below the lowest severity band"),
            );
        };

        log::debug!(
            "sustained run: {} points, {:.0}s, avg {:.1} BPM ({:.1}% over {:.1})",
            run.len(),
            sustained_seconds,
            average_hr,
            percentage_above,
            baseline_hr
        );

        AnomalyResult {
            is_sustained: true,
            sustained_seconds,
            average_hr,
            percentage_above,
            severity: Some(severity),
            reason: format!(
                "heart rate averaged {average_hr:.0} BPM, {percentage_above:.1}% above baseline \
                 {baseline_hr:.0} BPM, for {sustained_seconds:.0}s without exercise-like movement"
            ),
        }
    }

    /// Merge, validate, tag, sort oldest first, and collapse duplicate timestamps.
    fn prepare<'a>(&self, current: &'a Sample, baseline_hr: f64, history: &'a [Sample]) -> Vec<Point<'a>> {
        let mut points: Vec<Point<'a>> = history
            .iter()
            .chain(std::iter::once(current))
            .map(|s| {
                let valid = match validate_sample(s, &self.cfg) {
                    Ok(()) => true,
                    Err(e) => {
                        log::trace!("history point at {} rejected: {e}", s.ts_us);
                        false
                    }
                };
                Point { sample: s, movement: self.movement.classify(s, baseline_hr), valid }
            })
            .collect();
        // full tie-break so equal timestamps resolve the same way for any input order
        points.sort_by(|a, b| {
            a.sample
                .ts_us
                .cmp(&b.sample.ts_us)
                .then(a.sample.heart_rate.total_cmp(&b.sample.heart_rate))
                .then(a.sample.worn.cmp(&b.sample.worn))
                .then(a.movement.intensity.total_cmp(&b.movement.intensity))
        });
        points.dedup_by_key(|p| p.sample.ts_us);
        points
    }
}

/// Longest contiguous run of points satisfying `qualifies`. Ties keep the earlier run.
fn longest_run(points: &[Point<'_>], qualifies: impl Fn(&Point<'_>) -> bool) -> Option<Run> {
    let mut best: Option<Run> = None;
    let mut run_start: Option<usize> = None;
    for (i, p) in points.iter().enumerate() {
        if !qualifies(p) {
            run_start = None;
            continue;
        }
        let start = *run_start.get_or_insert(i);
        let duration_us = p.sample.ts_us - points[start].sample.ts_us;
        if best.map_or(true, |b| duration_us > b.duration_us) {
            best = Some(Run { start, end: i, duration_us });
        }
    }
    best
}
