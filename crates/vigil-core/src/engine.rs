//! Per-sample orchestration: baseline → history → analysis → rate limit → dispatch → audit.
//!
//! The engine is one-shot per call and holds no mutable state of its own. The only commit point
//! is the rate limiter's atomic swap; nothing is written before it succeeds. A granted slot whose
//! dispatch fails is released again so the next sample can retry.

use std::sync::Arc;

use crate::analyzer::SustainedWindowAnalyzer;
use crate::settings::VigilConfig;
use crate::domain::{
    AlertDecision, AlertRecord, AnomalyResult, Feedback, NotificationPayload, Sample, SessionId, Severity,
    SubjectId,
};
use crate::error::EngineError;
use crate::ports::{AlertStore, BaselineProvider, HistoryStore, NotificationDispatcher};
use crate::rate_limit::{CooldownStatus, RateDecision, RateLimitStore, RateLimiter};
use crate::validation::validate_sample;

/// External collaborators wired into an [`Engine`].
#[derive(Clone)]
pub struct Collaborators {
    pub baselines: Arc<dyn BaselineProvider>,
    pub history: Arc<dyn HistoryStore>,
    pub rate_limits: Arc<dyn RateLimitStore>,
    pub dispatcher: Arc<dyn NotificationDispatcher>,
    pub alerts: Arc<dyn AlertStore>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Input could not be evaluated (invalid sample, no baseline). Not an error.
    Skipped { reason: String },
    NotSustained(AnomalyResult),
    /// Sustained, but the rate limiter said no.
    Suppressed { result: AnomalyResult, decision: RateDecision },
    Notified { result: AnomalyResult, payload: NotificationPayload },
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Skipped { .. } => "skipped",
            Outcome::NotSustained(_) => "not_sustained",
            Outcome::Suppressed { .. } => "suppressed",
            Outcome::Notified { .. } => "notified",
        }
    }
}

pub struct Engine {
    analyzer: SustainedWindowAnalyzer,
    limiter: RateLimiter,
    baselines: Arc<dyn BaselineProvider>,
    history: Arc<dyn HistoryStore>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    alerts: Arc<dyn AlertStore>,
}

impl Engine {
    pub fn new(cfg: VigilConfig, c: Collaborators) -> Self {
        Self {
            analyzer: SustainedWindowAnalyzer::new(cfg.detector, cfg.movement),
            limiter: RateLimiter::new(cfg.rate_limit, c.rate_limits),
            baselines: c.baselines,
            history: c.history,
            dispatcher: c.dispatcher,
            alerts: c.alerts,
        }
    }

    /// Evaluate one incoming sample. `now_us` is the evaluation clock used for cooldowns only.
    pub fn process(
        &self,
        subject: &SubjectId,
        session: &SessionId,
        sample: &Sample,
        now_us: i64,
    ) -> Result<Outcome, EngineError> {
        let detector = &self.analyzer.cfg;
        if let Err(e) = validate_sample(sample, detector) {
            log::debug!("{subject}: skipping sample at {}: {e}", sample.ts_us);
            return Ok(Outcome::Skipped { reason: e.to_string() });
        }

        let baseline_hr = match self.baselines.baseline(subject).map_err(EngineError::Baseline)? {
            Some(b) => b.baseline_hr,
            None => match detector.fallback_baseline_hr {
                Some(fallback) => {
                    log::debug!("{subject}: no baseline, using configured fallback {fallback}");
                    fallback
                }
                None => {
                    log::debug!("{subject}: no baseline, skipping detection");
                    return Ok(Outcome::Skipped { reason: format!("no baseline for {subject}") });
                }
            },
        };

        let history = self
            .history
            .window(subject, session, detector.lookback_secs, sample.ts_us)
            .map_err(EngineError::History)?;
        let result = self.analyzer.analyze(sample, baseline_hr, &history);

        let severity = match result.severity {
            Some(s) if result.is_sustained => s,
            _ => return Ok(Outcome::NotSustained(result)),
        };

        let decision = self
            .limiter
            .try_acquire(subject, severity, now_us)
            .map_err(EngineError::RateLimit)?;

        let previous_us = match decision {
            RateDecision::Granted { previous_us } => previous_us,
            RateDecision::CoolingDown { .. } | RateDecision::LostRace => {
                return Ok(Outcome::Suppressed { result, decision });
            }
        };

        let audit = |decision: AlertDecision| AlertRecord {
            subject: subject.clone(),
            session: session.clone(),
            evaluated_at_us: now_us,
            data_ts_us: sample.ts_us,
            result: result.clone(),
            decision,
        };

        let payload = NotificationPayload::new(severity, sample.heart_rate, baseline_hr, &result);
        if let Err(e) = self.dispatcher.dispatch(subject, &payload) {
            log::warn!("{subject}/{severity}: dispatch failed: {e}");
            if let Err(release_err) = self.limiter.release(subject, severity, previous_us, now_us) {
                log::warn!("{subject}/{severity}: could not release slot: {release_err}");
            }
            if let Err(store_err) = self.alerts.record(&audit(AlertDecision::DispatchFailed {
                error: e.to_string(),
            })) {
                log::warn!("{subject}: could not record failed dispatch: {store_err}");
            }
            return Err(EngineError::Dispatch(e));
        }
        log::info!(
            "{subject}/{severity}: notified ({:.1}% over baseline for {:.0}s)",
            result.percentage_above,
            result.sustained_seconds
        );
        self.alerts
            .record(&audit(AlertDecision::Notified))
            .map_err(EngineError::AlertStore)?;
        Ok(Outcome::Notified { result, payload })
    }

    /// Apply subject feedback. May arrive at any time, not only after a notification.
    pub fn record_feedback(&self, feedback: &Feedback, now_us: i64) -> Result<(), EngineError> {
        self.limiter
            .record_feedback(feedback, now_us)
            .map_err(EngineError::RateLimit)
    }

    /// Cooldown state for every severity bucket of `subject`.
    pub fn cooldowns(&self, subject: &SubjectId, now_us: i64) -> Result<Vec<CooldownStatus>, EngineError> {
        Severity::ALL
            .iter()
            .map(|s| self.limiter.status(subject, *s, now_us))
            .collect::<Result<Vec<_>, _>>()
            .map_err(EngineError::RateLimit)
    }
}
