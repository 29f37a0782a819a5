use std::sync::Arc;

use crate::domain::{
    AlertDecision, Feedback, Sample, SessionId, Severity, SubjectId, UserResponse, US_PER_SEC,
};
use crate::engine::{Collaborators, Engine, Outcome};
use crate::error::EngineError;
use crate::rate_limit::RateDecision;
use crate::settings::VigilConfig;
use crate::testing::{MemoryAlerts, MemoryBaselines, MemoryHistory, MemoryRateLimitStore, RecordingDispatcher};

struct Harness {
    engine: Engine,
    subject: SubjectId,
    session: SessionId,
    history: Arc<MemoryHistory>,
    baselines: Arc<MemoryBaselines>,
    dispatcher: Arc<RecordingDispatcher>,
    alerts: Arc<MemoryAlerts>,
}

fn harness(cfg: VigilConfig) -> Harness {
    let subject = SubjectId::new("u-42");
    let session = SessionId::from_string("session-a");
    let history = Arc::new(MemoryHistory::default());
    let baselines = Arc::new(MemoryBaselines::with(&subject, 70.0));
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let alerts = Arc::new(MemoryAlerts::default());
    let engine = Engine::new(
        cfg,
        Collaborators {
            baselines: baselines.clone(),
            history: history.clone(),
            rate_limits: Arc::new(MemoryRateLimitStore::default()),
            dispatcher: dispatcher.clone(),
            alerts: alerts.clone(),
        },
    );
    Harness { engine, subject, session, history, baselines, dispatcher, alerts }
}

impl Harness {
    /// Ingest one sample per second over `[start_s, end_s]` and evaluate the last one.
    fn feed(&self, start_s: i64, end_s: i64, hr: f64, now_us: i64) -> Result<Outcome, EngineError> {
        let mut last = None;
        for t in start_s..=end_s {
            let s = Sample::heart_rate(t * US_PER_SEC, hr);
            self.history.push(&self.subject, &self.session, s.clone());
            last = Some(s);
        }
        let last = last.expect("non-empty range");
        self.engine.process(&self.subject, &self.session, &last, now_us)
    }
}

#[test]
fn sustained_run_notifies_once_and_is_audited() {
    let h = harness(VigilConfig::default());
    let out = h.feed(0, 130, 98.0, 131 * US_PER_SEC).unwrap();
    match out {
        Outcome::Notified { result, payload } => {
            assert_eq!(result.severity, Some(Severity::Moderate));
            assert_eq!(payload.severity, Severity::Moderate);
            assert_eq!(payload.baseline_hr, 70.0);
            assert!(payload.requires_confirmation);
        }
        other => panic!("expected notification, got {other:?}"),
    }
    assert_eq!(h.dispatcher.sent.lock().unwrap().len(), 1);
    let alerts = h.alerts.records.lock().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].decision, AlertDecision::Notified);
    assert_eq!(alerts[0].data_ts_us, 130 * US_PER_SEC);
}

#[test]
fn follow_up_sample_inside_cooldown_is_suppressed() {
    let h = harness(VigilConfig::default());
    assert_eq!(h.feed(0, 130, 98.0, 131 * US_PER_SEC).unwrap().label(), "notified");
    let out = h.feed(131, 135, 98.0, 136 * US_PER_SEC).unwrap();
    assert!(matches!(
        out,
        Outcome::Suppressed { decision: RateDecision::CoolingDown { .. }, .. }
    ));
    assert_eq!(h.dispatcher.sent.lock().unwrap().len(), 1);
    // suppressed evaluations leave no audit rows
    assert_eq!(h.alerts.records.lock().unwrap().len(), 1);
}

#[test]
fn critical_payload_skips_confirmation() {
    let h = harness(VigilConfig::default());
    match h.feed(0, 125, 130.0, 126 * US_PER_SEC).unwrap() {
        Outcome::Notified { payload, .. } => {
            assert_eq!(payload.severity, Severity::Critical);
            assert!(!payload.requires_confirmation);
        }
        other => panic!("expected notification, got {other:?}"),
    }
}

#[test]
fn missing_baseline_skips_without_error() {
    let h = harness(VigilConfig::default());
    h.baselines.baselines.lock().unwrap().clear();
    let out = h.feed(0, 130, 98.0, 0).unwrap();
    assert!(matches!(out, Outcome::Skipped { .. }));
    assert!(h.dispatcher.sent.lock().unwrap().is_empty());
}

#[test]
fn fallback_baseline_only_when_configured() {
    let mut cfg = VigilConfig::default();
    cfg.detector.fallback_baseline_hr = Some(70.0);
    let h = harness(cfg);
    h.baselines.baselines.lock().unwrap().clear();
    assert_eq!(h.feed(0, 130, 98.0, 0).unwrap().label(), "notified");
}

#[test]
fn invalid_sample_is_skipped() {
    let h = harness(VigilConfig::default());
    let bad = Sample::heart_rate(0, f64::NAN);
    let out = h.engine.process(&h.subject, &h.session, &bad, 0).unwrap();
    assert!(matches!(out, Outcome::Skipped { .. }));
}

#[test]
fn baseline_outage_is_a_recoverable_error() {
    let h = harness(VigilConfig::default());
    *h.baselines.fail.lock().unwrap() = true;
    assert!(matches!(h.feed(0, 10, 98.0, 0), Err(EngineError::Baseline(_))));
}

#[test]
fn dispatch_failure_surfaces_and_is_audited() {
    let h = harness(VigilConfig::default());
    *h.dispatcher.fail.lock().unwrap() = true;
    assert!(matches!(h.feed(0, 130, 98.0, 0), Err(EngineError::Dispatch(_))));
    let alerts = h.alerts.records.lock().unwrap();
    assert_eq!(alerts.len(), 1);
    assert!(matches!(alerts[0].decision, AlertDecision::DispatchFailed { .. }));
}

#[test]
fn failed_dispatch_hands_the_slot_back() {
    let h = harness(VigilConfig::default());
    *h.dispatcher.fail.lock().unwrap() = true;
    assert!(matches!(h.feed(0, 130, 98.0, 131 * US_PER_SEC), Err(EngineError::Dispatch(_))));

    let st = h.engine.cooldowns(&h.subject, 132 * US_PER_SEC).unwrap();
    assert!(st.iter().all(|s| s.last_notification_us.is_none()));

    *h.dispatcher.fail.lock().unwrap() = false;
    // well inside the 20 min moderate cooldown the failed attempt would have started
    let out = h.feed(131, 250, 98.0, 251 * US_PER_SEC).unwrap();
    assert_eq!(out.label(), "notified");
    assert_eq!(h.dispatcher.sent.lock().unwrap().len(), 1);
    let decisions: Vec<_> = h.alerts.records.lock().unwrap().iter().map(|a| a.decision.label()).collect();
    assert_eq!(decisions, vec!["dispatch_failed", "notified"]);
}

#[test]
fn retry_right_after_a_failed_dispatch_is_not_held_by_the_subject_guard() {
    let h = harness(VigilConfig::default());
    *h.dispatcher.fail.lock().unwrap() = true;
    assert!(h.feed(0, 130, 98.0, 131 * US_PER_SEC).is_err());
    *h.dispatcher.fail.lock().unwrap() = false;
    assert_eq!(h.feed(131, 131, 98.0, 132 * US_PER_SEC).unwrap().label(), "notified");
}

#[test]
fn stored_glitches_do_not_inflate_severity() {
    let h = harness(VigilConfig::default());
    // 90 BPM is mild; a stored 400 BPM artifact in the window must not push it to severe
    for t in 0..=250 {
        let hr = if t == 100 { 400.0 } else { 90.0 };
        h.history.push(&h.subject, &h.session, Sample::heart_rate(t * US_PER_SEC, hr));
    }
    let current = Sample::heart_rate(250 * US_PER_SEC, 90.0);
    match h.engine.process(&h.subject, &h.session, &current, 251 * US_PER_SEC).unwrap() {
        Outcome::Notified { result, payload } => {
            assert_eq!(payload.severity, Severity::Mild);
            assert!((result.average_hr - 90.0).abs() < 1e-9);
        }
        other => panic!("expected notification, got {other:?}"),
    }
}

#[test]
fn short_run_is_not_sustained_and_not_audited() {
    let h = harness(VigilConfig::default());
    let out = h.feed(0, 60, 98.0, 0).unwrap();
    assert!(matches!(out, Outcome::NotSustained(ref r) if r.sustained_seconds == 60.0));
    assert!(h.alerts.records.lock().unwrap().is_empty());
}

#[test]
fn denial_feedback_suppresses_until_long_cooldown_elapses() {
    let h = harness(VigilConfig::default());
    let hour = 3600 * US_PER_SEC;
    // mild: 90 BPM is 28.6% over a 70 BPM baseline
    assert_eq!(h.feed(0, 125, 90.0, 0).unwrap().label(), "notified");
    h.engine
        .record_feedback(
            &Feedback { subject: h.subject.clone(), severity: Severity::Mild, response: UserResponse::Denied },
            60 * US_PER_SEC,
        )
        .unwrap();
    // 40 minutes later: past the 30 min base cooldown, inside the 1 h denial cooldown
    let out = h.feed(126, 130, 90.0, 40 * 60 * US_PER_SEC).unwrap();
    assert_eq!(out.label(), "suppressed");
    let out = h.feed(131, 135, 90.0, hour).unwrap();
    assert_eq!(out.label(), "notified");
}

#[test]
fn cooldowns_cover_every_severity() {
    let h = harness(VigilConfig::default());
    let st = h.engine.cooldowns(&h.subject, 0).unwrap();
    assert_eq!(st.len(), 4);
    assert!(st.iter().all(|s| s.remaining_us == 0));
}
