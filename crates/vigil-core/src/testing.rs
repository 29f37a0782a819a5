//! Single-process collaborators for unit tests. Production uses `vigil-store`.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::domain::{
    AlertRecord, Baseline, NotificationPayload, RateLimitKey, RateLimitRecord, ResponseRecord, Sample,
    SessionId, SubjectId, Vec3, US_PER_SEC,
};
use crate::error::ExternalError;
use crate::ports::{AlertStore, BaselineProvider, HistoryStore, NotificationDispatcher};
use crate::rate_limit::{RateLimitStore, SwapCondition};
use crate::settings::MovementConfig;

/// Acceleration vector (pointing along z) that produces the given intensity under `cfg`.
pub fn accel_for_intensity(cfg: &MovementConfig, intensity: f64) -> Vec3 {
    Vec3::new(0.0, 0.0, cfg.gravity + intensity / cfg.scale)
}

#[derive(Default)]
struct RateState {
    records: HashMap<RateLimitKey, RateLimitRecord>,
    /// Latest notification of any severity, and the value it replaced.
    guards: HashMap<SubjectId, (i64, Option<i64>)>,
}

/// The whole swap runs under one lock, which is the atomicity the trait asks for.
#[derive(Default)]
pub struct MemoryRateLimitStore {
    state: Mutex<RateState>,
}

impl RateLimitStore for MemoryRateLimitStore {
    fn get(&self, key: &RateLimitKey) -> Result<Option<RateLimitRecord>, ExternalError> {
        Ok(self.state.lock().unwrap().records.get(key).cloned())
    }

    fn compare_and_swap(
        &self,
        key: &RateLimitKey,
        expected: &SwapCondition,
        new_last_notification_us: i64,
    ) -> Result<bool, ExternalError> {
        let mut st = self.state.lock().unwrap();
        let current = st.records.get(key).cloned().unwrap_or_else(|| RateLimitRecord::empty(key.clone()));
        if current.last_notification_us != expected.expected_last_notification_us
            || current.last_response.map(|r| r.ts_us) != expected.expected_last_response_us
        {
            return Ok(false);
        }
        let previous_guard = st.guards.get(&key.subject).map(|(g, _)| *g);
        if let Some(guard) = previous_guard {
            if new_last_notification_us - guard < expected.min_interval_us {
                return Ok(false);
            }
        }
        st.guards.insert(key.subject.clone(), (new_last_notification_us, previous_guard));
        st.records.insert(
            key.clone(),
            RateLimitRecord { last_notification_us: Some(new_last_notification_us), ..current },
        );
        Ok(true)
    }

    fn release(
        &self,
        key: &RateLimitKey,
        previous_last_notification_us: Option<i64>,
        granted_us: i64,
    ) -> Result<bool, ExternalError> {
        let mut st = self.state.lock().unwrap();
        if let Some((g, prev)) = st.guards.get(&key.subject).copied() {
            if g == granted_us {
                match prev {
                    Some(p) => st.guards.insert(key.subject.clone(), (p, None)),
                    None => st.guards.remove(&key.subject),
                };
            }
        }
        match st.records.get_mut(key) {
            Some(rec) if rec.last_notification_us == Some(granted_us) => {
                rec.last_notification_us = previous_last_notification_us;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn record_response(&self, key: &RateLimitKey, response: ResponseRecord) -> Result<(), ExternalError> {
        let mut st = self.state.lock().unwrap();
        let rec = st.records.entry(key.clone()).or_insert_with(|| RateLimitRecord::empty(key.clone()));
        if rec.last_response.map_or(true, |r| r.ts_us <= response.ts_us) {
            rec.last_response = Some(response);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryBaselines {
    pub baselines: Mutex<HashMap<SubjectId, f64>>,
    pub fail: Mutex<bool>,
}

impl MemoryBaselines {
    pub fn with(subject: &SubjectId, bpm: f64) -> Self {
        let b = Self::default();
        b.baselines.lock().unwrap().insert(subject.clone(), bpm);
        b
    }
}

impl BaselineProvider for MemoryBaselines {
    fn baseline(&self, subject: &SubjectId) -> Result<Option<Baseline>, ExternalError> {
        if *self.fail.lock().unwrap() {
            return Err(ExternalError::unavailable("baselines", "offline"));
        }
        Ok(self
            .baselines
            .lock()
            .unwrap()
            .get(subject)
            .map(|bpm| Baseline { subject: subject.clone(), baseline_hr: *bpm }))
    }
}

/// Returns stored samples newest first to exercise the analyzer's sorting.
#[derive(Default)]
pub struct MemoryHistory {
    pub samples: Mutex<Vec<(SubjectId, SessionId, Sample)>>,
}

impl MemoryHistory {
    pub fn push(&self, subject: &SubjectId, session: &SessionId, sample: Sample) {
        self.samples.lock().unwrap().push((subject.clone(), session.clone(), sample));
    }
}

impl HistoryStore for MemoryHistory {
    fn window(
        &self,
        subject: &SubjectId,
        session: &SessionId,
        lookback_secs: u64,
        anchor_us: i64,
    ) -> Result<Vec<Sample>, ExternalError> {
        let from = anchor_us - lookback_secs as i64 * US_PER_SEC;
        let mut out: Vec<Sample> = self
            .samples
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, s, x)| u == subject && s == session && x.ts_us >= from && x.ts_us <= anchor_us)
            .map(|(_, _, x)| x.clone())
            .collect();
        out.sort_by(|a, b| b.ts_us.cmp(&a.ts_us));
        Ok(out)
    }
}

#[derive(Default)]
pub struct RecordingDispatcher {
    pub sent: Mutex<Vec<(SubjectId, NotificationPayload)>>,
    pub fail: Mutex<bool>,
}

impl NotificationDispatcher for RecordingDispatcher {
    fn dispatch(&self, subject: &SubjectId, payload: &NotificationPayload) -> Result<(), ExternalError> {
        if *self.fail.lock().unwrap() {
            return Err(ExternalError::unavailable("dispatcher", "push gateway timeout"));
        }
        self.sent.lock().unwrap().push((subject.clone(), payload.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryAlerts {
    pub records: Mutex<Vec<AlertRecord>>,
}

impl AlertStore for MemoryAlerts {
    fn record(&self, alert: &AlertRecord) -> Result<(), ExternalError> {
        self.records.lock().unwrap().push(alert.clone());
        Ok(())
    }
}
