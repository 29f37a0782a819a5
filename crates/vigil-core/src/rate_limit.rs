//! Confirmation-aware rate limiting.
//!
//! Two layers guard every notification:
//! - an adaptive per-severity cooldown chosen from the subject's latest feedback, and
//! - a subject-wide minimum interval checked inside the same atomic swap.
//!
//! The limiter never writes state with a plain read-then-write. It reads a snapshot, decides,
//! and commits through [`RateLimitStore::compare_and_swap`] conditioned on that snapshot; a
//! failed swap means another caller got there first and is reported as [`RateDecision::LostRace`].
//! A granted slot whose notification could not be delivered is handed back with
//! [`RateLimiter::release`], again conditioned on nobody having moved the state since.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::settings::{CooldownPolicy, RateLimitConfig};
use crate::domain::{
    Feedback, RateLimitKey, RateLimitRecord, ResponseRecord, Severity, SubjectId, UserResponse,
    US_PER_SEC,
};
use crate::error::ExternalError;

/// What the swap expects to find, plus the subject-wide guard it must also satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapCondition {
    pub expected_last_notification_us: Option<i64>,
    pub expected_last_response_us: Option<i64>,
    /// The subject's most recent notification of any severity must be at least this old.
    pub min_interval_us: i64,
}

/// Shared rate-limit state. Implementations must make every mutation a single atomic
/// read-modify-write visible to all execution contexts.
pub trait RateLimitStore: Send + Sync {
    fn get(&self, key: &RateLimitKey) -> Result<Option<RateLimitRecord>, ExternalError>;

    /// Set `last_notification_us` and the subject guard to `new_last_notification_us` iff the
    /// record still matches `expected` and the guard is older than `expected.min_interval_us`.
    /// Returns whether the swap committed.
    fn compare_and_swap(
        &self,
        key: &RateLimitKey,
        expected: &SwapCondition,
        new_last_notification_us: i64,
    ) -> Result<bool, ExternalError>;

    /// Undo a committed swap whose notification was never delivered: put the bucket back to
    /// `previous_last_notification_us` and the subject guard back to its prior value, each only
    /// while it still holds `granted_us`. Both happen atomically. Returns whether the bucket
    /// was restored.
    fn release(
        &self,
        key: &RateLimitKey,
        previous_last_notification_us: Option<i64>,
        granted_us: i64,
    ) -> Result<bool, ExternalError>;

    /// Replace `last_response` unless the stored response is newer.
    fn record_response(&self, key: &RateLimitKey, response: ResponseRecord) -> Result<(), ExternalError>;
}

/// Why a particular cooldown was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownBasis {
    NoFeedback,
    StaleFeedback,
    Confirmed,
    Denied,
    Dismissed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownSelection {
    pub cooldown_us: i64,
    pub basis: CooldownBasis,
}

/// Pick the cooldown for one severity bucket given the latest feedback.
///
/// A denial ("not anxious") maps to the long `confirmed_cooldown`, a confirmation keeps the base
/// cooldown, a dismissal sits in between. Feedback older than `max_cooldown_age` is ignored.
pub fn select_cooldown(
    policy: &CooldownPolicy,
    last_response: Option<&ResponseRecord>,
    now_us: i64,
) -> CooldownSelection {
    let secs = |s: u64| s as i64 * US_PER_SEC;
    let base = CooldownSelection { cooldown_us: secs(policy.base_cooldown_secs), basis: CooldownBasis::NoFeedback };
    let Some(resp) = last_response else {
        return base;
    };
    if now_us - resp.ts_us > secs(policy.max_cooldown_age_secs) {
        return CooldownSelection { basis: CooldownBasis::StaleFeedback, ..base };
    }
    match resp.response {
        UserResponse::Confirmed => CooldownSelection { basis: CooldownBasis::Confirmed, ..base },
        UserResponse::Denied => CooldownSelection {
            cooldown_us: secs(policy.confirmed_cooldown_secs),
            basis: CooldownBasis::Denied,
        },
        UserResponse::Dismissed => CooldownSelection {
            cooldown_us: secs(policy.dismissed_cooldown_secs),
            basis: CooldownBasis::Dismissed,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// This caller won the right to notify; the notification instant is already committed.
    /// `previous_us` is what the bucket held before, for [`RateLimiter::release`].
    Granted { previous_us: Option<i64> },
    CoolingDown { remaining_us: i64, basis: CooldownBasis },
    /// The atomic swap failed. Treated exactly like being rate limited.
    LostRace,
}

impl RateDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, RateDecision::Granted { .. })
    }
}

/// Read-only view of a bucket's cooldown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownStatus {
    pub severity: Severity,
    pub cooldown_us: i64,
    pub basis: CooldownBasis,
    pub last_notification_us: Option<i64>,
    pub last_response: Option<ResponseRecord>,
    /// Zero when a notification would be permitted now.
    pub remaining_us: i64,
}

pub struct RateLimiter {
    pub cfg: RateLimitConfig,
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimitConfig, store: Arc<dyn RateLimitStore>) -> Self {
        Self { cfg, store }
    }

    fn snapshot(&self, key: &RateLimitKey) -> Result<RateLimitRecord, ExternalError> {
        Ok(self.store.get(key)?.unwrap_or_else(|| RateLimitRecord::empty(key.clone())))
    }

    /// Decide whether `severity` may notify `subject` at `now_us`, committing on success.
    pub fn try_acquire(
        &self,
        subject: &SubjectId,
        severity: Severity,
        now_us: i64,
    ) -> Result<RateDecision, ExternalError> {
        let key = RateLimitKey::new(subject.clone(), severity);
        let record = self.snapshot(&key)?;
        let selection = select_cooldown(self.cfg.policy(severity), record.last_response.as_ref(), now_us);

        if let Some(last) = record.last_notification_us {
            let elapsed = now_us - last;
            if elapsed < selection.cooldown_us {
                log::debug!(
                    "{subject}/{severity}: cooling down ({:?}), {}s left",
                    selection.basis,
                    (selection.cooldown_us - elapsed) / US_PER_SEC
                );
                return Ok(RateDecision::CoolingDown {
                    remaining_us: selection.cooldown_us - elapsed,
                    basis: selection.basis,
                });
            }
        }

        let expected = SwapCondition {
            expected_last_notification_us: record.last_notification_us,
            expected_last_response_us: record.last_response.map(|r| r.ts_us),
            min_interval_us: self.cfg.min_interval_us(),
        };
        if self.store.compare_and_swap(&key, &expected, now_us)? {
            log::info!("{subject}/{severity}: notification slot acquired");
            Ok(RateDecision::Granted { previous_us: record.last_notification_us })
        } else {
            log::info!("{subject}/{severity}: swap rejected, another notification won");
            Ok(RateDecision::LostRace)
        }
    }

    /// Hand back a slot granted at `granted_us` that did not result in a notification.
    pub fn release(
        &self,
        subject: &SubjectId,
        severity: Severity,
        previous_us: Option<i64>,
        granted_us: i64,
    ) -> Result<bool, ExternalError> {
        let key = RateLimitKey::new(subject.clone(), severity);
        let restored = self.store.release(&key, previous_us, granted_us)?;
        if restored {
            log::info!("{subject}/{severity}: notification slot released");
        } else {
            log::debug!("{subject}/{severity}: slot already taken over, nothing to release");
        }
        Ok(restored)
    }

    pub fn record_feedback(&self, feedback: &Feedback, now_us: i64) -> Result<(), ExternalError> {
        let key = RateLimitKey::new(feedback.subject.clone(), feedback.severity);
        log::info!("{}/{}: feedback {}", feedback.subject, feedback.severity, feedback.response);
        self.store
            .record_response(&key, ResponseRecord { ts_us: now_us, response: feedback.response })
    }

    pub fn status(
        &self,
        subject: &SubjectId,
        severity: Severity,
        now_us: i64,
    ) -> Result<CooldownStatus, ExternalError> {
        let record = self.snapshot(&RateLimitKey::new(subject.clone(), severity))?;
        let selection = select_cooldown(self.cfg.policy(severity), record.last_response.as_ref(), now_us);
        let remaining_us = record
            .last_notification_us
            .map(|last| (selection.cooldown_us - (now_us - last)).max(0))
            .unwrap_or(0);
        Ok(CooldownStatus {
            severity,
            cooldown_us: selection.cooldown_us,
            basis: selection.basis,
            last_notification_us: record.last_notification_us,
            last_response: record.last_response,
            remaining_us,
        })
    }
}
