//! Domain types shared by the analyzer, the rate limiter and the storage collaborators.
//!
//! All timestamps are microseconds since the Unix epoch (`*_us`), matching the sample stream.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const US_PER_SEC: i64 = 1_000_000;

/// Wall-clock "time of evaluation", as distinct from any sample timestamp.
pub fn now_us() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(pub String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Fresh random session id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// One physiological reading from the wearable. Immutable once produced by ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub ts_us: i64,
    pub heart_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spo2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_temp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accel: Option<Vec3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gyro: Option<Vec3>,
    #[serde(default = "default_worn")]
    pub worn: bool,
}

fn default_worn() -> bool {
    true
}

impl Sample {
    /// Worn sample with heart rate only (no motion, treated as stationary).
    pub fn heart_rate(ts_us: i64, heart_rate: f64) -> Self {
        Self {
            ts_us,
            heart_rate,
            spo2: None,
            body_temp: None,
            accel: None,
            gyro: None,
            worn: true,
        }
    }

    pub fn with_accel(mut self, accel: Vec3) -> Self {
        self.accel = Some(accel);
        self
    }

    pub fn with_worn(mut self, worn: bool) -> Self {
        self.worn = worn;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub subject: SubjectId,
    pub baseline_hr: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Mild,
    Moderate,
    Severe,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Mild,
        Severity::Moderate,
        Severity::Severe,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Mild => "mild",
            Severity::Moderate => "moderate",
            Severity::Severe => "severe",
            Severity::Critical => "critical",
        }
    }

    /// Critical alerts are definitive; every other level asks the subject to confirm.
    pub fn requires_confirmation(&self) -> bool {
        match self {
            Severity::Critical => false,
            Severity::Mild | Severity::Moderate | Severity::Severe => true,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for Severity {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mild" => Ok(Severity::Mild),
            "moderate" => Ok(Severity::Moderate),
            "severe" => Ok(Severity::Severe),
            "critical" => Ok(Severity::Critical),
            other => Err(ParseEnumError { kind: "severity", value: other.to_string() }),
        }
    }
}

/// Subject feedback to a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserResponse {
    /// "Yes, I am anxious."
    Confirmed,
    /// "No, I am not anxious."
    Denied,
    /// Ignored or deferred.
    Dismissed,
}

impl UserResponse {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserResponse::Confirmed => "confirmed",
            UserResponse::Denied => "denied",
            UserResponse::Dismissed => "dismissed",
        }
    }
}

impl fmt::Display for UserResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserResponse {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "confirmed" => Ok(UserResponse::Confirmed),
            "denied" => Ok(UserResponse::Denied),
            "dismissed" => Ok(UserResponse::Dismissed),
            other => Err(ParseEnumError { kind: "response", value: other.to_string() }),
        }
    }
}

/// Outcome of one analyzer pass. Built fresh per call; persistence is the caller's decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub is_sustained: bool,
    pub sustained_seconds: f64,
    pub average_hr: f64,
    pub percentage_above: f64,
    /// `None` whenever `is_sustained` is false.
    pub severity: Option<Severity>,
    pub reason: String,
}

impl AnomalyResult {
    pub fn not_sustained(sustained_seconds: f64, reason: impl Into<String>) -> Self {
        Self {
            is_sustained: false,
            sustained_seconds,
            average_hr: 0.0,
            percentage_above: 0.0,
            severity: None,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateLimitKey {
    pub subject: SubjectId,
    pub severity: Severity,
}

impl RateLimitKey {
    pub fn new(subject: SubjectId, severity: Severity) -> Self {
        Self { subject, severity }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub ts_us: i64,
    pub response: UserResponse,
}

/// Shared per-(subject, severity) state. Mutated only through atomic store operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRecord {
    pub key: RateLimitKey,
    pub last_notification_us: Option<i64>,
    pub last_response: Option<ResponseRecord>,
}

impl RateLimitRecord {
    pub fn empty(key: RateLimitKey) -> Self {
        Self { key, last_notification_us: None, last_response: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub severity: Severity,
    pub heart_rate: f64,
    pub baseline_hr: f64,
    pub percentage_above: f64,
    pub sustained_seconds: f64,
    pub reason: String,
    pub requires_confirmation: bool,
}

impl NotificationPayload {
    pub fn new(severity: Severity, heart_rate: f64, baseline_hr: f64, result: &AnomalyResult) -> Self {
        Self {
            severity,
            heart_rate,
            baseline_hr,
            percentage_above: result.percentage_above,
            sustained_seconds: result.sustained_seconds,
            reason: result.reason.clone(),
            requires_confirmation: severity.requires_confirmation(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub subject: SubjectId,
    pub severity: Severity,
    pub response: UserResponse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertDecision {
    Notified,
    /// The slot was granted but delivery failed; the slot has been handed back.
    DispatchFailed { error: String },
}

impl AlertDecision {
    pub fn label(&self) -> &'static str {
        match self {
            AlertDecision::Notified => "notified",
            AlertDecision::DispatchFailed { .. } => "dispatch_failed",
        }
    }
}

/// Audit row for a sustained detection that won the rate limiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub subject: SubjectId,
    pub session: SessionId,
    /// Wall clock at evaluation.
    pub evaluated_at_us: i64,
    /// Timestamp of the triggering sample.
    pub data_ts_us: i64,
    pub result: AnomalyResult,
    pub decision: AlertDecision,
}

impl AlertRecord {
    /// Content hash used as an idempotency key by alert stores.
    pub fn digest(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_else(|_| format!("{self:?}").into_bytes());
        hex::encode(blake3::hash(&canonical).as_bytes())
    }
}
