//! Collaborators the engine talks to. Timeouts and retries belong to the implementations.

use crate::domain::{AlertRecord, Baseline, NotificationPayload, Sample, SessionId, SubjectId};
use crate::error::ExternalError;

pub trait BaselineProvider: Send + Sync {
    /// `Ok(None)` when the subject has no active baseline.
    fn baseline(&self, subject: &SubjectId) -> Result<Option<Baseline>, ExternalError>;
}

pub trait HistoryStore: Send + Sync {
    /// Samples with `anchor_us - lookback_secs <= ts_us <= anchor_us`, in any order.
    fn window(
        &self,
        subject: &SubjectId,
        session: &SessionId,
        lookback_secs: u64,
        anchor_us: i64,
    ) -> Result<Vec<Sample>, ExternalError>;
}

pub trait NotificationDispatcher: Send + Sync {
    fn dispatch(&self, subject: &SubjectId, payload: &NotificationPayload) -> Result<(), ExternalError>;
}

pub trait AlertStore: Send + Sync {
    fn record(&self, alert: &AlertRecord) -> Result<(), ExternalError>;
}
