use std::io::Write;

use serde_json::json;
use vigil_core::{ExternalError, NotificationDispatcher, NotificationPayload, SubjectId};

/// Writes each notification as one JSON line on stdout for a downstream push gateway.
pub struct StdoutDispatcher;

impl NotificationDispatcher for StdoutDispatcher {
    fn dispatch(&self, subject: &SubjectId, payload: &NotificationPayload) -> Result<(), ExternalError> {
        let line = json!({ "subject": subject, "notification": payload });
        let mut out = std::io::stdout().lock();
        writeln!(out, "{line}").map_err(|e| ExternalError::unavailable("stdout", e))
    }
}
