/// Failure reported by an external collaborator (store, dispatcher).
///
/// Always recoverable from the core's point of view: the next sample re-triggers evaluation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExternalError {
    #[error("{component} unavailable: {message}")]
    Unavailable { component: &'static str, message: String },
    #[error("{component} rejected request: {message}")]
    Rejected { component: &'static str, message: String },
}

impl ExternalError {
    pub fn unavailable(component: &'static str, message: impl ToString) -> Self {
        Self::Unavailable { component, message: message.to_string() }
    }

    pub fn rejected(component: &'static str, message: impl ToString) -> Self {
        Self::Rejected { component, message: message.to_string() }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("baseline lookup failed: {0}")]
    Baseline(#[source] ExternalError),
    #[error("history query failed: {0}")]
    History(#[source] ExternalError),
    #[error("rate limit store failed: {0}")]
    RateLimit(#[source] ExternalError),
    #[error("notification dispatch failed: {0}")]
    Dispatch(#[source] ExternalError),
    #[error("alert store failed: {0}")]
    AlertStore(#[source] ExternalError),
}
