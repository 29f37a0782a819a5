use thiserror::Error;
use vigil_core::ExternalError;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value that no longer parses into a domain type.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("connection lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn into_external(self, component: &'static str) -> ExternalError {
        match self {
            StoreError::Corrupt(_) | StoreError::Serialization(_) => ExternalError::rejected(component, self),
            StoreError::Database(_) | StoreError::Poisoned => ExternalError::unavailable(component, self),
        }
    }
}
