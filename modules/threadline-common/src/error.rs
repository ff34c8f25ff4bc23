use thiserror::Error;

#[derive(Error, Debug)]
pub enum ThreadlineError {
    /// Credentials rejected upstream. Never retried; surfaced to the operator.
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Social API error: {0}")]
    Client(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl ThreadlineError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ThreadlineError::Auth(_))
    }
}

/// Errors from the key-value cache and memory store collaborators.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
