use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReplayError>;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job already finished: {0}")]
    AlreadyFinished(String),

    #[error("Job is not running: {0}")]
    NotRunning(String),

    #[error("Job is not paused: {0}")]
    NotPaused(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ReplayError {
    /// Stable code reported next to the message on control responses.
    pub fn code(&self) -> &'static str {
        match self {
            ReplayError::Validation(_) => "VALIDATION",
            ReplayError::JobNotFound(_) => "JOB_NOT_FOUND",
            ReplayError::AlreadyFinished(_) => "ALREADY_FINISHED",
            ReplayError::NotRunning(_) => "NOT_RUNNING",
            ReplayError::NotPaused(_) => "NOT_PAUSED",
            ReplayError::Store(_) | ReplayError::Io(_) | ReplayError::Json(_) => "STORE",
            ReplayError::Http(_) | ReplayError::Toml(_) => "INTERNAL",
        }
    }
}
