use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid config: {0}")]
    Config(String),

    #[error("unknown timezone '{0}'")]
    InvalidTimezone(String),

    #[error("invalid document {id}: {reason}")]
    InvalidDocument { id: String, reason: String },

    #[error("schedule db error: {0}")]
    ScheduleDb(String),

    /// The feed could not be reached. The next poll may succeed.
    #[error("feed error: {0}")]
    Feed(String),

    #[error("malformed feed payload: {0}")]
    MalformedFeed(String),

    #[error("worker failed: {0}")]
    WorkerFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    /// Whether polling again later can clear the error.
    pub fn is_transient(&self) -> bool {
        matches!(self, BridgeError::Feed(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
