use thiserror::Error;

/// Error type for the rollup pipeline and its surrounding services.
#[derive(Error, Debug)]
pub enum TsError {
    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Invalid time range: start={start}, end={end}")]
    InvalidTimeRange { start: String, end: String },

    /// A row arrived whose timestamp does not advance past the previous one.
    #[error("Unordered input: {current} does not follow {previous}")]
    UnorderedInput { previous: String, current: String },

    #[error("Decode Error: {0}")]
    Decode(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage Error: {0}")]
    Storage(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("Metrics recorder: {0}")]
    Metrics(String),

    #[error("Sample processor service has been stopped")]
    ServiceStopped,
}

// Implement conversion from lock poison errors for convenience
impl<T> From<std::sync::PoisonError<T>> for TsError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        TsError::LockError(format!("Mutex/RwLock poisoned: {}", err))
    }
}

impl From<bincode::Error> for TsError {
    fn from(err: bincode::Error) -> Self {
        TsError::Serialization(err.to_string())
    }
}

impl TsError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        TsError::Config(msg.into())
    }
}
