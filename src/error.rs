use thiserror::Error;

/// Per-record validation failures. The caller skips the record and keeps
/// reading the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("Inf values found")]
    InfValues,
    #[error("NaN values found")]
    NaNValues,
    #[error("zero timestamp found")]
    ZeroTimestamp,
}

#[derive(Debug, Error)]
pub enum PromError {
    /// Invalid option combination, raised before any I/O.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("upstream query failed: {0}")]
    UpstreamQuery(String),

    #[error("upstream returned warnings: {}", .0.join("; "))]
    UpstreamWarning(Vec<String>),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error("failed to decode {what}: {message}")]
    Decode { what: String, message: String },

    #[error("failed to push metrics: {0}")]
    PushTransport(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PromError {
    pub fn config(message: impl Into<String>) -> Self {
        PromError::Config(message.into())
    }

    pub fn decode(what: impl Into<String>, message: impl ToString) -> Self {
        PromError::Decode {
            what: what.into(),
            message: message.to_string(),
        }
    }

    /// True for the record-level failures that only skip the offending record.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PromError::Record(_))
    }
}

pub type PromResult<T> = std::result::Result<T, PromError>;
