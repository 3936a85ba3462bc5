use thiserror::Error;

pub type Result<T> = std::result::Result<T, RealtimeError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RealtimeError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("refresh failed for {resource_id}: {message}")]
    RefreshFailure { resource_id: String, message: String },

    #[error("optimistic write {local_id} on {resource_id} failed: {reason}")]
    OptimisticWriteFailure {
        resource_id: String,
        local_id: String,
        reason: String,
    },

    #[error("failed to open channel {key}: {message}")]
    ChannelOpen { key: String, message: String },

    #[error("registry disposed")]
    Disposed,

    #[error("no tokio runtime available to drive the channel")]
    NoRuntime,
}

impl RealtimeError {
    /// Stable snake_case code for wire error responses.
    pub fn code(&self) -> &'static str {
        match self {
            RealtimeError::InvalidArgument(_) => "invalid_argument",
            RealtimeError::RefreshFailure { .. } => "refresh_failed",
            RealtimeError::OptimisticWriteFailure { .. } => "optimistic_write_failed",
            RealtimeError::ChannelOpen { .. } => "channel_open_failed",
            RealtimeError::Disposed => "disposed",
            RealtimeError::NoRuntime => "no_runtime",
        }
    }
}
