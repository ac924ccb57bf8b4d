use std::time::Duration;

/// Typed error hierarchy for the progress-stream client.
/// Classifies errors as retryable (reconnect with backoff), degradable
/// (abandon the stream, fall back to polling), or terminal.
#[derive(Clone, Debug, thiserror::Error)]
pub enum StreamError {
    // Retryable on the stream transport
    #[error("transport error: {0}")]
    Transport(String),
    #[error("idle timeout after {0:?} without a message")]
    IdleTimeout(Duration),
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("job not registered yet")]
    JobNotFound,

    // Degrade to polling
    #[error("handshake not completed within {0:?}")]
    EstablishTimeout(Duration),
    #[error("retries exhausted after {attempts} attempts")]
    RetryExhausted { attempts: u32 },

    // Terminal
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("job did not finish within {0:?}")]
    OverallTimeout(Duration),
    #[error("cancelled")]
    Cancelled,
}

impl StreamError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::IdleTimeout(_) | Self::ServerError { .. } | Self::JobNotFound
        )
    }

    /// Terminal for the whole session; neither reconnect nor polling can
    /// recover from these.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest(_) | Self::OverallTimeout(_) | Self::Cancelled
        )
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::IdleTimeout(_) => "idle_timeout",
            Self::ServerError { .. } => "server_error",
            Self::JobNotFound => "job_not_found",
            Self::EstablishTimeout(_) => "establish_timeout",
            Self::RetryExhausted { .. } => "retry_exhausted",
            Self::InvalidRequest(_) => "invalid_request",
            Self::OverallTimeout(_) => "overall_timeout",
            Self::Cancelled => "cancelled",
        }
    }

    /// Classify an HTTP status code into the appropriate error variant.
    /// A 404 means the job has not been registered on the backend yet, not
    /// that it is gone; callers keep retrying/polling in that case.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            404 => Self::JobNotFound,
            400..=499 => Self::InvalidRequest(format!("status {status}: {body}")),
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}
