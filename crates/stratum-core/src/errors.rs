use std::time::Duration;

/// How the caller should treat a failed gateway call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// The request itself is wrong or unauthorized; retrying cannot help.
    Fatal,
    /// Transient provider or network trouble; retry with capped backoff.
    Retryable,
    /// Decided on our side of the wire (deadline, cancellation); neither
    /// retried nor escalated as a provider fault.
    Operational,
}

/// Failures of a chat-completion call, carrying enough detail for the
/// retry layer and the HTTP error envelope to act without string matching.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GatewayError {
    /// Credentials rejected (HTTP 401/403).
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The provider refused the request body (HTTP 400).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A well-formed response with no choices in it.
    #[error("empty response from provider")]
    EmptyResponse,

    /// HTTP 429, with the server's pacing hint when one was sent.
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// Provider-side 5xx.
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },

    /// The request never completed at the transport level.
    #[error("network error: {0}")]
    NetworkError(String),

    /// An established stream died before its done sentinel.
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    /// Our per-request deadline fired.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The caller abandoned the request.
    #[error("cancelled")]
    Cancelled,
}

impl GatewayError {
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::AuthenticationFailed(_) | Self::InvalidRequest(_) | Self::EmptyResponse => {
                Disposition::Fatal
            }
            Self::RateLimited { .. }
            | Self::ServerError { .. }
            | Self::NetworkError(_)
            | Self::StreamInterrupted(_) => Disposition::Retryable,
            Self::Timeout(_) | Self::Cancelled => Disposition::Operational,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.disposition() == Disposition::Retryable
    }

    pub fn is_fatal(&self) -> bool {
        self.disposition() == Disposition::Fatal
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// The server's pacing hint, present only on rate limits that sent one.
    pub fn suggested_delay(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Stable snake_case label attached to log lines and metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::EmptyResponse => "empty_response",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::NetworkError(_) => "network_error",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    /// Map a provider HTTP status (plus any Retry-After hint) onto the
    /// taxonomy. Statuses outside the known set are treated as a request
    /// the provider could not accept.
    pub fn from_status(status: u16, body: String, retry_after: Option<Duration>) -> Self {
        match status {
            400 => Self::InvalidRequest(body),
            401 | 403 => Self::AuthenticationFailed(body),
            429 => Self::RateLimited { retry_after },
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}
