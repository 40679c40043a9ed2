use thiserror::Error;

/// Failure modes shared by both remote clients. The applier keys its retry
/// decisions off `is_transient`.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Credentials are missing, rejected, or past refresh. Never retried.
    #[error("authentication expired: {0}")]
    AuthExpired(String),

    /// The service asked us to back off. `retry_after` is seconds, when the
    /// response carried one.
    #[error("rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    /// Network failure, timeout, or 5xx.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The target permanently cannot represent this event (missing season,
    /// movie on a TV-only service). Never retried; the caller should stop
    /// proposing the event.
    #[error("unsupported by target: {0}")]
    Unsupported(String),

    /// The service answered but not in a shape we understand.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ServiceError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ServiceError::RateLimited { .. } | ServiceError::Unavailable(_)
        )
    }

    /// Collapse a transport error into our taxonomy. Timeouts and connect
    /// failures are transient; anything else is a protocol problem.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            ServiceError::Unavailable(err.to_string())
        } else {
            ServiceError::Protocol(err.to_string())
        }
    }
}

/// Map a non-success HTTP status onto the shared taxonomy.
pub(crate) fn status_error(status: reqwest::StatusCode, retry_after: Option<u64>, context: &str) -> ServiceError {
    match status.as_u16() {
        401 | 403 => ServiceError::AuthExpired(format!("{}: HTTP {}", context, status)),
        429 => ServiceError::RateLimited { retry_after },
        500..=599 => ServiceError::Unavailable(format!("{}: HTTP {}", context, status)),
        _ => ServiceError::Protocol(format!("{}: HTTP {}", context, status)),
    }
}

/// Pull the Retry-After header out of a response, if present and numeric.
pub(crate) fn retry_after_secs(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
}
