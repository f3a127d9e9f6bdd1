use thiserror::Error;

/// Failure of a single remote operation against either system.
///
/// Every variant carries the operation name (`user.get`, `search_issues`, ...)
/// so that a failure surfacing in the driver still says which call broke.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{operation}: connection failed: {cause}")]
    ConnectionFailed { operation: String, cause: String },

    #[error("{operation}: request timed out")]
    Timeout { operation: String },

    #[error("{operation}: HTTP {status}: {message}")]
    Http {
        operation: String,
        status: u16,
        message: String,
    },

    #[error("{operation}: {message}")]
    Remote { operation: String, message: String },

    #[error("{operation}: unexpected response: {cause}")]
    Parse { operation: String, cause: String },

    #[error("{operation} failed after {attempts} attempt(s): {last_error}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        last_error: Box<ApiError>,
    },
}

impl ApiError {
    pub fn operation(&self) -> &str {
        match self {
            ApiError::ConnectionFailed { operation, .. }
            | ApiError::Timeout { operation }
            | ApiError::Http { operation, .. }
            | ApiError::Remote { operation, .. }
            | ApiError::Parse { operation, .. }
            | ApiError::RetryExhausted { operation, .. } => operation,
        }
    }

    /// Whether a retry could plausibly succeed, given the set of HTTP
    /// statuses the caller treats as transient.
    pub fn is_transient(&self, statuses: &[u16]) -> bool {
        match self {
            ApiError::ConnectionFailed { .. } | ApiError::Timeout { .. } => true,
            ApiError::Http { status, .. } => statuses.contains(status),
            ApiError::Remote { .. } | ApiError::Parse { .. } | ApiError::RetryExhausted { .. } => {
                false
            }
        }
    }

    /// Map a transport-level reqwest failure. The URL is stripped because the
    /// webhook base embeds its secret token.
    pub fn transport(operation: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout {
                operation: operation.into(),
            }
        } else {
            ApiError::ConnectionFailed {
                operation: operation.into(),
                cause: err.without_url().to_string(),
            }
        }
    }

    pub fn parse(operation: &str, cause: impl Into<String>) -> Self {
        ApiError::Parse {
            operation: operation.into(),
            cause: cause.into(),
        }
    }
}
