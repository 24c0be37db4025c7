use thiserror::Error;

/// Why a single fetch attempt did not produce a complete file.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),

    #[error("content validation failed: {0}")]
    ContentValidation(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("download cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether another attempt at the same item may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Network(_)
                | FetchError::Timeout
                | FetchError::HttpStatus(_)
                | FetchError::ContentValidation(_)
        )
    }

    /// Whether the next attempt must go out over a different connection.
    ///
    /// Status errors and block pages usually mean the origin has flagged the
    /// current exit address, so retrying through it would repeat the failure.
    pub fn should_rotate_proxy(&self) -> bool {
        matches!(
            self,
            FetchError::HttpStatus(_) | FetchError::ContentValidation(_)
        )
    }

    /// Short label used in logs and summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Network(_) => "network",
            FetchError::Timeout => "timeout",
            FetchError::HttpStatus(_) => "http-status",
            FetchError::ContentValidation(_) => "content-validation",
            FetchError::Filesystem(_) => "filesystem",
            FetchError::Cancelled => "cancelled",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = err.status() {
            FetchError::HttpStatus(status.as_u16())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        FetchError::Filesystem(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(FetchError::Network("reset".into()).is_retryable());
        assert!(FetchError::Timeout.is_retryable());
        assert!(FetchError::HttpStatus(503).is_retryable());
        assert!(FetchError::ContentValidation("html".into()).is_retryable());
        assert!(!FetchError::Filesystem("denied".into()).is_retryable());
        assert!(!FetchError::Cancelled.is_retryable());
    }

    #[test]
    fn test_proxy_rotation_classification() {
        assert!(FetchError::HttpStatus(403).should_rotate_proxy());
        assert!(FetchError::ContentValidation("too small".into()).should_rotate_proxy());
        assert!(!FetchError::Timeout.should_rotate_proxy());
        assert!(!FetchError::Network("refused".into()).should_rotate_proxy());
    }

    #[test]
    fn test_io_error_maps_to_filesystem() {
        let err: FetchError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert_eq!(err.kind(), "filesystem");
    }
}
