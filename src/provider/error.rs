//! Typed failures from the backend services.

use thiserror::Error;

/// Error returned by a backend client call
#[derive(Debug, Error)]
pub enum ApiError {
    /// The service answered with a non-success status
    #[error("{service} API error: {message} (code: {code}, status: {status})")]
    Status {
        service: &'static str,
        code: u16,
        status: String,
        message: String,
    },

    /// The request never produced a response
    #[error("{service} request failed: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The response could not be decoded
    #[error("{service} returned an invalid response: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },

    /// The caller's context was cancelled before the call completed
    #[error("{service} {operation} cancelled")]
    Cancelled {
        service: &'static str,
        operation: &'static str,
    },
}

/// Canonical status string for an HTTP code when the body omits one
#[must_use]
pub fn canonical_status(code: u16) -> &'static str {
    match code {
        400 => "INVALID_ARGUMENT",
        401 => "UNAUTHENTICATED",
        403 => "PERMISSION_DENIED",
        404 => "NOT_FOUND",
        409 => "ABORTED",
        412 => "FAILED_PRECONDITION",
        429 => "RESOURCE_EXHAUSTED",
        501 => "UNIMPLEMENTED",
        503 => "UNAVAILABLE",
        504 => "DEADLINE_EXCEEDED",
        500..=599 => "INTERNAL",
        _ => "UNKNOWN",
    }
}

impl ApiError {
    /// Build a status error
    pub fn status(
        service: &'static str,
        code: u16,
        status: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ApiError::Status {
            service,
            code,
            status: status.into(),
            message: message.into(),
        }
    }

    /// HTTP status code, when the service answered
    #[must_use]
    pub fn code(&self) -> Option<u16> {
        match self {
            ApiError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    fn status_str(&self) -> Option<&str> {
        match self {
            ApiError::Status { status, .. } => Some(status.as_str()),
            _ => None,
        }
    }

    /// 404 / `NOT_FOUND`
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.code() == Some(404) || self.status_str() == Some("NOT_FOUND")
    }

    /// 412, the storage precondition signal
    #[must_use]
    pub fn is_precondition_failed(&self) -> bool {
        self.code() == Some(412)
    }

    /// 409 with `ALREADY_EXISTS`
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        self.status_str() == Some("ALREADY_EXISTS")
    }

    /// Optimistic-lock conflict (409 other than `ALREADY_EXISTS`, or `ABORTED`)
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        (self.code() == Some(409) && !self.is_already_exists())
            || self.status_str() == Some("ABORTED")
    }

    /// 400 / `INVALID_ARGUMENT`
    #[must_use]
    pub fn is_invalid_argument(&self) -> bool {
        self.code() == Some(400) || self.status_str() == Some("INVALID_ARGUMENT")
    }

    /// Any 4xx response
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.code().is_some_and(|c| (400..500).contains(&c))
    }

    /// Transient failure worth another attempt: conflicts, 412 while a prior
    /// policy write propagates, 5xx and transport errors
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Status { code, .. } => {
                self.is_conflict() || *code == 412 || *code >= 500
            }
            ApiError::Transport { .. } => true,
            ApiError::Decode { .. } | ApiError::Cancelled { .. } => false,
        }
    }
}
