//! # Errors
//!
//! Error taxonomy for every secret operation.
//!
//! Each variant maps onto exactly one [`ErrorKind`], and [`Error::is_misuse`]
//! splits caller mistakes (bad references, missing fields) from failures of
//! the upstream services so that tooling can pick distinct exit codes.

use crate::provider::ApiError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used across the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Which access policy a propagation failure refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyTarget {
    /// Cloud Storage object policy
    Storage,
    /// Cloud KMS crypto key policy
    Key,
    /// Secret Manager secret policy
    Secret,
}

impl fmt::Display for PolicyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyTarget::Storage => write!(f, "storage"),
            PolicyTarget::Key => write!(f, "kms key"),
            PolicyTarget::Secret => write!(f, "secret"),
        }
    }
}

/// Errors returned by secret operations
#[derive(Debug, Error)]
pub enum Error {
    /// Create collided with an existing secret
    #[error("secret {parent}/{name} already exists")]
    AlreadyExists { parent: String, name: String },

    /// Secret, version or its container is absent
    #[error("secret {parent}/{name} does not exist")]
    NotFound { parent: String, name: String },

    /// Compare-and-swap precondition failed
    #[error("secret {parent}/{name} modified between read and write")]
    ModifiedConcurrently { parent: String, name: String },

    /// Stored envelope could not be parsed
    #[error("invalid ciphertext: {0}")]
    MalformedCiphertext(String),

    /// Stored secret is missing required metadata
    #[error("invalid secret {parent}/{name}: {reason}")]
    InvalidSecret {
        parent: String,
        name: String,
        reason: String,
    },

    /// AEAD or KMS authentication failed
    #[error("failed to decrypt: {0}")]
    DecryptionFailed(String),

    /// Reference string violates the grammar
    #[error("invalid reference {reference:?}: {reason}")]
    InvalidReference { reference: String, reason: String },

    /// Grant/Revoke gave up after retrying
    #[error("failed to update {target} policy on {resource} after {attempts} attempts: {source}")]
    PolicyPropagationFailed {
        target: PolicyTarget,
        resource: String,
        attempts: u32,
        #[source]
        source: ApiError,
    },

    /// Required request field was not supplied
    #[error("missing {0}")]
    MissingField(&'static str),

    /// Request is structurally invalid
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Upstream API failure that is not part of the taxonomy above
    #[error("failed to {operation} {location}: {source}")]
    Api {
        operation: &'static str,
        location: String,
        #[source]
        source: ApiError,
    },

    /// Local filesystem failure while materialising a secret
    #[error("failed to write secret to {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Context was cancelled or its deadline elapsed
    #[error("operation cancelled")]
    Cancelled,
}

/// Discriminant of [`Error`] for mechanical matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AlreadyExists,
    NotFound,
    ModifiedConcurrently,
    MalformedCiphertext,
    InvalidSecret,
    DecryptionFailed,
    InvalidReference,
    PolicyPropagationFailed,
    MissingField,
    InvalidRequest,
    Api,
    Io,
    Cancelled,
}

impl ErrorKind {
    /// Snake-case label, used for metrics and structured logs
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ModifiedConcurrently => "modified_concurrently",
            ErrorKind::MalformedCiphertext => "malformed_ciphertext",
            ErrorKind::InvalidSecret => "invalid_secret",
            ErrorKind::DecryptionFailed => "decryption_failed",
            ErrorKind::InvalidReference => "invalid_reference",
            ErrorKind::PolicyPropagationFailed => "policy_propagation_failed",
            ErrorKind::MissingField => "missing_field",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Api => "api",
            ErrorKind::Io => "io",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl Error {
    /// Kind of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::ModifiedConcurrently { .. } => ErrorKind::ModifiedConcurrently,
            Error::MalformedCiphertext(_) => ErrorKind::MalformedCiphertext,
            Error::InvalidSecret { .. } => ErrorKind::InvalidSecret,
            Error::DecryptionFailed(_) => ErrorKind::DecryptionFailed,
            Error::InvalidReference { .. } => ErrorKind::InvalidReference,
            Error::PolicyPropagationFailed { .. } => ErrorKind::PolicyPropagationFailed,
            Error::MissingField(_) => ErrorKind::MissingField,
            Error::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Error::Api { .. } => ErrorKind::Api,
            Error::Io { .. } => ErrorKind::Io,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// True when the caller supplied bad input rather than the backend failing
    #[must_use]
    pub fn is_misuse(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidReference | ErrorKind::MissingField | ErrorKind::InvalidRequest
        )
    }

    /// True for the absent-secret case
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub(crate) fn not_found(parent: &str, name: &str) -> Self {
        Error::NotFound {
            parent: parent.to_string(),
            name: name.to_string(),
        }
    }

    pub(crate) fn already_exists(parent: &str, name: &str) -> Self {
        Error::AlreadyExists {
            parent: parent.to_string(),
            name: name.to_string(),
        }
    }

    pub(crate) fn modified(parent: &str, name: &str) -> Self {
        Error::ModifiedConcurrently {
            parent: parent.to_string(),
            name: name.to_string(),
        }
    }

    pub(crate) fn invalid_reference(reference: &str, reason: impl Into<String>) -> Self {
        Error::InvalidReference {
            reference: reference.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn api(operation: &'static str, location: impl Into<String>, source: ApiError) -> Self {
        if let ApiError::Cancelled { .. } = source {
            return Error::Cancelled;
        }
        Error::Api {
            operation,
            location: location.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_misuse_split() {
        assert!(Error::invalid_reference("foo", "missing scheme").is_misuse());
        assert!(Error::MissingField("bucket").is_misuse());
        assert!(Error::InvalidRequest("both set".to_string()).is_misuse());

        assert!(!Error::not_found("b", "s").is_misuse());
        assert!(!Error::modified("b", "s").is_misuse());
        assert!(!Error::DecryptionFailed("tag mismatch".to_string()).is_misuse());
        assert!(!Error::Cancelled.is_misuse());
        let api = Error::api(
            "read",
            "b/s",
            ApiError::status("storage", 503, "UNAVAILABLE", "try again"),
        );
        assert!(!api.is_misuse());
        assert_eq!(api.kind(), ErrorKind::Api);
    }

    #[test]
    fn test_cancelled_backend_call_maps_to_cancelled() {
        let err = Error::api(
            "list",
            "test-bucket",
            ApiError::Cancelled {
                service: "storage",
                operation: "objects.list",
            },
        );
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_display_includes_location() {
        let err = Error::already_exists("my-bucket", "db/password");
        assert_eq!(
            err.to_string(),
            "secret my-bucket/db/password already exists"
        );

        let err = Error::PolicyPropagationFailed {
            target: PolicyTarget::Key,
            resource: "projects/p/locations/global/keyRings/r/cryptoKeys/k".to_string(),
            attempts: 5,
            source: ApiError::status("kms", 409, "ABORTED", "etag mismatch"),
        };
        let message = err.to_string();
        assert!(message.contains("kms key policy"));
        assert!(message.contains("after 5 attempts"));
    }
}
