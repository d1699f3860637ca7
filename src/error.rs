//! Error types for the Cosmo Tech operator

use std::fmt;

use thiserror::Error;

use crate::resource::ResourceKind;

/// Result type alias using the operator's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Why a named parent could not be turned into an external id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedReason {
    /// No sibling resource with that name exists
    Missing,
    /// The sibling exists but has no external id yet
    Unreconciled,
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnresolvedReason::Missing => f.write_str("not found"),
            UnresolvedReason::Unreconciled => f.write_str("not reconciled yet"),
        }
    }
}

/// Failure classes driving retry and status decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Expected absence; drives the idempotent branches
    NotFound,
    /// Worth retrying with backoff
    Transient,
    /// Must be recorded on the resource, not retried blindly
    Permanent,
    /// A parent is not ready; defer and retry later
    DependencyUnresolved,
}

impl ErrorClass {
    /// Label used for metrics and status condition reasons
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::NotFound => "NotFound",
            ErrorClass::Transient => "TransientFailure",
            ErrorClass::Permanent => "PermanentFailure",
            ErrorClass::DependencyUnresolved => "DependencyUnresolved",
        }
    }
}

/// Operator error types
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Backend entity or cluster object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Backend temporarily unavailable
    #[error("Transient backend failure: {0}")]
    Transient(String),

    /// Backend rejected the request for good
    #[error("Permanent backend failure: {0}")]
    Permanent(String),

    /// A selector names a parent that cannot be resolved yet
    #[error("Dependency {kind} '{name}' is {reason}")]
    DependencyUnresolved {
        kind: ResourceKind,
        name: String,
        reason: UnresolvedReason,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Long-running operation reached a terminal failure state
    #[error("Operation failed: {0}")]
    OperationFailed(String),

    /// Long-running operation did not finish in time
    #[error("Operation timed out after {0:?}")]
    TimedOut(std::time::Duration),

    /// Shutdown requested while waiting
    #[error("Cancelled by shutdown")]
    Cancelled,

    /// Watch stream failure
    #[error("Watch error: {0}")]
    Watch(String),

    /// The watch cursor is older than the API server's history
    #[error("Resource version expired: {0}")]
    Gone(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create a transient backend error
    pub fn transient(msg: impl Into<String>) -> Self {
        Error::Transient(msg.into())
    }

    /// Create a permanent backend error
    pub fn permanent(msg: impl Into<String>) -> Self {
        Error::Permanent(msg.into())
    }

    /// Create a dependency error
    pub fn unresolved(kind: ResourceKind, name: impl Into<String>, reason: UnresolvedReason) -> Self {
        Error::DependencyUnresolved {
            kind,
            name: name.into(),
            reason,
        }
    }

    /// Map the error onto the retry taxonomy
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::NotFound(_) => ErrorClass::NotFound,
            Error::Kube(kube::Error::Api(resp)) => match resp.code {
                404 => ErrorClass::NotFound,
                401 | 403 | 400 | 422 => ErrorClass::Permanent,
                _ => ErrorClass::Transient,
            },
            Error::Kube(_) => ErrorClass::Transient,
            Error::Transient(_)
            | Error::TimedOut(_)
            | Error::Cancelled
            | Error::Watch(_)
            | Error::Gone(_) => ErrorClass::Transient,
            Error::Io(_) => ErrorClass::Transient,
            Error::DependencyUnresolved { .. } => ErrorClass::DependencyUnresolved,
            Error::Permanent(_)
            | Error::Config(_)
            | Error::Validation(_)
            | Error::OperationFailed(_)
            | Error::Serialization(_) => ErrorClass::Permanent,
        }
    }

    /// True for 404 from either the backend or the Kubernetes API
    pub fn is_not_found(&self) -> bool {
        self.class() == ErrorClass::NotFound
    }

    /// True when a watch must restart from an empty cursor
    pub fn is_gone(&self) -> bool {
        match self {
            Error::Gone(_) => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 410,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_follows_taxonomy() {
        assert_eq!(Error::not_found("x").class(), ErrorClass::NotFound);
        assert_eq!(Error::transient("x").class(), ErrorClass::Transient);
        assert_eq!(Error::permanent("x").class(), ErrorClass::Permanent);
        assert_eq!(Error::validation("x").class(), ErrorClass::Permanent);
        assert_eq!(
            Error::unresolved(ResourceKind::Organization, "acme", UnresolvedReason::Missing).class(),
            ErrorClass::DependencyUnresolved
        );
        assert_eq!(
            Error::OperationFailed("import failed".into()).class(),
            ErrorClass::Permanent
        );
    }

    #[test]
    fn kube_api_errors_are_classified_by_status_code() {
        let api_error = |code| {
            Error::Kube(kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".into(),
                message: "boom".into(),
                reason: "Whatever".into(),
                code,
            }))
        };

        assert!(api_error(404).is_not_found());
        assert_eq!(api_error(403).class(), ErrorClass::Permanent);
        assert_eq!(api_error(500).class(), ErrorClass::Transient);
        assert_eq!(api_error(409).class(), ErrorClass::Transient);
        assert!(api_error(410).is_gone());
        assert!(!api_error(500).is_gone());
    }

    #[test]
    fn dependency_message_names_parent() {
        let err = Error::unresolved(ResourceKind::Solution, "sim1", UnresolvedReason::Unreconciled);
        assert_eq!(err.to_string(), "Dependency Solution 'sim1' is not reconciled yet");
    }
}
