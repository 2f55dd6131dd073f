//! Provider Errors
//!
//! Every failure a caller can observe from the credential provider. Backend
//! failures are wrapped with the operation and path that produced them.

use reqwest::StatusCode;
use thiserror::Error;

use crate::backend::BackendError;

/// Errors returned by credential provider operations
#[derive(Debug, Error)]
pub enum CredentialsError {
    /// Nothing stored where a project or target was expected
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// The caller's principal may not perform this operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The backend call itself failed
    #[error("Backend error during {operation} at {path}: {source}")]
    BackendUnavailable {
        operation: &'static str,
        path: String,
        #[source]
        source: BackendError,
    },

    /// The backend answered, but not in the expected shape
    #[error("Malformed data at {path}: {reason}")]
    MalformedData { path: String, reason: String },

    /// Structurally invalid input
    #[error("Invalid input: {0}")]
    Validation(String),
}

impl CredentialsError {
    pub(crate) fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub(crate) fn backend(operation: &'static str, path: impl Into<String>) -> impl FnOnce(BackendError) -> Self {
        let path = path.into();
        move |source| Self::BackendUnavailable {
            operation,
            path,
            source,
        }
    }

    pub(crate) fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedData {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// HTTP status a transport layer should answer with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Self::BackendUnavailable { source, .. } if source.is_unreachable() => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::BackendUnavailable { .. } => StatusCode::BAD_GATEWAY,
            Self::MalformedData { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            CredentialsError::not_found("project", "payments").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            CredentialsError::PermissionDenied("create project".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            CredentialsError::malformed("aws/roles/x", "missing role_arns").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            CredentialsError::Validation("bad name".into()).status_code(),
            StatusCode::BAD_REQUEST
        );

        let rejected = CredentialsError::backend("read", "auth/approle/role/x")(BackendError::Rejected {
            status: 500,
            message: "internal error".into(),
        });
        assert_eq!(rejected.status_code(), StatusCode::BAD_GATEWAY);

        let unreachable =
            CredentialsError::backend("read", "auth/approle/role/x")(BackendError::Unavailable("connection refused".into()));
        assert_eq!(unreachable.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_backend_error_display_carries_context() {
        let err = CredentialsError::backend("delete policy", "argo-cloudops-projects-p")(
            BackendError::Unavailable("timed out".into()),
        );
        let message = err.to_string();
        assert!(message.contains("delete policy"));
        assert!(message.contains("argo-cloudops-projects-p"));
        assert!(message.contains("timed out"));
    }
}
