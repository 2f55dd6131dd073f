//! Authorization Principal
//!
//! Classifies the credentials the provider was configured with. The
//! administrative role ID is recognised here and nowhere else.

use crate::error::CredentialsError;
use crate::types::ProjectCredentials;

/// Role ID that marks the administrative principal
pub const ADMIN_ROLE_ID: &str = "admin";

/// Who the provider is acting for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// May create, list and delete projects and targets; may not mint tokens
    Administrative,
    /// Holds one project's AppRole credentials; may only mint tokens
    ProjectScoped {
        /// Owning project, when the caller told us
        project: Option<String>,
        credentials: ProjectCredentials,
    },
}

impl Principal {
    pub fn from_credentials(
        role_id: impl Into<String>,
        secret_id: impl Into<String>,
        project: Option<String>,
    ) -> Self {
        let role_id = role_id.into();
        if role_id == ADMIN_ROLE_ID {
            Principal::Administrative
        } else {
            Principal::ProjectScoped {
                project,
                credentials: ProjectCredentials::new(role_id, secret_id),
            }
        }
    }

    pub fn is_administrative(&self) -> bool {
        matches!(self, Principal::Administrative)
    }

    pub fn project(&self) -> Option<&str> {
        match self {
            Principal::Administrative => None,
            Principal::ProjectScoped { project, .. } => project.as_deref(),
        }
    }

    pub(crate) fn require_admin(&self, operation: &str) -> Result<(), CredentialsError> {
        match self {
            Principal::Administrative => Ok(()),
            Principal::ProjectScoped { .. } => Err(CredentialsError::PermissionDenied(format!(
                "admin credentials must be used to {}",
                operation
            ))),
        }
    }

    pub(crate) fn require_project(&self, operation: &str) -> Result<&ProjectCredentials, CredentialsError> {
        match self {
            Principal::ProjectScoped { credentials, .. } => Ok(credentials),
            Principal::Administrative => Err(CredentialsError::PermissionDenied(format!(
                "admin credentials cannot be used to {}",
                operation
            ))),
        }
    }
}
