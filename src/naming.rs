//! Backend Path and Policy Naming
//!
//! Every policy, AppRole and target role the provider touches is addressed by
//! a string derived from the project (and target) name. These conventions are
//! shared with whatever else reads the backend, so they must stay bit-exact.

use crate::error::CredentialsError;

/// Default prefix for everything a project owns in the backend
pub const DEFAULT_PROJECT_PREFIX: &str = "argo-cloudops-projects";

/// Mount of the AppRole auth method roles
pub const APPROLE_ROLE_PREFIX: &str = "auth/approle/role";

/// AppRole login endpoint
pub const APPROLE_LOGIN_PATH: &str = "auth/approle/login";

/// Flat namespace holding every target role of every project
pub const TARGET_LIST_PATH: &str = "aws/roles/";

const TARGET_SEPARATOR: &str = "-target-";

/// Longest project or target name accepted
pub const MAX_NAME_LEN: usize = 128;

/// Derives backend paths and policy text for projects and targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectNamer {
    prefix: String,
}

impl Default for ProjectNamer {
    fn default() -> Self {
        Self::new(DEFAULT_PROJECT_PREFIX)
    }
}

impl ProjectNamer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `<prefix>-<project>`, shared by the policy and the AppRole
    pub fn policy_name(&self, project: &str) -> String {
        format!("{}-{}", self.prefix, project)
    }

    /// `auth/approle/role/<prefix>-<project>`
    pub fn approle_path(&self, project: &str) -> String {
        format!("{}/{}", APPROLE_ROLE_PREFIX, self.policy_name(project))
    }

    pub fn role_id_path(&self, project: &str) -> String {
        format!("{}/role-id", self.approle_path(project))
    }

    pub fn secret_id_path(&self, project: &str) -> String {
        format!("{}/secret-id", self.approle_path(project))
    }

    /// Key prefix of every target belonging to `project` inside `aws/roles/`
    pub fn target_key_prefix(&self, project: &str) -> String {
        format!("{}-{}{}", self.prefix, project, TARGET_SEPARATOR)
    }

    /// `aws/roles/<prefix>-<project>-target-<target>`
    pub fn target_path(&self, project: &str, target: &str) -> String {
        format!(
            "{}{}{}",
            TARGET_LIST_PATH,
            self.target_key_prefix(project),
            target
        )
    }

    /// Strips the project's key prefix from a listed key.
    ///
    /// Returns `None` for keys belonging to other projects.
    pub fn target_name_from_key<'a>(&self, project: &str, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(&self.target_key_prefix(project))
    }

    /// Read-only policy scoping a project's tokens to its own STS paths.
    pub fn default_readonly_policy(&self, project: &str) -> String {
        format!(
            "path \"aws/sts/{}*\" {{ capabilities = [\"read\"] }}",
            self.target_key_prefix(project)
        )
    }
}

/// Checks a project or target name before it is spliced into a path.
pub fn validate_name(kind: &str, name: &str) -> Result<(), CredentialsError> {
    if name.is_empty()
        || name.len() > MAX_NAME_LEN
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(CredentialsError::Validation(format!(
            "{} name must be 1-{} alphanumeric characters, hyphens, or underscores: {:?}",
            kind, MAX_NAME_LEN, name
        )));
    }
    Ok(())
}

/// Project names additionally may not contain the target separator or end
/// in `-target`.
///
/// Either would make `<name>-target-` begin with another project's target key
/// prefix, so that project's listing and STS policy would reach these targets.
pub fn validate_project_name(name: &str) -> Result<(), CredentialsError> {
    validate_name("project", name)?;
    if format!("{}-", name).contains(TARGET_SEPARATOR) {
        return Err(CredentialsError::Validation(format!(
            "project name may not contain {:?} or end in \"-target\": {:?}",
            TARGET_SEPARATOR, name
        )));
    }
    Ok(())
}

pub fn validate_target_name(name: &str) -> Result<(), CredentialsError> {
    validate_name("target", name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_paths() {
        let namer = ProjectNamer::default();

        assert_eq!(namer.policy_name("payments"), "argo-cloudops-projects-payments");
        assert_eq!(
            namer.approle_path("payments"),
            "auth/approle/role/argo-cloudops-projects-payments"
        );
        assert_eq!(
            namer.role_id_path("payments"),
            "auth/approle/role/argo-cloudops-projects-payments/role-id"
        );
        assert_eq!(
            namer.secret_id_path("payments"),
            "auth/approle/role/argo-cloudops-projects-payments/secret-id"
        );
    }

    #[test]
    fn test_target_paths() {
        let namer = ProjectNamer::default();

        assert_eq!(
            namer.target_path("payments", "prod-aws"),
            "aws/roles/argo-cloudops-projects-payments-target-prod-aws"
        );
        assert_eq!(
            namer.target_name_from_key("payments", "argo-cloudops-projects-payments-target-prod-aws"),
            Some("prod-aws")
        );
        assert_eq!(
            namer.target_name_from_key("payments", "argo-cloudops-projects-billing-target-prod-aws"),
            None
        );
    }

    #[test]
    fn test_default_readonly_policy() {
        let policy = ProjectNamer::default().default_readonly_policy("payments");
        assert_eq!(
            policy,
            "path \"aws/sts/argo-cloudops-projects-payments-target-*\" { capabilities = [\"read\"] }"
        );
    }

    #[test]
    fn test_custom_prefix() {
        let namer = ProjectNamer::new("ops");
        assert_eq!(namer.policy_name("a"), "ops-a");
        assert_eq!(namer.target_path("a", "b"), "aws/roles/ops-a-target-b");
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("project", "payments").is_ok());
        assert!(validate_name("project", "prod_aws-2").is_ok());

        assert!(validate_name("project", "").is_err());
        assert!(validate_name("project", "a/b").is_err());
        assert!(validate_name("project", "..").is_err());
        assert!(validate_name("project", "has space").is_err());
        assert!(validate_name("project", &"x".repeat(MAX_NAME_LEN + 1)).is_err());

        assert!(validate_project_name("shadow-target-x").is_err());
        assert!(validate_project_name("a-target").is_err());
        assert!(validate_project_name("a-targets").is_ok());
        assert!(validate_project_name("target").is_ok());
        assert!(validate_project_name("target-a").is_ok());
        assert!(validate_target_name("shadow-target-x").is_ok());
        assert!(validate_target_name("a-target").is_ok());
    }

    #[test]
    fn test_valid_project_prefixes_never_overlap() {
        let namer = ProjectNamer::default();
        let names = ["a", "a-t", "a-targe", "a-targets", "a_target", "target", "target-a", "b"];

        for owner in names {
            assert!(validate_project_name(owner).is_ok(), "{}", owner);
            let key = namer.target_key_prefix(owner) + "x";
            for other in names.iter().filter(|n| **n != owner) {
                assert_eq!(
                    namer.target_name_from_key(other, &key),
                    None,
                    "{} sees a target of {}",
                    other,
                    owner
                );
            }
        }
    }
}
