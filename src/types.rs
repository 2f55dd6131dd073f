//! Project, Target and Credential Types
//!
//! Request and response shapes exchanged with callers. All of them are
//! serde types so an HTTP or CLI layer can pass them through unchanged.

use serde::{Deserialize, Serialize};

/// Request body for creating a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
}

/// A project as confirmed by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
}

/// AppRole role/secret ID pair.
///
/// The secret ID is disclosed once, when the project is created. It cannot be
/// read back from the backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectCredentials {
    pub role_id: String,
    pub secret_id: String,
}

impl ProjectCredentials {
    pub fn new(role_id: impl Into<String>, secret_id: impl Into<String>) -> Self {
        Self {
            role_id: role_id.into(),
            secret_id: secret_id.into(),
        }
    }
}

impl std::fmt::Debug for ProjectCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectCredentials")
            .field("role_id", &self.role_id)
            .field("secret_id", &"<redacted>")
            .finish()
    }
}

/// Credential-role definition of a target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetProperties {
    /// e.g. `assumed_role`
    pub credential_type: String,
    /// Permission references; order carries no meaning
    pub policy_arns: Vec<String>,
    /// Destination identity
    pub role_arn: String,
}

impl PartialEq for TargetProperties {
    fn eq(&self, other: &Self) -> bool {
        let mut ours = self.policy_arns.clone();
        let mut theirs = other.policy_arns.clone();
        ours.sort();
        ours.dedup();
        theirs.sort();
        theirs.dedup();

        self.credential_type == other.credential_type
            && self.role_arn == other.role_arn
            && ours == theirs
    }
}

impl Eq for TargetProperties {}

/// Request body for creating a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTargetRequest {
    pub name: String,
    pub properties: TargetProperties,
    /// Target kind, e.g. `aws_account`
    #[serde(rename = "type", default)]
    pub target_type: String,
}

/// Client token issued by an AppRole login
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientToken {
    pub client_token: String,
    /// Seconds until expiry
    pub lease_duration: u64,
    /// 0 means unlimited
    pub num_uses: u32,
    pub policies: Vec<String>,
}

impl std::fmt::Debug for ClientToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientToken")
            .field("client_token", &"<redacted>")
            .field("lease_duration", &self.lease_duration)
            .field("num_uses", &self.num_uses)
            .field("policies", &self.policies)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(arns: &[&str]) -> TargetProperties {
        TargetProperties {
            credential_type: "assumed_role".to_string(),
            policy_arns: arns.iter().map(|s| s.to_string()).collect(),
            role_arn: "arn:aws:iam::123456789012:role/deploy".to_string(),
        }
    }

    #[test]
    fn test_policy_arns_compare_as_set() {
        assert_eq!(props(&["a", "b"]), props(&["b", "a"]));
        assert_eq!(props(&["a", "a", "b"]), props(&["b", "a"]));
        assert_ne!(props(&["a"]), props(&["a", "b"]));
    }

    #[test]
    fn test_create_project_request_wire_shape() {
        let request: CreateProjectRequest =
            serde_json::from_str(r#"{"name": "payments"}"#).unwrap();
        assert_eq!(
            request,
            CreateProjectRequest {
                name: "payments".to_string()
            }
        );

        assert!(serde_json::from_str::<CreateProjectRequest>("{}").is_err());
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({ "name": "payments" })
        );
    }

    #[test]
    fn test_create_target_request_wire_shape() {
        let request: CreateTargetRequest = serde_json::from_str(
            r#"{
                "name": "prod-aws",
                "type": "aws_account",
                "properties": {
                    "credential_type": "assumed_role",
                    "policy_arns": ["arn:aws:iam::aws:policy/ReadOnlyAccess"],
                    "role_arn": "arn:aws:iam::123456789012:role/deploy"
                }
            }"#,
        )
        .unwrap();

        assert_eq!(request.name, "prod-aws");
        assert_eq!(request.target_type, "aws_account");
        assert_eq!(request.properties.policy_arns.len(), 1);
    }

    #[test]
    fn test_secrets_are_redacted_in_debug() {
        let creds = ProjectCredentials::new("r-123", "s-abc");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("r-123"));
        assert!(!debug.contains("s-abc"));

        let token = ClientToken {
            client_token: "hvs.secret".to_string(),
            lease_duration: 600,
            num_uses: 3,
            policies: vec![],
        };
        assert!(!format!("{:?}", token).contains("hvs.secret"));
    }
}
