//! Credential Provider
//!
//! Project/target lifecycle and token issuance on top of a `SecretBackend`.
//!
//! ## Authorization
//!
//! - Administrative principal: create/delete projects, create/delete/get/list
//!   targets. Cannot mint tokens.
//! - Project-scoped principal: mint tokens only.
//! - `get_project` / `project_exists` are open to both.
//!
//! ## Consistency
//!
//! Project creation and deletion touch several backend entries. When a later
//! step fails, the completed steps are undone on a best-effort basis and the
//! original error is returned. Re-running `create_project` for the same name
//! converges: policy and role are rewritten and a fresh secret ID is forced.
//!
//! The provider holds no state of its own and performs no locking; concurrent
//! calls on the same project race at the backend.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::backend::{Secret, SecretBackend, VaultClient};
use crate::config::ProviderConfig;
use crate::error::CredentialsError;
use crate::naming::{
    validate_project_name, validate_target_name, ProjectNamer, APPROLE_LOGIN_PATH,
    TARGET_LIST_PATH,
};
use crate::principal::Principal;
use crate::types::{ClientToken, CreateTargetRequest, Project, ProjectCredentials, TargetProperties};

/// Secret ID lifetime (about one year)
pub const SECRET_ID_TTL: &str = "8776h";
/// Longest a minted token stays valid
pub const TOKEN_MAX_TTL: &str = "10m";
/// Uses per minted token. With 1, Vault refuses to hand out the STS
/// credentials because the login itself spends the only use.
pub const TOKEN_NUM_USES: u32 = 3;

type Result<T> = std::result::Result<T, CredentialsError>;

/// Operations offered to callers such as an HTTP handler or the CLI
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Creates the project's policy and AppRole and returns its credentials.
    /// The secret ID is only ever visible here.
    async fn create_project(&self, name: &str) -> Result<ProjectCredentials>;

    async fn create_target(&self, project: &str, request: &CreateTargetRequest) -> Result<()>;

    async fn delete_project(&self, name: &str) -> Result<()>;

    async fn delete_target(&self, project: &str, target: &str) -> Result<()>;

    async fn get_project(&self, name: &str) -> Result<Project>;

    async fn get_target(&self, project: &str, target: &str) -> Result<TargetProperties>;

    /// Exchanges the configured project credentials for a client token.
    async fn get_token(&self) -> Result<ClientToken>;

    async fn list_targets(&self, project: &str) -> Result<Vec<String>>;

    async fn project_exists(&self, name: &str) -> Result<bool>;

    async fn target_exists(&self, project: &str, target: &str) -> Result<bool>;
}

/// Project creation steps that need undoing on failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provisioned {
    Policy,
    AppRole,
}

/// `CredentialProvider` backed by Vault AppRole and the AWS secrets engine
pub struct VaultCredentialProvider<B> {
    backend: B,
    namer: ProjectNamer,
    principal: Principal,
}

impl VaultCredentialProvider<VaultClient> {
    /// Connects to the Vault server named in `config`.
    pub fn connect(config: &ProviderConfig) -> anyhow::Result<Self> {
        Ok(Self::from_config(VaultClient::from_config(config)?, config))
    }
}

impl<B: SecretBackend> VaultCredentialProvider<B> {
    pub fn new(backend: B, namer: ProjectNamer, principal: Principal) -> Self {
        Self {
            backend,
            namer,
            principal,
        }
    }

    pub fn from_config(backend: B, config: &ProviderConfig) -> Self {
        Self::new(backend, config.namer(), config.principal())
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn namer(&self) -> &ProjectNamer {
        &self.namer
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn provision_project(
        &self,
        name: &str,
        done: &mut Vec<Provisioned>,
    ) -> Result<ProjectCredentials> {
        let policy_name = self.namer.policy_name(name);
        let rules = self.namer.default_readonly_policy(name);
        self.backend
            .put_policy(&policy_name, &rules)
            .await
            .map_err(CredentialsError::backend("put policy", &policy_name))?;
        done.push(Provisioned::Policy);

        let approle = self.namer.approle_path(name);
        let options = json!({
            "secret_id_ttl": SECRET_ID_TTL,
            "token_max_ttl": TOKEN_MAX_TTL,
            "token_no_default_policy": "true",
            "token_num_uses": TOKEN_NUM_USES,
            "token_policies": policy_name,
        });
        self.backend
            .write(&approle, options)
            .await
            .map_err(CredentialsError::backend("write approle", &approle))?;
        done.push(Provisioned::AppRole);

        let role_id = self.read_role_id(name).await?;
        let secret_id = self.generate_secret_id(name).await?;

        Ok(ProjectCredentials { role_id, secret_id })
    }

    async fn read_role_id(&self, name: &str) -> Result<String> {
        let path = self.namer.role_id_path(name);
        let secret = self
            .backend
            .read(&path)
            .await
            .map_err(CredentialsError::backend("read role id", &path))?
            .ok_or_else(|| CredentialsError::malformed(&path, "no role ID returned"))?;
        string_field(&path, &secret, "role_id")
    }

    /// `force` regenerates even when a secret ID exists, invalidating it.
    async fn generate_secret_id(&self, name: &str) -> Result<String> {
        let path = self.namer.secret_id_path(name);
        let secret = self
            .backend
            .write(&path, json!({ "force": true }))
            .await
            .map_err(CredentialsError::backend("generate secret id", &path))?
            .ok_or_else(|| CredentialsError::malformed(&path, "no secret ID returned"))?;
        string_field(&path, &secret, "secret_id")
    }

    async fn roll_back_project(&self, name: &str, done: &[Provisioned]) {
        for step in done.iter().rev() {
            let outcome = match step {
                Provisioned::AppRole => {
                    let path = self.namer.approle_path(name);
                    let result = self.backend.delete(&path).await;
                    result.map(|_| path)
                }
                Provisioned::Policy => {
                    let policy = self.namer.policy_name(name);
                    let result = self.backend.delete_policy(&policy).await;
                    result.map(|_| policy)
                }
            };
            match outcome {
                Ok(what) => debug!(project = %name, undone = %what, "Rolled back"),
                Err(e) => warn!(
                    project = %name,
                    step = ?step,
                    error = %e,
                    "Rollback failed, manual cleanup required"
                ),
            }
        }
    }
}

/// Pulls a required string field out of a response.
fn string_field(path: &str, secret: &Secret, key: &str) -> Result<String> {
    match secret.field(key) {
        Some(Value::String(value)) => Ok(value.clone()),
        Some(other) => Err(CredentialsError::malformed(
            path,
            format!("{} is not a string: {}", key, other),
        )),
        None => Err(CredentialsError::malformed(path, format!("missing {}", key))),
    }
}

fn string_list_field(path: &str, secret: &Secret, key: &str) -> Result<Vec<String>> {
    let items = match secret.field(key) {
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(CredentialsError::malformed(
                path,
                format!("{} is not a list: {}", key, other),
            ))
        }
        None => return Err(CredentialsError::malformed(path, format!("missing {}", key))),
    };

    items
        .iter()
        .map(|item| {
            item.as_str().map(String::from).ok_or_else(|| {
                CredentialsError::malformed(path, format!("{} holds a non-string: {}", key, item))
            })
        })
        .collect()
}

fn decode_target(path: &str, secret: &Secret) -> Result<TargetProperties> {
    let role_arn = string_list_field(path, secret, "role_arns")?
        .into_iter()
        .next()
        .ok_or_else(|| CredentialsError::malformed(path, "role_arns is empty"))?;
    let policy_arns = string_list_field(path, secret, "policy_arns")?;
    let credential_type = string_field(path, secret, "credential_type")?;

    Ok(TargetProperties {
        credential_type,
        policy_arns,
        role_arn,
    })
}

#[async_trait]
impl<B: SecretBackend> CredentialProvider for VaultCredentialProvider<B> {
    async fn create_project(&self, name: &str) -> Result<ProjectCredentials> {
        self.principal.require_admin("create project")?;
        validate_project_name(name)?;

        let approle = self.namer.approle_path(name);
        let existed = self
            .backend
            .read(&approle)
            .await
            .map_err(CredentialsError::backend("read approle", &approle))?
            .is_some();

        info!(project = %name, existed, "Creating project");

        let mut done = Vec::new();
        match self.provision_project(name, &mut done).await {
            Ok(credentials) => {
                info!(
                    project = %name,
                    role_id = %credentials.role_id,
                    "Project created"
                );
                Ok(credentials)
            }
            Err(err) => {
                warn!(project = %name, error = %err, "Project creation failed");
                // A pre-existing project was only rewritten in place; leave it.
                if !existed {
                    self.roll_back_project(name, &done).await;
                }
                Err(err)
            }
        }
    }

    async fn create_target(&self, project: &str, request: &CreateTargetRequest) -> Result<()> {
        self.principal.require_admin("create target")?;
        validate_project_name(project)?;
        validate_target_name(&request.name)?;

        let path = self.namer.target_path(project, &request.name);
        let properties = &request.properties;
        let options = json!({
            "role_arns": [properties.role_arn],
            "credential_type": properties.credential_type,
            "policy_arns": properties.policy_arns,
        });

        info!(
            project = %project,
            target = %request.name,
            credential_type = %properties.credential_type,
            "Creating target"
        );

        self.backend
            .write(&path, options)
            .await
            .map_err(CredentialsError::backend("write target", &path))?;
        Ok(())
    }

    async fn delete_project(&self, name: &str) -> Result<()> {
        self.principal.require_admin("delete project")?;
        validate_project_name(name)?;

        info!(project = %name, "Deleting project");

        let policy_name = self.namer.policy_name(name);
        self.backend
            .delete_policy(&policy_name)
            .await
            .map_err(CredentialsError::backend("delete policy", &policy_name))?;

        let approle = self.namer.approle_path(name);
        if let Err(source) = self.backend.delete(&approle).await {
            // Put the policy back so the surviving AppRole keeps working.
            let rules = self.namer.default_readonly_policy(name);
            if let Err(e) = self.backend.put_policy(&policy_name, &rules).await {
                warn!(
                    project = %name,
                    error = %e,
                    "Failed to restore policy, manual cleanup required"
                );
            }
            return Err(CredentialsError::backend("delete approle", approle)(source));
        }

        info!(project = %name, "Project deleted");
        Ok(())
    }

    async fn delete_target(&self, project: &str, target: &str) -> Result<()> {
        self.principal.require_admin("delete target")?;
        validate_project_name(project)?;
        validate_target_name(target)?;

        let path = self.namer.target_path(project, target);
        info!(project = %project, target = %target, "Deleting target");

        self.backend
            .delete(&path)
            .await
            .map_err(CredentialsError::backend("delete target", &path))
    }

    async fn get_project(&self, name: &str) -> Result<Project> {
        validate_project_name(name)?;

        let approle = self.namer.approle_path(name);
        debug!(project = %name, path = %approle, "Looking up project");

        match self
            .backend
            .read(&approle)
            .await
            .map_err(CredentialsError::backend("read approle", &approle))?
        {
            Some(_) => Ok(Project {
                name: name.to_string(),
            }),
            None => Err(CredentialsError::not_found("project", name)),
        }
    }

    async fn get_target(&self, project: &str, target: &str) -> Result<TargetProperties> {
        self.principal.require_admin("get target information")?;
        validate_project_name(project)?;
        validate_target_name(target)?;

        let path = self.namer.target_path(project, target);
        let secret = self
            .backend
            .read(&path)
            .await
            .map_err(CredentialsError::backend("read target", &path))?
            .ok_or_else(|| CredentialsError::not_found("target", format!("{}/{}", project, target)))?;

        decode_target(&path, &secret)
    }

    async fn get_token(&self) -> Result<ClientToken> {
        let credentials = self.principal.require_project("get tokens")?;

        debug!(role_id = %credentials.role_id, "Logging in with AppRole");

        let options = json!({
            "role_id": credentials.role_id,
            "secret_id": credentials.secret_id,
        });
        let secret = self
            .backend
            .write(APPROLE_LOGIN_PATH, options)
            .await
            .map_err(CredentialsError::backend("approle login", APPROLE_LOGIN_PATH))?
            .ok_or_else(|| CredentialsError::malformed(APPROLE_LOGIN_PATH, "empty login response"))?;

        let auth = secret
            .auth
            .ok_or_else(|| CredentialsError::malformed(APPROLE_LOGIN_PATH, "missing auth block"))?;
        if auth.client_token.is_empty() {
            return Err(CredentialsError::malformed(
                APPROLE_LOGIN_PATH,
                "empty client token",
            ));
        }

        info!(
            role_id = %credentials.role_id,
            lease_duration = auth.lease_duration,
            num_uses = auth.num_uses,
            "Issued client token"
        );

        Ok(ClientToken {
            client_token: auth.client_token,
            lease_duration: auth.lease_duration,
            num_uses: auth.num_uses,
            policies: auth.policies,
        })
    }

    async fn list_targets(&self, project: &str) -> Result<Vec<String>> {
        self.principal.require_admin("list targets")?;
        validate_project_name(project)?;

        let listed = self
            .backend
            .list(TARGET_LIST_PATH)
            .await
            .map_err(CredentialsError::backend("list targets", TARGET_LIST_PATH))?;

        let Some(secret) = listed else {
            return Ok(Vec::new());
        };

        let targets: Vec<String> = string_list_field(TARGET_LIST_PATH, &secret, "keys")?
            .iter()
            .filter_map(|key| self.namer.target_name_from_key(project, key))
            .map(String::from)
            .collect();

        debug!(project = %project, count = targets.len(), "Listed targets");
        Ok(targets)
    }

    async fn project_exists(&self, name: &str) -> Result<bool> {
        match self.get_project(name).await {
            Ok(project) => Ok(!project.name.is_empty()),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn target_exists(&self, project: &str, target: &str) -> Result<bool> {
        self.principal.require_admin("check target existence")?;
        validate_project_name(project)?;
        validate_target_name(target)?;

        let path = self.namer.target_path(project, target);
        let found = self
            .backend
            .read(&path)
            .await
            .map_err(CredentialsError::backend("read target", &path))?;
        Ok(found.is_some())
    }
}
