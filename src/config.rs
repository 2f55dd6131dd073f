//! Provider Configuration
//!
//! Built once at process start and passed by reference into the provider.
//! Values come from the environment (see `from_env`) or from CLI flags.

use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::naming::{ProjectNamer, DEFAULT_PROJECT_PREFIX};
use crate::principal::Principal;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything the provider needs to reach the backend and classify its caller
#[derive(Clone)]
pub struct ProviderConfig {
    /// Vault server address, e.g. `https://vault.internal:8200`
    pub vault_address: String,
    /// Privileged token for policy/role management (SENSITIVE)
    pub vault_token: String,
    /// AppRole role ID, or `admin`
    pub role_id: String,
    /// AppRole secret ID (SENSITIVE)
    pub secret_id: String,
    /// Project the role ID belongs to, if known
    pub project: Option<String>,
    pub project_prefix: String,
    /// Upper bound on every backend call
    pub request_timeout: Duration,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("vault_address", &self.vault_address)
            .field("role_id", &self.role_id)
            .field("project", &self.project)
            .field("project_prefix", &self.project_prefix)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl ProviderConfig {
    /// Load configuration from environment variables
    ///
    /// Expected env vars:
    /// - VAULT_ADDR
    /// - VAULT_TOKEN (required for admin credentials)
    /// - ARGO_CLOUDOPS_VAULT_ROLE
    /// - ARGO_CLOUDOPS_VAULT_SECRET
    /// - ARGO_CLOUDOPS_PROJECT (optional)
    /// - ARGO_CLOUDOPS_PROJECT_PREFIX (optional)
    /// - ARGO_CLOUDOPS_REQUEST_TIMEOUT_SECS (optional, default 30)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let request_timeout = match lookup("ARGO_CLOUDOPS_REQUEST_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(
                raw.trim()
                    .parse()
                    .with_context(|| format!("ARGO_CLOUDOPS_REQUEST_TIMEOUT_SECS is not a number: {}", raw))?,
            ),
            None => DEFAULT_REQUEST_TIMEOUT,
        };

        let config = Self {
            vault_address: lookup("VAULT_ADDR").context("VAULT_ADDR not set")?,
            vault_token: lookup("VAULT_TOKEN").unwrap_or_default(),
            role_id: lookup("ARGO_CLOUDOPS_VAULT_ROLE").context("ARGO_CLOUDOPS_VAULT_ROLE not set")?,
            secret_id: lookup("ARGO_CLOUDOPS_VAULT_SECRET")
                .context("ARGO_CLOUDOPS_VAULT_SECRET not set")?,
            project: lookup("ARGO_CLOUDOPS_PROJECT").filter(|p| !p.is_empty()),
            project_prefix: lookup("ARGO_CLOUDOPS_PROJECT_PREFIX")
                .unwrap_or_else(|| DEFAULT_PROJECT_PREFIX.to_string()),
            request_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.vault_address.starts_with("http://") || self.vault_address.starts_with("https://")) {
            bail!("Vault address must be an http(s) URL: {}", self.vault_address);
        }
        if self.role_id.is_empty() {
            bail!("role ID must not be empty");
        }
        if self.secret_id.is_empty() {
            bail!("secret ID must not be empty");
        }
        if self.principal().is_administrative() && self.vault_token.is_empty() {
            bail!("a Vault token is required when running with admin credentials");
        }
        if self.project_prefix.is_empty() {
            bail!("project prefix must not be empty");
        }
        if self.request_timeout.is_zero() {
            bail!("request timeout must be greater than zero");
        }
        Ok(())
    }

    pub fn principal(&self) -> Principal {
        Principal::from_credentials(&*self.role_id, &*self.secret_id, self.project.clone())
    }

    pub fn namer(&self) -> ProjectNamer {
        ProjectNamer::new(self.project_prefix.clone())
    }
}
