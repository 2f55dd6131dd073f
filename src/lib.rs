//! Cloud-Ops Credential Provider
//!
//! Manages projects and targets backed by Vault policies, AppRoles and AWS
//! secrets-engine roles, and exchanges project AppRole credentials for
//! short-lived, use-limited client tokens.
//!
//! ## Example
//!
//! ```ignore
//! use cloudops_credentials::{CredentialProvider, ProviderConfig, VaultCredentialProvider};
//!
//! let config = ProviderConfig::from_env()?;
//! let provider = VaultCredentialProvider::connect(&config)?;
//!
//! let credentials = provider.create_project("payments").await?;
//! println!("role_id: {}", credentials.role_id);
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod naming;
pub mod principal;
pub mod provider;
pub mod types;

pub use backend::{BackendError, InMemoryBackend, SecretBackend, VaultClient};
pub use config::ProviderConfig;
pub use error::CredentialsError;
pub use naming::ProjectNamer;
pub use principal::Principal;
pub use provider::{CredentialProvider, VaultCredentialProvider};
pub use types::{
    ClientToken, CreateProjectRequest, CreateTargetRequest, Project, ProjectCredentials,
    TargetProperties,
};
