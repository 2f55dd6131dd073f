//! Secret Backend Abstraction
//!
//! The provider only needs a handful of primitives from the secret store:
//! path-addressed read/write/delete/list on JSON maps, plus named ACL
//! policies. `VaultClient` speaks them over HTTP; `InMemoryBackend` emulates
//! them in-process.

pub mod memory;
pub mod vault;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use memory::InMemoryBackend;
pub use vault::VaultClient;

/// Failure of a single backend call
#[derive(Debug, Error)]
pub enum BackendError {
    /// Transport failure: connection refused, DNS, timeout
    #[error("backend unreachable: {0}")]
    Unavailable(String),

    /// The backend answered with an error status
    #[error("backend rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The response body could not be decoded
    #[error("undecodable backend response: {0}")]
    Decode(String),
}

impl BackendError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, BackendError::Unavailable(_))
    }
}

/// Authentication block returned by login endpoints
#[derive(Clone, Serialize, Deserialize)]
pub struct SecretAuth {
    pub client_token: String,
    #[serde(default)]
    pub accessor: String,
    #[serde(default)]
    pub policies: Vec<String>,
    #[serde(default)]
    pub lease_duration: u64,
    #[serde(default)]
    pub renewable: bool,
    #[serde(default)]
    pub num_uses: u32,
}

impl std::fmt::Debug for SecretAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretAuth")
            .field("client_token", &"<redacted>")
            .field("policies", &self.policies)
            .field("lease_duration", &self.lease_duration)
            .field("num_uses", &self.num_uses)
            .finish()
    }
}

/// A backend response envelope
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Secret {
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
    #[serde(default)]
    pub auth: Option<SecretAuth>,
}

impl Secret {
    pub fn from_data(data: Map<String, Value>) -> Self {
        Self {
            data: Some(data),
            auth: None,
        }
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|data| data.get(key))
    }
}

/// Primitives the credential provider consumes from the secret store.
///
/// `Ok(None)` means nothing is stored at the path. It is not an error.
#[async_trait]
pub trait SecretBackend: Send + Sync {
    async fn read(&self, path: &str) -> Result<Option<Secret>, BackendError>;

    async fn write(&self, path: &str, data: Value) -> Result<Option<Secret>, BackendError>;

    async fn delete(&self, path: &str) -> Result<(), BackendError>;

    /// Lists keys directly under `path`, returned in `data.keys`.
    async fn list(&self, path: &str) -> Result<Option<Secret>, BackendError>;

    async fn put_policy(&self, name: &str, rules: &str) -> Result<(), BackendError>;

    async fn delete_policy(&self, name: &str) -> Result<(), BackendError>;
}

#[async_trait]
impl<T: SecretBackend + ?Sized> SecretBackend for Arc<T> {
    async fn read(&self, path: &str) -> Result<Option<Secret>, BackendError> {
        (**self).read(path).await
    }

    async fn write(&self, path: &str, data: Value) -> Result<Option<Secret>, BackendError> {
        (**self).write(path, data).await
    }

    async fn delete(&self, path: &str) -> Result<(), BackendError> {
        (**self).delete(path).await
    }

    async fn list(&self, path: &str) -> Result<Option<Secret>, BackendError> {
        (**self).list(path).await
    }

    async fn put_policy(&self, name: &str, rules: &str) -> Result<(), BackendError> {
        (**self).put_policy(name, rules).await
    }

    async fn delete_policy(&self, name: &str) -> Result<(), BackendError> {
        (**self).delete_policy(name).await
    }
}
