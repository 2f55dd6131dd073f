//! Vault HTTP Client
//!
//! Implements `SecretBackend` over Vault's v1 HTTP API. Authentication for
//! the provider's own privileged calls is a pre-established token sent as
//! `X-Vault-Token`.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{BackendError, Secret, SecretBackend};
use crate::config::ProviderConfig;

const TOKEN_HEADER: &str = "X-Vault-Token";
const POLICY_PREFIX: &str = "sys/policies/acl";

/// Vault HTTP API client
pub struct VaultClient {
    client: Client,
    address: String,
    token: String,
}

impl std::fmt::Debug for VaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultClient")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct VaultErrors {
    #[serde(default)]
    errors: Vec<String>,
}

/// How a 404 should be read for a given verb
#[derive(Clone, Copy)]
enum Missing {
    Absent,
    Error,
}

impl VaultClient {
    /// Create a new client for the Vault server at `address`
    pub fn new(address: &str, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("cloudops-credentials/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            address: address.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        Self::new(
            &config.vault_address,
            config.vault_token.clone(),
            config.request_timeout,
        )
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.address, path.trim_start_matches('/'))
    }

    async fn send(&self, request: RequestBuilder, missing: Missing) -> Result<Option<Secret>, BackendError> {
        let response = request
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        let status = response.status();
        debug!(status = %status, url = %response.url(), "Vault response");

        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if status == StatusCode::NOT_FOUND {
            if let Missing::Absent = missing {
                return Ok(None);
            }
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<VaultErrors>(&body) {
                Ok(parsed) if !parsed.errors.is_empty() => parsed.errors.join(", "),
                _ => body,
            };
            return Err(BackendError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        if body.is_empty() {
            return Ok(None);
        }

        serde_json::from_slice::<Secret>(&body)
            .map(Some)
            .map_err(|e| BackendError::Decode(e.to_string()))
    }
}

#[async_trait]
impl SecretBackend for VaultClient {
    async fn read(&self, path: &str) -> Result<Option<Secret>, BackendError> {
        debug!(path = %path, "Vault read");
        self.send(self.client.get(self.url(path)), Missing::Absent).await
    }

    async fn write(&self, path: &str, data: Value) -> Result<Option<Secret>, BackendError> {
        debug!(path = %path, "Vault write");
        self.send(self.client.post(self.url(path)).json(&data), Missing::Error)
            .await
    }

    async fn delete(&self, path: &str) -> Result<(), BackendError> {
        debug!(path = %path, "Vault delete");
        self.send(self.client.delete(self.url(path)), Missing::Absent)
            .await
            .map(|_| ())
    }

    async fn list(&self, path: &str) -> Result<Option<Secret>, BackendError> {
        debug!(path = %path, "Vault list");
        self.send(
            self.client.get(self.url(path)).query(&[("list", "true")]),
            Missing::Absent,
        )
        .await
    }

    async fn put_policy(&self, name: &str, rules: &str) -> Result<(), BackendError> {
        debug!(policy = %name, "Vault put policy");
        let url = self.url(&format!("{}/{}", POLICY_PREFIX, name));
        self.send(
            self.client.put(url).json(&json!({ "policy": rules })),
            Missing::Error,
        )
        .await
        .map(|_| ())
    }

    async fn delete_policy(&self, name: &str) -> Result<(), BackendError> {
        debug!(policy = %name, "Vault delete policy");
        let url = self.url(&format!("{}/{}", POLICY_PREFIX, name));
        self.send(self.client.delete(url), Missing::Absent)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::{HeaderMap, Method, StatusCode as AxumStatus, Uri};
    use axum::Router;
    use std::sync::{Arc, Mutex};

    const ROOT_TOKEN: &str = "root-token";

    type Calls = Arc<Mutex<Vec<(String, String, String)>>>;

    async fn stub(
        State(calls): State<Calls>,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: String,
    ) -> (AxumStatus, String) {
        calls
            .lock()
            .unwrap()
            .push((method.to_string(), uri.to_string(), body));

        if headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok()) != Some(ROOT_TOKEN) {
            return (
                AxumStatus::FORBIDDEN,
                r#"{"errors":["permission denied"]}"#.to_string(),
            );
        }

        match (method.as_str(), uri.path(), uri.query()) {
            ("GET", "/v1/auth/approle/role/argo-cloudops-projects-payments", None) => (
                AxumStatus::OK,
                r#"{"data":{"token_num_uses":3,"token_max_ttl":600}}"#.to_string(),
            ),
            ("GET", "/v1/aws/roles/", Some("list=true")) => (
                AxumStatus::OK,
                r#"{"data":{"keys":["argo-cloudops-projects-payments-target-prod-aws"]}}"#.to_string(),
            ),
            ("POST", "/v1/auth/approle/login", _) => (
                AxumStatus::OK,
                r#"{"data":null,"auth":{"client_token":"s.token","policies":["argo-cloudops-projects-payments"],"lease_duration":600,"renewable":true,"num_uses":3}}"#
                    .to_string(),
            ),
            ("PUT", "/v1/sys/policies/acl/argo-cloudops-projects-payments", _)
            | ("DELETE", "/v1/sys/policies/acl/argo-cloudops-projects-payments", _)
            | ("DELETE", "/v1/aws/roles/argo-cloudops-projects-payments-target-prod-aws", _) => {
                (AxumStatus::NO_CONTENT, String::new())
            }
            ("GET", "/v1/broken", _) => (
                AxumStatus::INTERNAL_SERVER_ERROR,
                r#"{"errors":["internal error","storage sealed"]}"#.to_string(),
            ),
            ("GET", "/v1/garbage", _) => (AxumStatus::OK, "not json".to_string()),
            ("GET", "/v1/slow", _) => {
                tokio::time::sleep(Duration::from_secs(2)).await;
                (AxumStatus::OK, "{}".to_string())
            }
            _ => (AxumStatus::NOT_FOUND, r#"{"errors":[]}"#.to_string()),
        }
    }

    async fn spawn_stub() -> (String, Calls) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new().fallback(stub).with_state(calls.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/", addr), calls)
    }

    fn client(address: &str) -> VaultClient {
        VaultClient::new(address, ROOT_TOKEN, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_read_present_and_absent() {
        let (address, _) = spawn_stub().await;
        let vault = client(&address);

        let secret = vault
            .read("auth/approle/role/argo-cloudops-projects-payments")
            .await
            .unwrap()
            .expect("role should exist");
        assert_eq!(secret.field("token_num_uses"), Some(&json!(3)));

        let missing = vault
            .read("auth/approle/role/argo-cloudops-projects-nope")
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_list_uses_list_query() {
        let (address, calls) = spawn_stub().await;
        let vault = client(&address);

        let listed = vault.list("aws/roles/").await.unwrap().unwrap();
        assert_eq!(
            listed.field("keys"),
            Some(&json!(["argo-cloudops-projects-payments-target-prod-aws"]))
        );

        let calls = calls.lock().unwrap();
        assert_eq!(calls[0].0, "GET");
        assert_eq!(calls[0].1, "/v1/aws/roles/?list=true");
    }

    #[tokio::test]
    async fn test_login_returns_auth_block() {
        let (address, calls) = spawn_stub().await;
        let vault = client(&address);

        let secret = vault
            .write(
                "auth/approle/login",
                json!({ "role_id": "r-123", "secret_id": "s-abc" }),
            )
            .await
            .unwrap()
            .unwrap();
        let auth = secret.auth.expect("login returns auth");
        assert_eq!(auth.client_token, "s.token");
        assert_eq!(auth.num_uses, 3);
        assert_eq!(auth.lease_duration, 600);

        let calls = calls.lock().unwrap();
        let body: Value = serde_json::from_str(&calls[0].2).unwrap();
        assert_eq!(body["role_id"], "r-123");
    }

    #[tokio::test]
    async fn test_policy_put_and_delete() {
        let (address, calls) = spawn_stub().await;
        let vault = client(&address);

        vault
            .put_policy("argo-cloudops-projects-payments", "path \"x\" {}")
            .await
            .unwrap();
        vault
            .delete_policy("argo-cloudops-projects-payments")
            .await
            .unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls[0].0, "PUT");
        assert_eq!(calls[0].1, "/v1/sys/policies/acl/argo-cloudops-projects-payments");
        let body: Value = serde_json::from_str(&calls[0].2).unwrap();
        assert_eq!(body["policy"], "path \"x\" {}");
        assert_eq!(calls[1].0, "DELETE");
    }

    #[tokio::test]
    async fn test_delete_of_missing_path_is_ok() {
        let (address, _) = spawn_stub().await;
        let vault = client(&address);

        vault
            .delete("aws/roles/argo-cloudops-projects-payments-target-prod-aws")
            .await
            .unwrap();
        vault.delete("aws/roles/never-existed").await.unwrap();
    }

    #[tokio::test]
    async fn test_write_to_missing_path_is_error() {
        let (address, _) = spawn_stub().await;
        let vault = client(&address);

        let err = vault.write("nope/mount", json!({})).await.unwrap_err();
        assert!(matches!(err, BackendError::Rejected { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_error_status_collects_vault_errors() {
        let (address, _) = spawn_stub().await;
        let vault = client(&address);

        match vault.read("broken").await.unwrap_err() {
            BackendError::Rejected { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "internal error, storage sealed");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bad_token_is_rejected() {
        let (address, _) = spawn_stub().await;
        let vault = VaultClient::new(&address, "wrong", Duration::from_secs(5)).unwrap();

        let err = vault.read("aws/roles/x").await.unwrap_err();
        assert!(matches!(err, BackendError::Rejected { status: 403, .. }));
    }

    #[tokio::test]
    async fn test_undecodable_body() {
        let (address, _) = spawn_stub().await;
        let vault = client(&address);

        let err = vault.read("garbage").await.unwrap_err();
        assert!(matches!(err, BackendError::Decode(_)));
    }

    #[tokio::test]
    async fn test_timeout_is_unavailable() {
        let (address, _) = spawn_stub().await;
        let vault = VaultClient::new(&address, ROOT_TOKEN, Duration::from_millis(100)).unwrap();

        let err = vault.read("slow").await.unwrap_err();
        assert!(err.is_unreachable());
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        // Bind then drop to get a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let vault = client(&format!("http://{}", addr));
        let err = vault.read("aws/roles/x").await.unwrap_err();
        assert!(err.is_unreachable());
    }
}
