//! In-Memory Backend
//!
//! Emulates the slice of Vault the credential provider relies on: generic
//! path storage, ACL policies, AppRole role/secret IDs with `force`
//! regeneration, and AppRole login issuing use-limited, expiring tokens.
//! Nothing is persisted; every instance starts empty.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use super::{BackendError, Secret, SecretAuth, SecretBackend};
use crate::naming::{APPROLE_LOGIN_PATH, APPROLE_ROLE_PREFIX};

#[derive(Debug)]
struct AppRole {
    role_id: String,
    config: Map<String, Value>,
    /// secret ID -> expiry (`None` never expires)
    secret_ids: HashMap<String, Option<Instant>>,
}

#[derive(Debug)]
struct IssuedToken {
    policies: Vec<String>,
    /// 0 means unlimited
    remaining_uses: u32,
    limited: bool,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<String, Map<String, Value>>,
    policies: BTreeMap<String, String>,
    approles: BTreeMap<String, AppRole>,
    tokens: HashMap<String, IssuedToken>,
    failures: HashSet<(&'static str, String)>,
}

/// Vault emulation held entirely in process memory
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: Mutex<State>,
}

/// What happened when a client token was presented
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenUse {
    /// Accepted; carries the token's policies
    Accepted(Vec<String>),
    /// Use count exhausted
    Exhausted,
    Expired,
    Unknown,
}

enum ApproleTarget<'a> {
    Role(&'a str),
    RoleId(&'a str),
    SecretId(&'a str),
}

fn approle_target(path: &str) -> Option<ApproleTarget<'_>> {
    let rest = path
        .strip_prefix(APPROLE_ROLE_PREFIX)?
        .strip_prefix('/')?;
    match rest.split_once('/') {
        None if !rest.is_empty() => Some(ApproleTarget::Role(rest)),
        Some((name, "role-id")) => Some(ApproleTarget::RoleId(name)),
        Some((name, "secret-id")) => Some(ApproleTarget::SecretId(name)),
        _ => None,
    }
}

/// Parses Vault duration values: integer seconds or `"<n>s|m|h"`.
fn parse_ttl(value: Option<&Value>) -> Option<Duration> {
    let secs = match value? {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => {
            let s = s.trim();
            let (digits, unit) = match s.char_indices().last()? {
                (i, c) if c.is_ascii_alphabetic() => (&s[..i], c),
                _ => (s, 's'),
            };
            let n: u64 = digits.parse().ok()?;
            let scale = match unit {
                's' => 1,
                'm' => 60,
                'h' => 3600,
                'd' => 86400,
                _ => return None,
            };
            n.checked_mul(scale)?
        }
        _ => return None,
    };
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn parse_u32(value: Option<&Value>) -> u32 {
    match value {
        Some(Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()).unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn parse_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn parse_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    }
}

fn as_map(data: Value) -> Map<String, Value> {
    match data {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn rejected(status: u16, message: impl Into<String>) -> BackendError {
    BackendError::Rejected {
        status,
        message: message.into(),
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means another test thread panicked mid-call
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_failure(&self, state: &State, operation: &'static str, path: &str) -> Result<(), BackendError> {
        if state.failures.contains(&(operation, path.to_string())) {
            return Err(BackendError::Unavailable(format!(
                "injected failure: {} {}",
                operation, path
            )));
        }
        Ok(())
    }

    /// Makes every subsequent `operation` on `path` fail as unreachable.
    ///
    /// `operation` is one of `read`, `write`, `delete`, `list`,
    /// `put_policy`, `delete_policy`.
    pub fn inject_failure(&self, operation: &'static str, path: impl Into<String>) {
        self.lock().failures.insert((operation, path.into()));
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn policy(&self, name: &str) -> Option<String> {
        self.lock().policies.get(name).cloned()
    }

    pub fn has_approle(&self, name: &str) -> bool {
        self.lock().approles.contains_key(name)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lock().entries.contains_key(path.trim_start_matches('/'))
    }

    /// Stores raw data at `path`, bypassing any emulation.
    pub fn seed(&self, path: &str, data: Value) {
        self.lock()
            .entries
            .insert(path.trim_start_matches('/').to_string(), as_map(data));
    }

    /// Tokens currently held, expired or not.
    pub fn token_count(&self) -> usize {
        self.lock().tokens.len()
    }

    /// Presents a client token, consuming one use.
    pub fn use_token(&self, token: &str) -> TokenUse {
        let mut state = self.lock();
        let Some(issued) = state.tokens.get_mut(token) else {
            return TokenUse::Unknown;
        };
        if issued.expires_at.is_some_and(|at| Instant::now() >= at) {
            state.tokens.remove(token);
            return TokenUse::Expired;
        }
        if issued.limited {
            if issued.remaining_uses == 0 {
                return TokenUse::Exhausted;
            }
            issued.remaining_uses -= 1;
        }
        TokenUse::Accepted(issued.policies.clone())
    }

    fn write_approle(state: &mut State, name: &str, data: Map<String, Value>) {
        match state.approles.get_mut(name) {
            Some(role) => role.config = data,
            None => {
                state.approles.insert(
                    name.to_string(),
                    AppRole {
                        role_id: Uuid::new_v4().to_string(),
                        config: data,
                        secret_ids: HashMap::new(),
                    },
                );
            }
        }
    }

    fn generate_secret_id(state: &mut State, name: &str, data: &Map<String, Value>) -> Result<Secret, BackendError> {
        let role = state
            .approles
            .get_mut(name)
            .ok_or_else(|| rejected(400, format!("role \"{}\" does not exist", name)))?;

        if parse_bool(data.get("force")) {
            role.secret_ids.clear();
        }

        let secret_id = Uuid::new_v4().to_string();
        let ttl = parse_ttl(role.config.get("secret_id_ttl"));
        role.secret_ids
            .insert(secret_id.clone(), ttl.map(|ttl| Instant::now() + ttl));

        let mut out = Map::new();
        out.insert("secret_id".into(), json!(secret_id));
        out.insert("secret_id_accessor".into(), json!(Uuid::new_v4().to_string()));
        out.insert(
            "secret_id_ttl".into(),
            json!(ttl.map(|d| d.as_secs()).unwrap_or(0)),
        );
        Ok(Secret::from_data(out))
    }

    fn login(state: &mut State, data: &Map<String, Value>) -> Result<Secret, BackendError> {
        let role_id = data.get("role_id").and_then(Value::as_str).unwrap_or_default();
        let secret_id = data
            .get("secret_id")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let now = Instant::now();
        let role = state
            .approles
            .values_mut()
            .find(|role| role.role_id == role_id)
            .ok_or_else(|| rejected(400, "invalid role or secret ID"))?;

        match role.secret_ids.get(secret_id) {
            Some(None) => {}
            Some(Some(expiry)) if *expiry > now => {}
            Some(Some(_)) => {
                role.secret_ids.remove(secret_id);
                return Err(rejected(400, "invalid role or secret ID"));
            }
            None => return Err(rejected(400, "invalid role or secret ID")),
        }

        let mut policies = parse_list(role.config.get("token_policies"));
        if !parse_bool(role.config.get("token_no_default_policy")) {
            policies.insert(0, "default".to_string());
        }
        let num_uses = parse_u32(role.config.get("token_num_uses"));
        let ttl = parse_ttl(role.config.get("token_max_ttl"));

        state
            .tokens
            .retain(|_, token| token.expires_at.map_or(true, |at| at > now));

        let client_token = format!("hvs.{}", Uuid::new_v4().simple());
        state.tokens.insert(
            client_token.clone(),
            IssuedToken {
                policies: policies.clone(),
                remaining_uses: num_uses,
                limited: num_uses > 0,
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );

        Ok(Secret {
            data: None,
            auth: Some(SecretAuth {
                client_token,
                accessor: Uuid::new_v4().to_string(),
                policies,
                lease_duration: ttl.map(|d| d.as_secs()).unwrap_or(0),
                renewable: true,
                num_uses,
            }),
        })
    }
}

#[async_trait]
impl SecretBackend for InMemoryBackend {
    async fn read(&self, path: &str) -> Result<Option<Secret>, BackendError> {
        let path = path.trim_start_matches('/');
        let state = self.lock();
        self.check_failure(&state, "read", path)?;
        debug!(path = %path, "memory read");

        let secret = match approle_target(path) {
            Some(ApproleTarget::Role(name)) => state
                .approles
                .get(name)
                .map(|role| Secret::from_data(role.config.clone())),
            Some(ApproleTarget::RoleId(name)) => state.approles.get(name).map(|role| {
                let mut data = Map::new();
                data.insert("role_id".into(), json!(role.role_id));
                Secret::from_data(data)
            }),
            Some(ApproleTarget::SecretId(_)) => None,
            None => state.entries.get(path).cloned().map(Secret::from_data),
        };
        Ok(secret)
    }

    async fn write(&self, path: &str, data: Value) -> Result<Option<Secret>, BackendError> {
        let path = path.trim_start_matches('/');
        let mut state = self.lock();
        self.check_failure(&state, "write", path)?;
        debug!(path = %path, "memory write");

        let data = as_map(data);
        if path == APPROLE_LOGIN_PATH {
            return Self::login(&mut state, &data).map(Some);
        }
        match approle_target(path) {
            Some(ApproleTarget::Role(name)) => {
                Self::write_approle(&mut state, name, data);
                Ok(None)
            }
            Some(ApproleTarget::SecretId(name)) => {
                Self::generate_secret_id(&mut state, name, &data).map(Some)
            }
            Some(ApproleTarget::RoleId(_)) => Err(rejected(405, "role-id is read-only here")),
            None => {
                state.entries.insert(path.to_string(), data);
                Ok(None)
            }
        }
    }

    async fn delete(&self, path: &str) -> Result<(), BackendError> {
        let path = path.trim_start_matches('/');
        let mut state = self.lock();
        self.check_failure(&state, "delete", path)?;
        debug!(path = %path, "memory delete");

        match approle_target(path) {
            Some(ApproleTarget::Role(name)) => {
                state.approles.remove(name);
            }
            _ => {
                state.entries.remove(path);
            }
        }
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Option<Secret>, BackendError> {
        let path = path.trim_start_matches('/');
        let state = self.lock();
        self.check_failure(&state, "list", path)?;
        debug!(path = %path, "memory list");

        let dir = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{}/", path)
        };

        let mut keys: Vec<String> = Vec::new();
        for key in state.entries.keys() {
            if let Some(rest) = key.strip_prefix(&dir) {
                let child = match rest.split_once('/') {
                    Some((head, _)) => format!("{}/", head),
                    None => rest.to_string(),
                };
                if !child.is_empty() && keys.last() != Some(&child) {
                    keys.push(child);
                }
            }
        }

        if keys.is_empty() {
            return Ok(None);
        }
        let mut data = Map::new();
        data.insert("keys".into(), json!(keys));
        Ok(Some(Secret::from_data(data)))
    }

    async fn put_policy(&self, name: &str, rules: &str) -> Result<(), BackendError> {
        let mut state = self.lock();
        self.check_failure(&state, "put_policy", name)?;
        debug!(policy = %name, "memory put policy");
        state.policies.insert(name.to_string(), rules.to_string());
        Ok(())
    }

    async fn delete_policy(&self, name: &str) -> Result<(), BackendError> {
        let mut state = self.lock();
        self.check_failure(&state, "delete_policy", name)?;
        debug!(policy = %name, "memory delete policy");
        state.policies.remove(name);
        Ok(())
    }
}
