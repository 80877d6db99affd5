// Vault module - fetches per-datacenter kubeconfigs from HashiCorp Vault
//
// Authenticates with AppRole, then reads KV v2 secrets laid out as
// <secret_path>/<environment>/<datacenter> with the kubeconfig under `config`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

/// Key inside each secret that holds the kubeconfig document
pub const KUBECONFIG_KEY: &str = "config";

/// Errors raised while talking to Vault
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Vault request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Vault returned HTTP {status} for {path}")]
    Status { status: StatusCode, path: String },

    #[error("invalid Vault path '{0}'")]
    InvalidPath(String),

    #[error("secret {path} has no key '{key}', check the secret key")]
    MissingKey { path: String, key: String },

    #[error("malformed Vault response for {path}: {reason}")]
    Malformed { path: String, reason: String },
}

/// Read access to secrets.
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Reads `key` from the secret at `path`.
    ///
    /// # Returns
    /// * `Ok(Some(bytes))` - The value
    /// * `Ok(None)` - No secret exists at `path`
    async fn read_secret(&self, path: &str, key: &str) -> Result<Option<Vec<u8>>, VaultError>;
}

/// Authenticated Vault client
pub struct VaultClient {
    http_client: Client,
    address: Url,
    token: String,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    auth: LoginAuth,
}

#[derive(Debug, Deserialize)]
struct LoginAuth {
    client_token: String,
}

impl VaultClient {
    /// Logs in with AppRole credentials and keeps the issued token.
    ///
    /// # Arguments
    /// * `address` - Vault root URL, e.g. `https://vault.example.com`
    /// * `role_id` / `secret_id` - AppRole credentials
    /// * `timeout` - Per-request timeout
    pub async fn login(
        address: &Url,
        role_id: &str,
        secret_id: &str,
        timeout: Duration,
    ) -> Result<Self, VaultError> {
        let http_client = Client::builder().timeout(timeout).build()?;
        let path = "auth/approle/login";
        let url = endpoint(address, path)?;

        let response = http_client
            .post(url)
            .json(&json!({ "role_id": role_id, "secret_id": secret_id }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(VaultError::Status {
                status: response.status(),
                path: path.to_string(),
            });
        }

        let login: LoginResponse = response.json().await?;
        info!("Authenticated in Vault");

        Ok(VaultClient {
            http_client,
            address: address.clone(),
            token: login.auth.client_token,
        })
    }
}

#[async_trait]
impl SecretSource for VaultClient {
    async fn read_secret(&self, path: &str, key: &str) -> Result<Option<Vec<u8>>, VaultError> {
        debug!(path, "Reading secret");
        let url = endpoint(&self.address, path)?;

        let response = self
            .http_client
            .get(url)
            .header("X-Vault-Token", &self.token)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body: Value = response.json().await?;
                extract_value(&body, path, key).map(Some)
            }
            status => Err(VaultError::Status {
                status,
                path: path.to_string(),
            }),
        }
    }
}

fn endpoint(address: &Url, path: &str) -> Result<Url, VaultError> {
    address
        .join(&format!("v1/{}", path.trim_start_matches('/')))
        .map_err(|_| VaultError::InvalidPath(path.to_string()))
}

/// Pulls `data.data.<key>` out of a KV v2 read response.
///
/// String values are returned as-is; anything else is re-encoded as JSON.
fn extract_value(body: &Value, path: &str, key: &str) -> Result<Vec<u8>, VaultError> {
    let data = body
        .get("data")
        .and_then(|data| data.get("data"))
        .and_then(Value::as_object)
        .ok_or_else(|| VaultError::Malformed {
            path: path.to_string(),
            reason: "missing data.data object".to_string(),
        })?;

    match data.get(key) {
        Some(Value::String(value)) => Ok(value.clone().into_bytes()),
        Some(other) => Ok(other.to_string().into_bytes()),
        None => Err(VaultError::MissingKey {
            path: path.to_string(),
            key: key.to_string(),
        }),
    }
}

/// Kubeconfig of one datacenter
#[derive(Debug, Clone)]
pub struct ClusterCredentials {
    pub datacenter: String,
    pub kubeconfig: Vec<u8>,
}

/// Looks up the kubeconfig of every datacenter.
///
/// Environments are tried in order and a later hit replaces an earlier one.
/// Datacenters with no kubeconfig in any environment are skipped with a
/// warning.
pub async fn resolve_kubeconfigs<S: SecretSource + ?Sized>(
    source: &S,
    secret_path: &str,
    environments: &[String],
    datacenters: &[String],
) -> Result<Vec<ClusterCredentials>, VaultError> {
    let mut resolved = Vec::with_capacity(datacenters.len());

    for datacenter in datacenters {
        let mut kubeconfig = None;
        for environment in environments {
            let path = format!(
                "{}/{}/{}",
                secret_path.trim_end_matches('/'),
                environment,
                datacenter
            );
            debug!("I will read secrets from {}", path);
            if let Some(config) = source.read_secret(&path, KUBECONFIG_KEY).await? {
                kubeconfig = Some(config);
            }
        }

        match kubeconfig {
            Some(kubeconfig) => resolved.push(ClusterCredentials {
                datacenter: datacenter.clone(),
                kubeconfig,
            }),
            None => warn!("Cannot find config for {}, skipping it", datacenter),
        }
    }

    Ok(resolved)
}
