//! Credential-store seam.
//!
//! Organization provider keys live in an external store; this module
//! defines the [`Credential`] value object, the [`CredentialStore`] trait,
//! and the cacheable record form used by the secure cache.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{ApiKey, CollaboratorConfig};

/// An organization-scoped provider credential.
///
/// Held only for the duration of one request; never persisted by this
/// core beyond the secure cache's bounded TTL.
#[derive(Debug, Clone)]
pub struct Credential {
    pub provider: String,
    pub org_id: String,
    pub api_key: ApiKey,
    pub secret_key: Option<ApiKey>,
    /// Provider-specific settings: region, project id, deployment name...
    pub config: serde_json::Value,
    pub disabled: bool,
}

impl Credential {
    /// Whether this credential can back an attempt.
    pub fn usable(&self) -> bool {
        !self.disabled && !self.api_key.expose_secret().is_empty()
    }

    /// A string config field, e.g. `region` or `project_id`.
    pub fn config_str(&self, field: &str) -> Option<&str> {
        self.config.get(field).and_then(|v| v.as_str())
    }
}

/// Serializable form of a credential for the encrypted cache.
///
/// `ApiKey` deliberately serializes redacted, so the cache stores this
/// plain record instead; the surrounding entry is double-encrypted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub provider: String,
    pub org_id: String,
    pub api_key: String,
    pub secret_key: Option<String>,
    pub config: serde_json::Value,
    pub disabled: bool,
}

impl From<&Credential> for CredentialRecord {
    fn from(credential: &Credential) -> Self {
        CredentialRecord {
            provider: credential.provider.clone(),
            org_id: credential.org_id.clone(),
            api_key: credential.api_key.expose_secret().to_string(),
            secret_key: credential
                .secret_key
                .as_ref()
                .map(|k| k.expose_secret().to_string()),
            config: credential.config.clone(),
            disabled: credential.disabled,
        }
    }
}

impl From<CredentialRecord> for Credential {
    fn from(record: CredentialRecord) -> Self {
        Credential {
            provider: record.provider,
            org_id: record.org_id,
            api_key: ApiKey::from(record.api_key),
            secret_key: record.secret_key.map(ApiKey::from),
            config: record.config,
            disabled: record.disabled,
        }
    }
}

/// Credential-store errors.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
}

/// Read-only view of the organization key store.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// The org's key for a provider+model, or `None` when the org has not
    /// configured one. `custom_uid` selects among multiple keys for the
    /// same provider.
    async fn credential(
        &self,
        provider: &str,
        model: &str,
        org_id: &str,
        custom_uid: Option<&str>,
    ) -> Result<Option<Credential>, CredentialError>;
}

/// HTTP-backed credential store client.
pub struct HttpCredentialStore {
    base_url: String,
    token: Option<ApiKey>,
    client: reqwest::Client,
}

impl HttpCredentialStore {
    pub fn new(config: &CollaboratorConfig, client: reqwest::Client) -> Self {
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            client,
        }
    }
}

#[async_trait]
impl CredentialStore for HttpCredentialStore {
    async fn credential(
        &self,
        provider: &str,
        model: &str,
        org_id: &str,
        custom_uid: Option<&str>,
    ) -> Result<Option<Credential>, CredentialError> {
        let mut request = self
            .client
            .get(format!(
                "{}/v1/orgs/{org_id}/keys/{provider}",
                self.base_url
            ))
            .query(&[("model", model)]);
        if let Some(uid) = custom_uid {
            request = request.query(&[("custom_uid", uid)]);
        }
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| CredentialError::Unavailable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(CredentialError::Unavailable(format!(
                "key store returned {}",
                response.status()
            )));
        }

        let record: CredentialRecord = response
            .json()
            .await
            .map_err(|e| CredentialError::Unavailable(e.to_string()))?;
        Ok(Some(record.into()))
    }
}
