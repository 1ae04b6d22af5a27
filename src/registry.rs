//! Capability-registry seam.
//!
//! The registry itself is an external service; this module defines the
//! value objects it hands back ([`Endpoint`], [`PricingTier`],
//! [`PtbDeployment`]) and the [`ModelRegistry`] trait the attempt builder
//! consumes. A thin HTTP-backed implementation is provided for production;
//! tests inject their own.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::CollaboratorConfig;

/// Wire format an endpoint natively speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    OpenAi,
    Anthropic,
}

/// One pricing tier: USD per token for input and output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingTier {
    pub input: f64,
    pub output: f64,
    /// Token-volume breakpoint where this tier begins, if the provider
    /// prices by volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u64>,
}

/// A platform-funded deployment of an endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PtbDeployment {
    pub deployment_id: String,
    pub base_url: String,
    #[serde(default)]
    pub priority: i32,
}

/// Registry value object describing one provider+model deployment.
///
/// Owned by the registry; attempts hold a clone and never mutate it in
/// place (a patched copy is taken when user overrides apply).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub provider: String,
    /// The logical model id callers use.
    pub model_id: String,
    /// The id the provider itself expects in request bodies.
    pub provider_model_id: String,
    /// Base URL template; may contain `{region}` / `{project_id}` slots
    /// filled from the credential's config blob.
    pub base_url: String,
    #[serde(default)]
    pub pricing: Vec<PricingTier>,
    #[serde(default)]
    pub context_length: u64,
    #[serde(default)]
    pub max_completion_tokens: u64,
    #[serde(default)]
    pub supported_plugins: Vec<String>,
    #[serde(default)]
    pub response_format: ResponseFormat,
    /// Entries flagged here are skipped by auto-routing and only reachable
    /// with an explicit `model/provider` token.
    #[serde(default)]
    pub requires_explicit_routing: bool,
    /// Platform-funded deployments; empty means BYOK-only.
    #[serde(default)]
    pub ptb_deployments: Vec<PtbDeployment>,
    /// Ranking weight; higher sorts earlier.
    #[serde(default)]
    pub priority: i32,
}

/// Caller-supplied endpoint configuration patches.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserOverrides {
    pub base_url: Option<String>,
    pub provider_model_id: Option<String>,
}

impl Endpoint {
    /// Apply caller overrides, returning a patched copy.
    pub fn with_overrides(&self, overrides: &UserOverrides) -> Endpoint {
        let mut patched = self.clone();
        if let Some(url) = &overrides.base_url {
            patched.base_url = url.clone();
        }
        if let Some(id) = &overrides.provider_model_id {
            patched.provider_model_id = id.clone();
        }
        patched
    }

    /// Dynamic endpoint for a model the registry does not know.
    ///
    /// No pricing, no limits, no platform deployments: only the caller's
    /// own key can drive it, and cost admission is impossible.
    pub fn passthrough(model: &str, provider: &str, overrides: &UserOverrides) -> Endpoint {
        Endpoint {
            provider: provider.to_string(),
            model_id: model.to_string(),
            provider_model_id: overrides
                .provider_model_id
                .clone()
                .unwrap_or_else(|| model.to_string()),
            base_url: overrides.base_url.clone().unwrap_or_default(),
            pricing: Vec::new(),
            context_length: 0,
            max_completion_tokens: 0,
            supported_plugins: Vec::new(),
            response_format: ResponseFormat::OpenAi,
            requires_explicit_routing: false,
            ptb_deployments: Vec::new(),
            priority: 0,
        }
    }
}

/// Registry lookup errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

/// Read-only view of the capability registry.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// All capability entries for a model name, across providers.
    async fn entries_for_model(&self, name: &str) -> Result<Vec<Endpoint>, RegistryError>;

    /// The single entry for an explicit provider+model pair, if registered.
    async fn entry_for_model(
        &self,
        name: &str,
        provider: &str,
    ) -> Result<Option<Endpoint>, RegistryError>;

    /// Whether a provider id is known at all. Used to validate explicit
    /// `model/provider` tokens before any endpoint lookup.
    fn provider_exists(&self, provider: &str) -> bool;
}

/// HTTP-backed registry client.
pub struct HttpRegistry {
    base_url: String,
    client: reqwest::Client,
    providers: Vec<String>,
}

impl HttpRegistry {
    /// Build a registry client; `providers` is the known-provider set,
    /// fetched once at startup.
    pub fn new(config: &CollaboratorConfig, client: reqwest::Client, providers: Vec<String>) -> Self {
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            client,
            providers,
        }
    }

    /// GET a registry path; an unknown model/provider is a `None`, not an
    /// error, so the passthrough fallback can engage.
    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, RegistryError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(RegistryError::Unavailable(format!(
                "registry returned {} for {}",
                response.status(),
                path
            )));
        }
        response
            .json()
            .await
            .map(Some)
            .map_err(|e| RegistryError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl ModelRegistry for HttpRegistry {
    async fn entries_for_model(&self, name: &str) -> Result<Vec<Endpoint>, RegistryError> {
        Ok(self
            .fetch(&format!("/v1/models/{name}/endpoints"))
            .await?
            .unwrap_or_default())
    }

    async fn entry_for_model(
        &self,
        name: &str,
        provider: &str,
    ) -> Result<Option<Endpoint>, RegistryError> {
        self.fetch(&format!("/v1/models/{name}/endpoints/{provider}"))
            .await
    }

    fn provider_exists(&self, provider: &str) -> bool {
        self.providers.iter().any(|p| p == provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_endpoint() -> Endpoint {
        Endpoint {
            provider: "anthropic".to_string(),
            model_id: "claude-3-5-sonnet-20241022".to_string(),
            provider_model_id: "claude-3-5-sonnet-20241022".to_string(),
            base_url: "https://api.anthropic.com/v1/messages".to_string(),
            pricing: vec![PricingTier {
                input: 0.000003,
                output: 0.000015,
                threshold: None,
            }],
            context_length: 200_000,
            max_completion_tokens: 8192,
            supported_plugins: vec!["web".to_string()],
            response_format: ResponseFormat::Anthropic,
            requires_explicit_routing: false,
            ptb_deployments: vec![],
            priority: 0,
        }
    }

    #[test]
    fn overrides_patch_a_copy() {
        let endpoint = sample_endpoint();
        let overrides = UserOverrides {
            base_url: Some("https://proxy.internal/v1".to_string()),
            provider_model_id: None,
        };
        let patched = endpoint.with_overrides(&overrides);
        assert_eq!(patched.base_url, "https://proxy.internal/v1");
        assert_eq!(endpoint.base_url, "https://api.anthropic.com/v1/messages");
    }

    #[test]
    fn passthrough_has_no_pricing_or_deployments() {
        let endpoint = Endpoint::passthrough("my-finetune", "openai", &UserOverrides::default());
        assert!(endpoint.pricing.is_empty());
        assert!(endpoint.ptb_deployments.is_empty());
        assert_eq!(endpoint.provider_model_id, "my-finetune");
    }
}
