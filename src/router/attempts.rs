//! Attempt construction.
//!
//! For each parsed [`ModelSpec`] this builds the ordered candidate list
//! the executor walks: at most one BYOK attempt per provider (the org's
//! own key) plus one PTB attempt per platform-funded deployment.
//! Candidates for one model sort by descending priority with BYOK ahead
//! of PTB on ties; order *across* models is the caller's token order and
//! is never reshuffled.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::{join, join_all};

use crate::cache::SecureKeyCache;
use crate::config::ApiKey;
use crate::credentials::{Credential, CredentialRecord, CredentialStore};
use crate::registry::{Endpoint, ModelRegistry, UserOverrides};

use super::plugins::negotiate_plugins;
use super::spec::ModelSpec;
use super::types::{Attempt, AuthMode, Plugin};

/// Sentinel org id for the platform's own credentials.
const PLATFORM_ORG: &str = "platform";

/// Per-request inputs to attempt construction.
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    pub org_id: String,
    /// Providers the caller asked to skip entirely.
    pub ignore_providers: HashSet<String>,
    pub requested_plugins: Vec<Plugin>,
    pub overrides: UserOverrides,
}

/// Builds the fallback plan for a request.
pub struct AttemptBuilder {
    registry: Arc<dyn ModelRegistry>,
    credentials: Arc<dyn CredentialStore>,
    cache: Option<Arc<SecureKeyCache>>,
    platform_keys: Arc<HashMap<String, ApiKey>>,
}

impl AttemptBuilder {
    pub fn new(
        registry: Arc<dyn ModelRegistry>,
        credentials: Arc<dyn CredentialStore>,
        cache: Option<Arc<SecureKeyCache>>,
        platform_keys: Arc<HashMap<String, ApiKey>>,
    ) -> Self {
        Self {
            registry,
            credentials,
            cache,
            platform_keys,
        }
    }

    /// Expand parsed specs into the ordered attempt list.
    ///
    /// Specs are expanded concurrently but concatenated in token order.
    /// The ignore filter is re-applied to the whole list at the end; the
    /// explicit-provider path does not apply it during construction.
    pub async fn build(&self, specs: &[ModelSpec], ctx: &BuildContext) -> Vec<Attempt> {
        let per_spec = join_all(specs.iter().map(|spec| self.build_for_spec(spec, ctx))).await;

        let mut attempts: Vec<Attempt> = per_spec.into_iter().flatten().collect();
        attempts.retain(|attempt| !ctx.ignore_providers.contains(&attempt.endpoint.provider));
        attempts
    }

    async fn build_for_spec(&self, spec: &ModelSpec, ctx: &BuildContext) -> Vec<Attempt> {
        let mut attempts = match &spec.provider {
            Some(provider) => self.build_explicit(spec, provider, ctx).await,
            None => self.build_auto(spec, ctx).await,
        };
        sort_attempts(&mut attempts);
        attempts
    }

    /// Explicit `model/provider` token: one registry entry, BYOK + PTB.
    async fn build_explicit(
        &self,
        spec: &ModelSpec,
        provider: &str,
        ctx: &BuildContext,
    ) -> Vec<Attempt> {
        let entry = match self.registry.entry_for_model(&spec.model_name, provider).await {
            Ok(entry) => entry,
            Err(error) => {
                tracing::error!(
                    model = %spec.model_name,
                    provider = %provider,
                    error = %error,
                    "Registry lookup failed"
                );
                return Vec::new();
            }
        };

        match entry {
            Some(endpoint) => {
                // Credential fetch and deployment expansion are independent.
                let (byok, ptb) = join(
                    self.byok_attempt(spec, &endpoint, ctx),
                    self.ptb_attempts(spec, &endpoint, ctx),
                )
                .await;
                byok.into_iter().chain(ptb).collect()
            }
            None => {
                // Unknown model with an explicit provider: dynamic passthrough
                // on the caller's own key. No PTB is possible without pricing.
                let endpoint = Endpoint::passthrough(&spec.model_name, provider, &ctx.overrides);
                self.byok_attempt(spec, &endpoint, ctx)
                    .await
                    .into_iter()
                    .collect()
            }
        }
    }

    /// Auto-routed token: every registered provider, fanned out.
    async fn build_auto(&self, spec: &ModelSpec, ctx: &BuildContext) -> Vec<Attempt> {
        let entries = match self.registry.entries_for_model(&spec.model_name).await {
            Ok(entries) => entries,
            Err(error) => {
                tracing::error!(model = %spec.model_name, error = %error, "Registry lookup failed");
                return Vec::new();
            }
        };

        let candidates: Vec<Endpoint> = entries
            .into_iter()
            .filter(|e| !e.requires_explicit_routing)
            .filter(|e| !ctx.ignore_providers.contains(&e.provider))
            .collect();

        let per_endpoint = join_all(candidates.iter().map(|endpoint| async {
            let (byok, ptb) = join(
                self.byok_attempt(spec, endpoint, ctx),
                self.ptb_attempts(spec, endpoint, ctx),
            )
            .await;
            byok.into_iter().chain(ptb).collect::<Vec<_>>()
        }))
        .await;

        per_endpoint.into_iter().flatten().collect()
    }

    /// At most one BYOK attempt: requires a usable org credential.
    /// Absence is a quiet skip, not an error.
    async fn byok_attempt(
        &self,
        spec: &ModelSpec,
        endpoint: &Endpoint,
        ctx: &BuildContext,
    ) -> Option<Attempt> {
        let credential = self
            .org_credential(
                &endpoint.provider,
                &spec.model_name,
                &ctx.org_id,
                spec.custom_uid.as_deref(),
            )
            .await?;
        if !credential.usable() {
            tracing::debug!(
                provider = %endpoint.provider,
                model = %spec.model_name,
                "Org credential disabled, skipping BYOK attempt"
            );
            return None;
        }

        let endpoint = endpoint.with_overrides(&ctx.overrides);
        let plugins = negotiate_plugins(spec, &endpoint.supported_plugins, &ctx.requested_plugins);
        let source = format!("{}/{}/byok", endpoint.provider, spec.model_name);
        Some(Attempt {
            priority: endpoint.priority,
            credential,
            auth: AuthMode::Byok,
            source,
            plugins,
            endpoint,
        })
    }

    /// One PTB attempt per platform-funded deployment.
    ///
    /// A missing platform credential is a configuration problem: logged,
    /// never surfaced to the caller.
    async fn ptb_attempts(
        &self,
        spec: &ModelSpec,
        endpoint: &Endpoint,
        ctx: &BuildContext,
    ) -> Vec<Attempt> {
        if endpoint.ptb_deployments.is_empty() {
            return Vec::new();
        }

        let Some(platform_key) = self.platform_keys.get(&endpoint.provider) else {
            tracing::error!(
                provider = %endpoint.provider,
                model = %spec.model_name,
                "No platform credential for provider with PTB deployments"
            );
            return Vec::new();
        };

        let credential = Credential {
            provider: endpoint.provider.clone(),
            org_id: PLATFORM_ORG.to_string(),
            api_key: platform_key.clone(),
            secret_key: None,
            config: serde_json::Value::Null,
            disabled: false,
        };

        endpoint
            .ptb_deployments
            .iter()
            .map(|deployment| {
                let mut deployed = endpoint.with_overrides(&ctx.overrides);
                deployed.base_url = deployment.base_url.clone();
                let plugins =
                    negotiate_plugins(spec, &deployed.supported_plugins, &ctx.requested_plugins);
                let source = format!(
                    "{}/{}/ptb:{}",
                    deployed.provider, spec.model_name, deployment.deployment_id
                );
                Attempt {
                    priority: deployment.priority,
                    credential: credential.clone(),
                    auth: AuthMode::Ptb,
                    source,
                    plugins,
                    endpoint: deployed,
                }
            })
            .collect()
    }

    /// Org credential lookup through the secure cache.
    async fn org_credential(
        &self,
        provider: &str,
        model: &str,
        org_id: &str,
        custom_uid: Option<&str>,
    ) -> Option<Credential> {
        let cache_key = format!(
            "credential:{org_id}:{provider}:{model}:{}",
            custom_uid.unwrap_or("")
        );

        if let Some(cache) = &self.cache {
            if let Some(record) = cache.get_json::<CredentialRecord>(&cache_key).await {
                return Some(record.into());
            }
        }

        match self
            .credentials
            .credential(provider, model, org_id, custom_uid)
            .await
        {
            Ok(Some(credential)) => {
                if let Some(cache) = &self.cache {
                    cache
                        .put_json(&cache_key, &CredentialRecord::from(&credential))
                        .await;
                }
                Some(credential)
            }
            Ok(None) => {
                tracing::debug!(
                    provider = %provider,
                    model = %model,
                    "No org credential configured, skipping BYOK"
                );
                None
            }
            Err(error) => {
                tracing::warn!(
                    provider = %provider,
                    model = %model,
                    error = %error,
                    "Credential store lookup failed, skipping BYOK"
                );
                None
            }
        }
    }
}

/// Descending priority, BYOK before PTB on ties. Stable, so registry
/// order survives for fully equal candidates.
fn sort_attempts(attempts: &mut [Attempt]) {
    attempts.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.auth.rank().cmp(&b.auth.rank()))
    });
}
