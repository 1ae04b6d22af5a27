//! Shared test fixtures: fake collaborators and app construction.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use switchboard::config::{ApiKey, Config};
use switchboard::credentials::{Credential, CredentialError, CredentialStore};
use switchboard::escrow::{EscrowError, EscrowLedger, EscrowReservation};
use switchboard::proxy::{AppState, AttemptExecutor, Gateway, NoPromptTemplates, PromptTemplates};
use switchboard::registry::{
    Endpoint, ModelRegistry, PricingTier, PtbDeployment, RegistryError, ResponseFormat,
};
use switchboard::router::{AttemptBuilder, DisallowListEntry};

pub const MINIMAL_CONFIG: &str = r#"
    [server]
    listen = "127.0.0.1:0"

    [registry]
    url = "http://registry.test"

    [credentials]
    url = "http://keys.test"

    [escrow]
    url = "http://ledger.test"
"#;

/// In-memory registry fixture.
pub struct FakeRegistry {
    pub entries: Vec<Endpoint>,
}

#[async_trait]
impl ModelRegistry for FakeRegistry {
    async fn entries_for_model(&self, name: &str) -> Result<Vec<Endpoint>, RegistryError> {
        Ok(self
            .entries
            .iter()
            .filter(|e| e.model_id == name)
            .cloned()
            .collect())
    }

    async fn entry_for_model(
        &self,
        name: &str,
        provider: &str,
    ) -> Result<Option<Endpoint>, RegistryError> {
        Ok(self
            .entries
            .iter()
            .find(|e| e.model_id == name && e.provider == provider)
            .cloned())
    }

    fn provider_exists(&self, provider: &str) -> bool {
        self.entries.iter().any(|e| e.provider == provider)
    }
}

/// In-memory credential store: (provider, org_id) -> key.
pub struct FakeCredentials {
    pub keys: HashMap<(String, String), String>,
}

#[async_trait]
impl CredentialStore for FakeCredentials {
    async fn credential(
        &self,
        provider: &str,
        _model: &str,
        org_id: &str,
        _custom_uid: Option<&str>,
    ) -> Result<Option<Credential>, CredentialError> {
        Ok(self
            .keys
            .get(&(provider.to_string(), org_id.to_string()))
            .map(|key| Credential {
                provider: provider.to_string(),
                org_id: org_id.to_string(),
                api_key: ApiKey::from(key.as_str()),
                secret_key: None,
                config: serde_json::Value::Null,
                disabled: false,
            }))
    }
}

/// Ledger fixture that records every reserve/cancel call.
#[derive(Default)]
pub struct RecordingLedger {
    pub reserves: Mutex<Vec<f64>>,
    pub cancels: Mutex<Vec<String>>,
    pub disallow: Vec<DisallowListEntry>,
    /// When set, every reserve fails with an insufficient-credit error.
    pub reject_reserves: bool,
}

#[async_trait]
impl EscrowLedger for RecordingLedger {
    async fn reserve(
        &self,
        _org_id: &str,
        request_id: &str,
        amount: f64,
    ) -> Result<EscrowReservation, EscrowError> {
        if self.reject_reserves {
            return Err(EscrowError::InsufficientCredit(
                "credit limit reached".to_string(),
            ));
        }
        let mut reserves = self.reserves.lock().unwrap();
        reserves.push(amount);
        Ok(EscrowReservation {
            escrow_id: format!("escrow-{request_id}-{}", reserves.len()),
            amount,
        })
    }

    async fn cancel(&self, escrow_id: &str) -> Result<(), EscrowError> {
        self.cancels.lock().unwrap().push(escrow_id.to_string());
        Ok(())
    }

    async fn disallow_list(&self, _org_id: &str) -> Result<Vec<DisallowListEntry>, EscrowError> {
        Ok(self.disallow.clone())
    }
}

/// An OpenAI-format endpoint fixture pointing at a wiremock base URL.
pub fn openai_endpoint(provider: &str, model: &str, base_url: &str, ptb: bool) -> Endpoint {
    Endpoint {
        provider: provider.to_string(),
        model_id: model.to_string(),
        provider_model_id: model.to_string(),
        base_url: format!("{base_url}/v1/chat/completions"),
        pricing: vec![PricingTier {
            input: 0.000002,
            output: 0.00001,
            threshold: None,
        }],
        context_length: 128_000,
        max_completion_tokens: 4096,
        supported_plugins: vec!["web".to_string()],
        response_format: ResponseFormat::OpenAi,
        requires_explicit_routing: false,
        ptb_deployments: if ptb {
            vec![PtbDeployment {
                deployment_id: "main".to_string(),
                base_url: format!("{base_url}/v1/chat/completions"),
                priority: 0,
            }]
        } else {
            vec![]
        },
        priority: 0,
    }
}

/// An Anthropic-format endpoint fixture pointing at a wiremock base URL.
pub fn anthropic_endpoint(model: &str, base_url: &str) -> Endpoint {
    let mut endpoint = openai_endpoint("anthropic", model, base_url, false);
    endpoint.base_url = format!("{base_url}/v1/messages");
    endpoint.response_format = ResponseFormat::Anthropic;
    endpoint
}

pub struct TestApp {
    pub router: axum::Router,
    pub ledger: Arc<RecordingLedger>,
}

/// Wire a full gateway app from fixtures.
pub fn build_app(
    entries: Vec<Endpoint>,
    org_keys: Vec<(&str, &str, &str)>,
    platform_providers: Vec<&str>,
    ledger: RecordingLedger,
) -> TestApp {
    build_app_with_templates(
        entries,
        org_keys,
        platform_providers,
        ledger,
        Arc::new(NoPromptTemplates),
    )
}

pub fn build_app_with_templates(
    entries: Vec<Endpoint>,
    org_keys: Vec<(&str, &str, &str)>,
    platform_providers: Vec<&str>,
    ledger: RecordingLedger,
    templates: Arc<dyn PromptTemplates>,
) -> TestApp {
    let registry = Arc::new(FakeRegistry { entries });
    let credentials = Arc::new(FakeCredentials {
        keys: org_keys
            .into_iter()
            .map(|(provider, org, key)| ((provider.to_string(), org.to_string()), key.to_string()))
            .collect(),
    });
    let ledger = Arc::new(ledger);
    let platform_keys: HashMap<String, ApiKey> = platform_providers
        .into_iter()
        .map(|p| (p.to_string(), ApiKey::from("sk-platform")))
        .collect();

    let http_client = reqwest::Client::new();
    let builder = AttemptBuilder::new(
        registry.clone(),
        credentials,
        None,
        Arc::new(platform_keys),
    );
    let executor = AttemptExecutor::new(http_client, ledger.clone());
    let gateway = Arc::new(Gateway::new(
        registry,
        builder,
        executor,
        ledger.clone(),
        templates,
        HashSet::new(),
    ));

    let state = AppState {
        gateway,
        config: Arc::new(Config::parse_str(MINIMAL_CONFIG).unwrap()),
        db: None,
    };

    TestApp {
        router: switchboard::proxy::create_router(state),
        ledger,
    }
}

/// POST a chat-completion body with the test org header.
pub fn chat_request(body: serde_json::Value) -> http::Request<axum::body::Body> {
    http::Request::post("/v1/chat/completions")
        .header("content-type", "application/json")
        .header("x-switchboard-org", "org-test")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

/// Read a response body as (status, JSON).
pub async fn parse_body(
    response: axum::response::Response,
) -> (http::StatusCode, serde_json::Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
        .await
        .expect("read body");
    let json = serde_json::from_slice(&bytes).unwrap_or_default();
    (status, json)
}
