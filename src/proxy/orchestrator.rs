//! Top-level request orchestration.
//!
//! State machine, terminal on first success or total exhaustion:
//! validate -> expand stored prompt -> build attempts -> filter by the
//! org's disallow list -> try attempts in order -> map or aggregate.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::Value;

use crate::registry::{ModelRegistry, ResponseFormat, UserOverrides};
use crate::router::{
    parse_model_list, AttemptBuilder, AttemptError, AuthMode, BuildContext, DisallowListEntry,
    ErrorKind, Plugin,
};
use crate::escrow::EscrowLedger;

use super::executor::AttemptExecutor;

/// Gateway-reserved body fields, stripped before the body is forwarded.
const GATEWAY_FIELDS: &[&str] = &["prompt_id", "inputs", "plugins", "ignore_providers", "endpoint"];

/// Stored prompt templates, expanded into the call body before routing.
#[async_trait]
pub trait PromptTemplates: Send + Sync {
    /// Merge the stored template `prompt_id` with `inputs` and the caller
    /// body, returning the expanded body. Errors are fatal to the request.
    async fn expand(&self, prompt_id: &str, inputs: &Value, body: &Value)
        -> Result<Value, String>;
}

/// Default collaborator when no template store is wired up.
pub struct NoPromptTemplates;

#[async_trait]
impl PromptTemplates for NoPromptTemplates {
    async fn expand(&self, _prompt_id: &str, _inputs: &Value, _body: &Value) -> Result<Value, String> {
        Err("prompt templates are not configured".to_string())
    }
}

/// The chosen attempt's response plus routing metadata for headers/logs.
pub struct GatewaySuccess {
    pub response: reqwest::Response,
    pub provider: String,
    pub model: String,
    pub auth: AuthMode,
    pub response_format: ResponseFormat,
    /// Attempts consumed, including the successful one.
    pub attempts_tried: usize,
}

/// The single aggregated error returned when no attempt succeeds.
#[derive(Debug)]
pub struct GatewayFailure {
    pub code: &'static str,
    pub message: String,
    pub status_code: u16,
    pub details: Vec<AttemptError>,
}

impl GatewayFailure {
    fn new(code: &'static str, message: impl Into<String>, status_code: u16) -> Self {
        GatewayFailure {
            code,
            message: message.into(),
            status_code,
            details: Vec::new(),
        }
    }
}

impl IntoResponse for GatewayFailure {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = serde_json::json!({
            "code": self.code,
            "message": self.message,
            "statusCode": self.status_code,
            "details": self.details,
        });
        (status, axum::Json(body)).into_response()
    }
}

/// Owns one request's routing run; shared across requests via `Arc`.
pub struct Gateway {
    registry: Arc<dyn ModelRegistry>,
    builder: AttemptBuilder,
    executor: AttemptExecutor,
    escrow: Arc<dyn EscrowLedger>,
    templates: Arc<dyn PromptTemplates>,
    /// Providers globally ignored by deployment config.
    ignore_providers: HashSet<String>,
}

impl Gateway {
    pub fn new(
        registry: Arc<dyn ModelRegistry>,
        builder: AttemptBuilder,
        executor: AttemptExecutor,
        escrow: Arc<dyn EscrowLedger>,
        templates: Arc<dyn PromptTemplates>,
        ignore_providers: HashSet<String>,
    ) -> Self {
        Self {
            registry,
            builder,
            executor,
            escrow,
            templates,
            ignore_providers,
        }
    }

    /// Run the full state machine for one request.
    ///
    /// `body` must already be structured JSON; the model field gate runs
    /// before anything touches the registry or a provider.
    pub async fn run(
        &self,
        org_id: &str,
        request_id: &str,
        mut body: Value,
    ) -> Result<GatewaySuccess, GatewayFailure> {
        let Some(model_field) = body.get("model").and_then(|m| m.as_str()).map(String::from)
        else {
            return Err(GatewayFailure::new(
                "invalid_format",
                "Request body must contain a string 'model' field",
                400,
            ));
        };

        if let Some(prompt_id) = body.get("prompt_id").and_then(|p| p.as_str()).map(String::from) {
            let inputs = body.get("inputs").cloned().unwrap_or(Value::Null);
            body = self
                .templates
                .expand(&prompt_id, &inputs, &body)
                .await
                .map_err(|message| GatewayFailure::new("invalid_prompt", message, 400))?;
        }

        let specs = parse_model_list(&model_field, self.registry.as_ref())
            .map_err(|error| GatewayFailure::new("invalid_format", error.to_string(), 400))?;

        let ctx = self.build_context(org_id, &mut body);
        let attempts = self.builder.build(&specs, &ctx).await;
        if attempts.is_empty() {
            return Err(GatewayFailure::new(
                "model_not_supported",
                format!("No provider available for '{model_field}'"),
                400,
            ));
        }

        let disallow = match self.escrow.disallow_list(org_id).await {
            Ok(list) => list,
            Err(error) => {
                tracing::warn!(org_id = %org_id, error = %error, "Disallow list unavailable");
                Vec::new()
            }
        };

        let mut errors: Vec<AttemptError> = Vec::new();
        let mut tried = 0usize;
        for attempt in &attempts {
            if is_disallowed(&disallow, &attempt.endpoint.provider, &attempt.endpoint.model_id) {
                tracing::info!(source = %attempt.source, "Attempt disallowed for organization");
                errors.push(AttemptError::new(
                    ErrorKind::Disallowed,
                    format!(
                        "Provider '{}' is disallowed for this organization",
                        attempt.endpoint.provider
                    ),
                    400,
                    &attempt.source,
                ));
                continue;
            }

            tried += 1;
            match self.executor.execute(attempt, org_id, request_id, &body).await {
                Ok(response) => {
                    tracing::info!(
                        source = %attempt.source,
                        auth = %attempt.auth.as_str(),
                        "Attempt succeeded"
                    );
                    return Ok(GatewaySuccess {
                        response,
                        provider: attempt.endpoint.provider.clone(),
                        model: attempt.endpoint.model_id.clone(),
                        auth: attempt.auth,
                        response_format: attempt.endpoint.response_format,
                        attempts_tried: tried,
                    });
                }
                Err(error) => {
                    tracing::warn!(
                        source = %attempt.source,
                        kind = %error.kind.as_str(),
                        status = error.status_code,
                        "Attempt failed, falling back"
                    );
                    errors.push(error);
                }
            }
        }

        Err(aggregate_errors(errors))
    }

    /// Extract routing context from gateway-reserved body fields, then
    /// strip them so providers never see them.
    fn build_context(&self, org_id: &str, body: &mut Value) -> BuildContext {
        let mut ignore = self.ignore_providers.clone();
        if let Some(requested) = body.get("ignore_providers").and_then(|v| v.as_array()) {
            ignore.extend(
                requested
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from)),
            );
        }

        let requested_plugins: Vec<Plugin> = body
            .get("plugins")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        let overrides: UserOverrides = body
            .get("endpoint")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        if let Some(object) = body.as_object_mut() {
            for field in GATEWAY_FIELDS {
                object.remove(*field);
            }
        }

        BuildContext {
            org_id: org_id.to_string(),
            ignore_providers: ignore,
            requested_plugins,
            overrides,
        }
    }
}

fn is_disallowed(list: &[DisallowListEntry], provider: &str, model: &str) -> bool {
    list.iter().any(|entry| entry.matches(provider, model))
}

/// Collapse per-attempt errors into one deterministic response.
///
/// The most actionable condition dominates: rate/credit pressure first,
/// then authentication, then an upstream 403 verbatim, then the
/// all-disallowed case, then a generic failure.
fn aggregate_errors(errors: Vec<AttemptError>) -> GatewayFailure {
    let rate_limited = errors.iter().any(|e| {
        matches!(
            e.kind,
            ErrorKind::RateLimited | ErrorKind::InsufficientCreditLimit
        ) || e.status_code == 429
    });
    if rate_limited {
        return GatewayFailure {
            code: "rate_limited",
            message: "Rate limited or out of credit on every available provider".to_string(),
            status_code: 429,
            details: errors,
        };
    }

    if errors.iter().any(|e| e.status_code == 401) {
        return GatewayFailure {
            code: "authentication_failed",
            message: "Provider rejected the configured credentials".to_string(),
            status_code: 401,
            details: errors,
        };
    }

    if let Some(forbidden) = errors.iter().find(|e| e.status_code == 403) {
        return GatewayFailure {
            code: "forbidden",
            message: forbidden.message.clone(),
            status_code: 403,
            details: errors,
        };
    }

    if !errors.is_empty() && errors.iter().all(|e| e.kind == ErrorKind::Disallowed) {
        return GatewayFailure {
            code: "billing_disabled",
            message: "Billing is disabled for every requested provider/model".to_string(),
            status_code: 400,
            details: errors,
        };
    }

    GatewayFailure {
        code: "all_attempts_failed",
        message: "All provider attempts failed".to_string(),
        status_code: 500,
        details: errors,
    }
}
