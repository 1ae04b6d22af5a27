//! Single-attempt execution.
//!
//! Runs exactly one attempt against an already-parsed request body and
//! returns either the provider's response or a structured
//! [`AttemptError`]; nothing escapes this boundary. Metered (PTB)
//! attempts reserve an escrow hold first and schedule its cancellation
//! off the critical path whenever the attempt fails afterwards.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::escrow::{EscrowError, EscrowLedger, EscrowReservation};
use crate::mapper;
use crate::proxy::types::ensure_stream_options;
use crate::registry::{Endpoint, ResponseFormat};
use crate::router::{Attempt, AttemptError, AuthMode, ErrorKind};

/// Region slot default when the credential config carries none.
const DEFAULT_REGION: &str = "us-west-1";

pub struct AttemptExecutor {
    http: reqwest::Client,
    escrow: Arc<dyn EscrowLedger>,
}

impl AttemptExecutor {
    pub fn new(http: reqwest::Client, escrow: Arc<dyn EscrowLedger>) -> Self {
        Self { http, escrow }
    }

    /// Execute one attempt.
    ///
    /// On a PTB attempt the escrow hold is reserved before any money can
    /// be spent; if the outbound call then fails, cancellation is
    /// dispatched fire-and-forget so fallback to the next attempt is not
    /// blocked on the ledger.
    pub async fn execute(
        &self,
        attempt: &Attempt,
        org_id: &str,
        request_id: &str,
        body: &Value,
    ) -> Result<reqwest::Response, AttemptError> {
        let mut reservation: Option<EscrowReservation> = None;

        if attempt.auth == AuthMode::Ptb {
            reservation = Some(self.reserve(attempt, org_id, request_id).await?);
        }

        let result = self.forward(attempt, body).await;

        if result.is_err() {
            if let Some(reservation) = reservation {
                self.spawn_cancel(reservation);
            }
        }
        result
    }

    async fn reserve(
        &self,
        attempt: &Attempt,
        org_id: &str,
        request_id: &str,
    ) -> Result<EscrowReservation, AttemptError> {
        let endpoint = &attempt.endpoint;
        let Some(amount) = worst_case_cost(endpoint) else {
            return Err(AttemptError::new(
                ErrorKind::RequestFailed,
                format!(
                    "Cost not supported for {}/{}",
                    endpoint.provider, endpoint.provider_model_id
                ),
                500,
                &attempt.source,
            ));
        };

        match self.escrow.reserve(org_id, request_id, amount).await {
            Ok(reservation) => {
                tracing::debug!(
                    escrow_id = %reservation.escrow_id,
                    amount = %amount,
                    source = %attempt.source,
                    "Reserved escrow"
                );
                Ok(reservation)
            }
            Err(EscrowError::InsufficientCredit(message)) => Err(AttemptError::new(
                ErrorKind::InsufficientCreditLimit,
                message,
                429,
                &attempt.source,
            )),
            Err(EscrowError::Ledger(message)) => Err(AttemptError::new(
                ErrorKind::RequestFailed,
                message,
                500,
                &attempt.source,
            )),
        }
    }

    /// Shape the body, build auth headers, and issue the outbound call.
    async fn forward(
        &self,
        attempt: &Attempt,
        body: &Value,
    ) -> Result<reqwest::Response, AttemptError> {
        let endpoint = &attempt.endpoint;

        let outbound = build_request_body(attempt, body)
            .map_err(|e| AttemptError::new(ErrorKind::RequestFailed, e.to_string(), 400, &attempt.source))?;

        let url = build_url(endpoint, attempt);
        if url.is_empty() {
            return Err(AttemptError::new(
                ErrorKind::RequestFailed,
                format!("No base URL for {}", attempt.source),
                500,
                &attempt.source,
            ));
        }

        let mut request = self.http.post(&url).json(&outbound);
        for (name, value) in auth_headers(attempt) {
            request = request.header(name, value);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(source = %attempt.source, error = %error, "Provider unreachable");
                return Err(AttemptError::new(
                    ErrorKind::RequestFailed,
                    format!("Failed to reach provider: {error}"),
                    500,
                    &attempt.source,
                ));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let message = extract_error_message(response).await;
            tracing::warn!(
                source = %attempt.source,
                status = %status,
                message = %message,
                "Provider returned error"
            );
            let kind = if status.as_u16() == 429 {
                ErrorKind::RateLimited
            } else {
                ErrorKind::RequestFailed
            };
            return Err(AttemptError::new(kind, message, status.as_u16(), &attempt.source));
        }

        Ok(response)
    }

    fn spawn_cancel(&self, reservation: EscrowReservation) {
        let escrow = self.escrow.clone();
        tokio::spawn(async move {
            if let Err(error) = escrow.cancel(&reservation.escrow_id).await {
                tracing::error!(
                    escrow_id = %reservation.escrow_id,
                    error = %error,
                    "Failed to cancel escrow"
                );
            }
        });
    }
}

/// Worst-case cost of one call, from the endpoint's *first* pricing tier.
///
/// Returns `None` when pricing or limits are absent or zero; the caller
/// must not attempt a zero-amount reservation.
pub fn worst_case_cost(endpoint: &Endpoint) -> Option<f64> {
    let tier = endpoint.pricing.first()?;
    if tier.input == 0.0
        || tier.output == 0.0
        || endpoint.context_length == 0
        || endpoint.max_completion_tokens == 0
    {
        return None;
    }
    let cost = endpoint.context_length as f64 * tier.input
        + endpoint.max_completion_tokens as f64 * tier.output;
    (cost > 0.0).then_some(cost)
}

/// Provider-specific body shaping.
fn build_request_body(attempt: &Attempt, body: &Value) -> Result<Value, mapper::MapError> {
    let endpoint = &attempt.endpoint;
    match endpoint.response_format {
        ResponseFormat::Anthropic => {
            mapper::to_anthropic_body(body, &endpoint.provider_model_id, &attempt.plugins)
        }
        ResponseFormat::OpenAi => {
            let mut outbound = body.clone();
            outbound["model"] = json!(endpoint.provider_model_id);
            if outbound["stream"].as_bool() == Some(true) {
                ensure_stream_options(&mut outbound);
            }
            Ok(outbound)
        }
    }
}

/// Fill `{region}` / `{project_id}` URL template slots from the
/// credential's config blob.
fn build_url(endpoint: &Endpoint, attempt: &Attempt) -> String {
    let region = attempt
        .credential
        .config_str("region")
        .unwrap_or(DEFAULT_REGION);
    let project_id = attempt.credential.config_str("project_id").unwrap_or("");
    endpoint
        .base_url
        .replace("{region}", region)
        .replace("{project_id}", project_id)
}

/// Authentication headers for the endpoint's provider.
fn auth_headers(attempt: &Attempt) -> Vec<(&'static str, String)> {
    let key = attempt.credential.api_key.expose_secret();
    match attempt.endpoint.provider.as_str() {
        "anthropic" => vec![
            ("x-api-key", key.to_string()),
            ("anthropic-version", "2023-06-01".to_string()),
        ],
        _ => vec![("authorization", format!("Bearer {key}"))],
    }
}

/// Pull the most useful message out of a provider error body.
async fn extract_error_message(response: reqwest::Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    if let Ok(parsed) = serde_json::from_str::<Value>(&text) {
        if let Some(message) = parsed["message"]
            .as_str()
            .or_else(|| parsed["error"]["message"].as_str())
        {
            return message.to_string();
        }
    }
    if text.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("provider error")
            .to_string()
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{PricingTier, UserOverrides};

    fn endpoint_with_pricing(input: f64, output: f64, context: u64, max_out: u64) -> Endpoint {
        let mut endpoint = Endpoint::passthrough("m", "openai", &UserOverrides::default());
        endpoint.pricing = vec![PricingTier {
            input,
            output,
            threshold: None,
        }];
        endpoint.context_length = context;
        endpoint.max_completion_tokens = max_out;
        endpoint
    }

    #[test]
    fn worst_case_cost_uses_first_tier_only() {
        let mut endpoint = endpoint_with_pricing(0.000002, 0.00001, 128_000, 4096);
        endpoint.pricing.push(PricingTier {
            input: 99.0,
            output: 99.0,
            threshold: Some(1_000_000),
        });
        let cost = worst_case_cost(&endpoint).unwrap();
        assert!((cost - 0.29696).abs() < 1e-12, "cost {cost}");
    }

    #[test]
    fn zero_price_means_cost_not_supported() {
        assert!(worst_case_cost(&endpoint_with_pricing(0.0, 0.00001, 128_000, 4096)).is_none());
        assert!(worst_case_cost(&endpoint_with_pricing(0.000002, 0.0, 128_000, 4096)).is_none());
    }

    #[test]
    fn missing_limits_mean_cost_not_supported() {
        assert!(worst_case_cost(&endpoint_with_pricing(0.000002, 0.00001, 0, 4096)).is_none());
        assert!(worst_case_cost(&endpoint_with_pricing(0.000002, 0.00001, 128_000, 0)).is_none());
    }

    #[test]
    fn no_pricing_means_cost_not_supported() {
        let endpoint = Endpoint::passthrough("m", "openai", &UserOverrides::default());
        assert!(worst_case_cost(&endpoint).is_none());
    }

    #[test]
    fn url_template_slots_filled_from_credential_config() {
        use crate::config::ApiKey;
        use crate::credentials::Credential;
        use crate::router::AuthMode;

        let mut endpoint = Endpoint::passthrough("m", "bedrock", &UserOverrides::default());
        endpoint.base_url =
            "https://bedrock.{region}.amazonaws.com/model/{project_id}".to_string();
        let attempt = Attempt {
            endpoint,
            credential: Credential {
                provider: "bedrock".to_string(),
                org_id: "org-1".to_string(),
                api_key: ApiKey::from("k"),
                secret_key: None,
                config: serde_json::json!({"region": "eu-central-1", "project_id": "p-7"}),
                disabled: false,
            },
            auth: AuthMode::Byok,
            priority: 0,
            source: "bedrock/m/byok".to_string(),
            plugins: vec![],
        };
        assert_eq!(
            build_url(&attempt.endpoint, &attempt),
            "https://bedrock.eu-central-1.amazonaws.com/model/p-7"
        );
    }
}
