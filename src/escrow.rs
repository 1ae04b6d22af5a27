//! Escrow/ledger seam.
//!
//! The ledger is a remote actor (one instance per organization) with a
//! fixed contract: reserve a budget hold, cancel it, and expose the org's
//! provider disallow list. Reservation failures never abort the whole
//! request, only the attempt that needed the hold.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::{ApiKey, CollaboratorConfig};
use crate::router::DisallowListEntry;

/// A budget hold against an organization's balance.
///
/// Lives only as long as the attempt that reserved it: committed by the
/// ledger once real cost is known, or canceled when the attempt fails.
#[derive(Debug, Clone, Deserialize)]
pub struct EscrowReservation {
    pub escrow_id: String,
    pub amount: f64,
}

/// Ledger errors.
#[derive(Debug, thiserror::Error)]
pub enum EscrowError {
    /// The org's balance or credit limit cannot cover the hold.
    #[error("insufficient credit: {0}")]
    InsufficientCredit(String),

    #[error("escrow ledger error: {0}")]
    Ledger(String),
}

/// Remote escrow/ledger actor.
#[async_trait]
pub trait EscrowLedger: Send + Sync {
    async fn reserve(
        &self,
        org_id: &str,
        request_id: &str,
        amount: f64,
    ) -> Result<EscrowReservation, EscrowError>;

    async fn cancel(&self, escrow_id: &str) -> Result<(), EscrowError>;

    async fn disallow_list(&self, org_id: &str) -> Result<Vec<DisallowListEntry>, EscrowError>;
}

/// HTTP-backed ledger client.
pub struct HttpEscrowLedger {
    base_url: String,
    token: Option<ApiKey>,
    client: reqwest::Client,
}

impl HttpEscrowLedger {
    pub fn new(config: &CollaboratorConfig, client: reqwest::Client) -> Self {
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            client,
        }
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }
}

#[async_trait]
impl EscrowLedger for HttpEscrowLedger {
    async fn reserve(
        &self,
        org_id: &str,
        request_id: &str,
        amount: f64,
    ) -> Result<EscrowReservation, EscrowError> {
        let response = self
            .authed(self.client.post(format!("{}/v1/escrow/reserve", self.base_url)))
            .json(&serde_json::json!({
                "org_id": org_id,
                "request_id": request_id,
                "amount": amount,
            }))
            .send()
            .await
            .map_err(|e| EscrowError::Ledger(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::PAYMENT_REQUIRED
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        {
            let message = response.text().await.unwrap_or_default();
            return Err(EscrowError::InsufficientCredit(message));
        }
        if !status.is_success() {
            return Err(EscrowError::Ledger(format!("ledger returned {status}")));
        }

        response
            .json()
            .await
            .map_err(|e| EscrowError::Ledger(e.to_string()))
    }

    async fn cancel(&self, escrow_id: &str) -> Result<(), EscrowError> {
        let response = self
            .authed(
                self.client
                    .post(format!("{}/v1/escrow/{escrow_id}/cancel", self.base_url)),
            )
            .send()
            .await
            .map_err(|e| EscrowError::Ledger(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EscrowError::Ledger(format!(
                "cancel returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn disallow_list(&self, org_id: &str) -> Result<Vec<DisallowListEntry>, EscrowError> {
        let response = self
            .authed(
                self.client
                    .get(format!("{}/v1/orgs/{org_id}/disallow-list", self.base_url)),
            )
            .send()
            .await
            .map_err(|e| EscrowError::Ledger(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EscrowError::Ledger(format!(
                "disallow list returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| EscrowError::Ledger(e.to_string()))
    }
}
