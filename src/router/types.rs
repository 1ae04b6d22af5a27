//! Core routing value objects.

use serde::{Deserialize, Serialize};

use crate::credentials::Credential;
use crate::registry::Endpoint;

/// Plugin id used for web search, and the one `:online` synthesizes.
pub const WEB_SEARCH_PLUGIN: &str = "web";

/// Credential strategy backing an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Bring-your-own-key: the caller's organization supplies the credential.
    Byok,
    /// Platform-funded (pay-through): the platform's credential is used
    /// and the caller is billed via escrow.
    Ptb,
}

impl AuthMode {
    /// Tie-break rank at equal priority: BYOK sorts before PTB.
    pub(crate) fn rank(self) -> u8 {
        match self {
            AuthMode::Byok => 0,
            AuthMode::Ptb => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuthMode::Byok => "byok",
            AuthMode::Ptb => "ptb",
        }
    }
}

/// A caller-requested or synthesized endpoint extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plugin {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

impl Plugin {
    pub fn web_search() -> Self {
        Plugin {
            id: WEB_SEARCH_PLUGIN.to_string(),
            config: None,
        }
    }
}

/// One ranked candidate for fulfilling a model request.
///
/// Fully describes a single outbound call strategy. Built once, executed
/// at most once, never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub endpoint: Endpoint,
    pub credential: Credential,
    pub auth: AuthMode,
    /// Ranking weight; attempts are tried in descending priority order
    /// within one model.
    pub priority: i32,
    /// Where this attempt came from, for logs and error sources
    /// (e.g. "openai/gpt-4o", "anthropic/claude-3-5-sonnet/ptb:us-east").
    pub source: String,
    pub plugins: Vec<Plugin>,
}

/// Error taxonomy for attempt failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidFormat,
    MissingProviderKey,
    RequestFailed,
    RateLimited,
    InvalidPrompt,
    ModelNotSupported,
    InsufficientCreditLimit,
    Disallowed,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidFormat => "invalid_format",
            ErrorKind::MissingProviderKey => "missing_provider_key",
            ErrorKind::RequestFailed => "request_failed",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::InvalidPrompt => "invalid_prompt",
            ErrorKind::ModelNotSupported => "model_not_supported",
            ErrorKind::InsufficientCreditLimit => "insufficient_credit_limit",
            ErrorKind::Disallowed => "disallowed",
        }
    }
}

/// A single attempt's failure, collected (never thrown) so fallback can
/// proceed to the next candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptError {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub message: String,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub source: String,
}

impl AttemptError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, status_code: u16, source: &str) -> Self {
        AttemptError {
            kind,
            message: message.into(),
            status_code,
            source: source.to_string(),
        }
    }
}

/// One per-organization disallow entry; `model` may be the `*` wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisallowListEntry {
    pub provider: String,
    pub model: String,
}

impl DisallowListEntry {
    /// Whether this entry forbids the given provider/model pair.
    pub fn matches(&self, provider: &str, model: &str) -> bool {
        self.provider == provider && (self.model == "*" || self.model == model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byok_ranks_before_ptb() {
        assert!(AuthMode::Byok.rank() < AuthMode::Ptb.rank());
    }

    #[test]
    fn disallow_wildcard_matches_every_model() {
        let entry = DisallowListEntry {
            provider: "openai".to_string(),
            model: "*".to_string(),
        };
        assert!(entry.matches("openai", "gpt-4o"));
        assert!(entry.matches("openai", "o3-mini"));
        assert!(!entry.matches("anthropic", "gpt-4o"));
    }

    #[test]
    fn disallow_exact_matches_one_model() {
        let entry = DisallowListEntry {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
        };
        assert!(entry.matches("openai", "gpt-4o"));
        assert!(!entry.matches("openai", "gpt-4o-mini"));
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let error = AttemptError::new(
            ErrorKind::InsufficientCreditLimit,
            "limit reached",
            429,
            "openai/gpt-4o",
        );
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["type"], "insufficient_credit_limit");
        assert_eq!(json["statusCode"], 429);
    }
}
