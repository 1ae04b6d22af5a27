//! Model token parsing.
//!
//! A caller's model field is a comma-separated list of tokens, each
//! matching `name[:online][/provider[/customUid]]`. Token position fixes
//! fallback order across different models; ranking within one model is
//! the attempt builder's job.

use crate::registry::ModelRegistry;

/// Structured form of one model token. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub model_name: String,
    pub provider: Option<String>,
    pub custom_uid: Option<String>,
    pub is_online: bool,
}

/// Token parse failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("malformed model token '{0}'")]
    Malformed(String),
}

/// Parse one `name[:online][/provider[/customUid]]` token.
///
/// The `:online` marker is recognized only as a literal suffix of the name
/// segment; a colon anywhere else stays part of the model name
/// (`model:online-test` is a model named `model:online-test`).
pub fn parse_model_token(
    token: &str,
    registry: &dyn ModelRegistry,
) -> Result<ModelSpec, ParseError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(ParseError::Malformed(token.to_string()));
    }

    let mut segments = token.split('/');
    let name_segment = segments.next().unwrap_or_default();
    let provider = segments.next();
    let custom_uid = segments.next();
    if segments.next().is_some() {
        return Err(ParseError::Malformed(token.to_string()));
    }

    let (model_name, is_online) = match name_segment.strip_suffix(":online") {
        Some(base) if !base.is_empty() => (base, true),
        _ => (name_segment, false),
    };
    if model_name.is_empty() {
        return Err(ParseError::Malformed(token.to_string()));
    }

    if let Some(provider) = provider {
        if provider.is_empty() {
            return Err(ParseError::Malformed(token.to_string()));
        }
        if !registry.provider_exists(provider) {
            return Err(ParseError::UnknownProvider(provider.to_string()));
        }
    }
    if matches!(custom_uid, Some("")) {
        return Err(ParseError::Malformed(token.to_string()));
    }

    Ok(ModelSpec {
        model_name: model_name.to_string(),
        provider: provider.map(str::to_string),
        custom_uid: custom_uid.map(str::to_string),
        is_online,
    })
}

/// Parse a comma-separated model list, preserving token order.
///
/// Individually bad tokens are logged and skipped; the whole list fails
/// only when no token parses, and the first error is returned so the
/// caller can name the problem.
pub fn parse_model_list(
    model_field: &str,
    registry: &dyn ModelRegistry,
) -> Result<Vec<ModelSpec>, ParseError> {
    let mut specs = Vec::new();
    let mut first_error: Option<ParseError> = None;

    for token in model_field.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        match parse_model_token(token, registry) {
            Ok(spec) => specs.push(spec),
            Err(error) => {
                tracing::warn!(token = %token, error = %error, "Skipping unparseable model token");
                first_error.get_or_insert(error);
            }
        }
    }

    if specs.is_empty() {
        return Err(first_error.unwrap_or_else(|| ParseError::Malformed(model_field.to_string())));
    }
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Endpoint, RegistryError};
    use async_trait::async_trait;

    struct FixedProviders(Vec<&'static str>);

    #[async_trait]
    impl ModelRegistry for FixedProviders {
        async fn entries_for_model(&self, _name: &str) -> Result<Vec<Endpoint>, RegistryError> {
            Ok(vec![])
        }

        async fn entry_for_model(
            &self,
            _name: &str,
            _provider: &str,
        ) -> Result<Option<Endpoint>, RegistryError> {
            Ok(None)
        }

        fn provider_exists(&self, provider: &str) -> bool {
            self.0.contains(&provider)
        }
    }

    fn registry() -> FixedProviders {
        FixedProviders(vec!["openai", "anthropic", "bedrock"])
    }

    #[test]
    fn bare_name_parses() {
        let spec = parse_model_token("gpt-4o", &registry()).unwrap();
        assert_eq!(spec.model_name, "gpt-4o");
        assert_eq!(spec.provider, None);
        assert!(!spec.is_online);
    }

    #[test]
    fn online_suffix_recognized() {
        let spec = parse_model_token("gpt-4o:online", &registry()).unwrap();
        assert_eq!(spec.model_name, "gpt-4o");
        assert!(spec.is_online);
    }

    #[test]
    fn online_suffix_with_provider() {
        let spec = parse_model_token("gpt-4o:online/openai", &registry()).unwrap();
        assert_eq!(spec.model_name, "gpt-4o");
        assert_eq!(spec.provider.as_deref(), Some("openai"));
        assert!(spec.is_online);
    }

    #[test]
    fn colon_not_a_true_suffix_stays_in_name() {
        let spec = parse_model_token("model:online-test", &registry()).unwrap();
        assert_eq!(spec.model_name, "model:online-test");
        assert!(!spec.is_online);
    }

    #[test]
    fn full_token_with_custom_uid() {
        let spec = parse_model_token("claude-3-5-sonnet/anthropic/team-key", &registry()).unwrap();
        assert_eq!(spec.provider.as_deref(), Some("anthropic"));
        assert_eq!(spec.custom_uid.as_deref(), Some("team-key"));
    }

    #[test]
    fn unknown_provider_named_in_error() {
        let error = parse_model_token("gpt-4o/closedai", &registry()).unwrap_err();
        assert_eq!(error, ParseError::UnknownProvider("closedai".to_string()));
    }

    #[test]
    fn too_many_segments_is_malformed() {
        let error = parse_model_token("a/openai/uid/extra", &registry()).unwrap_err();
        assert!(matches!(error, ParseError::Malformed(_)));
    }

    #[test]
    fn lone_online_marker_is_a_name() {
        // ":online" with an empty base is not a marker, it's a (weird) name.
        let spec = parse_model_token(":online", &registry()).unwrap();
        assert_eq!(spec.model_name, ":online");
        assert!(!spec.is_online);
    }

    #[test]
    fn list_preserves_position_and_skips_bad_tokens() {
        let specs =
            parse_model_list("gpt-4o, bad/closedai, claude-3-5-sonnet/anthropic", &registry())
                .unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].model_name, "gpt-4o");
        assert_eq!(specs[1].model_name, "claude-3-5-sonnet");
    }

    #[test]
    fn list_fails_only_when_every_token_fails() {
        let error = parse_model_list("x/closedai, y/nope", &registry()).unwrap_err();
        assert_eq!(error, ParseError::UnknownProvider("closedai".to_string()));
    }

    #[test]
    fn empty_list_is_malformed() {
        assert!(parse_model_list("  , ", &registry()).is_err());
    }
}
