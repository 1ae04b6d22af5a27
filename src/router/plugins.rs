//! Plugin negotiation.
//!
//! Reconciles the caller's requested plugin list with one endpoint's
//! supported set. Negotiation runs once per constructed attempt, against
//! that attempt's own endpoint config.

use super::spec::ModelSpec;
use super::types::{Plugin, WEB_SEARCH_PLUGIN};

/// Filter and augment the requested plugins for one endpoint.
///
/// `:online` synthesizes a minimal web-search plugin unless the caller
/// already asked for one (their configuration wins). Anything the
/// endpoint does not support is dropped with a warning.
pub fn negotiate_plugins(
    spec: &ModelSpec,
    supported: &[String],
    requested: &[Plugin],
) -> Vec<Plugin> {
    let mut plugins: Vec<Plugin> = requested.to_vec();

    let has_web_search = plugins.iter().any(|p| p.id == WEB_SEARCH_PLUGIN);
    let mut synthesized_web = false;
    if spec.is_online && !has_web_search {
        plugins.push(Plugin::web_search());
        synthesized_web = true;
    }

    plugins.retain(|plugin| {
        if supported.iter().any(|id| id == &plugin.id) {
            return true;
        }
        if plugin.id == WEB_SEARCH_PLUGIN && (spec.is_online || synthesized_web) {
            tracing::warn!(
                model = %spec.model_name,
                ":online requested but this provider does not support web search"
            );
        } else {
            tracing::warn!(
                model = %spec.model_name,
                plugin = %plugin.id,
                "Requested plugin not supported by this provider, dropping"
            );
        }
        false
    });

    plugins
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(online: bool) -> ModelSpec {
        ModelSpec {
            model_name: "gpt-4o".to_string(),
            provider: None,
            custom_uid: None,
            is_online: online,
        }
    }

    fn supported(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn online_synthesizes_web_search() {
        let plugins = negotiate_plugins(&spec(true), &supported(&["web"]), &[]);
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].id, "web");
        assert!(plugins[0].config.is_none());
    }

    #[test]
    fn existing_web_search_config_untouched() {
        let requested = vec![Plugin {
            id: "web".to_string(),
            config: Some(serde_json::json!({"max_results": 3})),
        }];
        let plugins = negotiate_plugins(&spec(true), &supported(&["web"]), &requested);
        assert_eq!(plugins.len(), 1);
        assert_eq!(
            plugins[0].config,
            Some(serde_json::json!({"max_results": 3}))
        );
    }

    #[test]
    fn online_dropped_when_endpoint_lacks_web_search() {
        let plugins = negotiate_plugins(&spec(true), &supported(&[]), &[]);
        assert!(plugins.is_empty());
    }

    #[test]
    fn unsupported_plugin_dropped() {
        let requested = vec![Plugin {
            id: "code-interpreter".to_string(),
            config: None,
        }];
        let plugins = negotiate_plugins(&spec(false), &supported(&["web"]), &requested);
        assert!(plugins.is_empty());
    }

    #[test]
    fn supported_plugins_kept_in_order() {
        let requested = vec![
            Plugin {
                id: "web".to_string(),
                config: None,
            },
            Plugin {
                id: "pdf".to_string(),
                config: None,
            },
        ];
        let plugins = negotiate_plugins(&spec(false), &supported(&["pdf", "web"]), &requested);
        assert_eq!(plugins.len(), 2);
        assert_eq!(plugins[0].id, "web");
        assert_eq!(plugins[1].id, "pdf");
    }
}
