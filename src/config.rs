//! Configuration parsing and validation for switchboard.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::path::Path;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: Option<DatabaseConfig>,
    pub registry: CollaboratorConfig,
    pub credentials: CollaboratorConfig,
    pub escrow: CollaboratorConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:8080")
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "./switchboard.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Base URL (and optional bearer token) of a remote collaborator service:
/// the capability registry, the credential store, or the escrow ledger.
#[derive(Debug, Clone, Deserialize)]
pub struct CollaboratorConfig {
    pub url: String,
    pub token: Option<ApiKey>,
}

/// Secure credential-cache configuration.
///
/// Two independent secrets drive the cache's key derivation; both must be
/// set for credential caching to be enabled.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CacheConfig {
    pub secret_primary: Option<ApiKey>,
    pub secret_secondary: Option<ApiKey>,
    /// Bound on the in-process tier.
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,
    /// Entry lifetime in seconds.
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

fn default_cache_entries() -> usize {
    512
}

fn default_cache_ttl() -> u64 {
    60
}

/// Platform-owned provider keys, used for pay-through (metered) attempts.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PlatformConfig {
    /// provider name -> the platform's own key for that provider
    #[serde(default)]
    pub keys: HashMap<String, ApiKey>,
}

/// Routing behavior knobs.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RoutingConfig {
    /// Providers never considered during attempt construction.
    #[serde(default)]
    pub ignore_providers: Vec<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to log requests to database
    #[serde(default = "default_true")]
    pub log_requests: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_requests: true,
        }
    }
}

/// API key wrapper that redacts in Debug/Display/Serialize and zeroizes on drop.
///
/// The inner `SecretString` ensures the key value is:
/// - Zeroized in memory when dropped
/// - Never exposed via Debug or Display
/// - Only accessible via `.expose_secret()` (grep-auditable)
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Access the raw key value. Every call site is auditable via `grep expose_secret`.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> serde::Deserialize<'de> for ApiKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| ApiKey(SecretString::from(s)))
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        ApiKey(SecretString::from(s))
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        ApiKey(SecretString::from(s))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("environment variable '{0}' referenced in config is not set")]
    MissingEnv(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::parse_str(&content)
    }

    /// Parse configuration from a TOML string, expanding `${VAR}` references
    /// from the environment first.
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env(content)?;
        let config: Config = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.listen.is_empty() {
            return Err(ConfigError::Invalid("server.listen must not be empty".into()));
        }
        for (name, cfg) in [
            ("registry", &self.registry),
            ("credentials", &self.credentials),
            ("escrow", &self.escrow),
        ] {
            if cfg.url.is_empty() {
                return Err(ConfigError::Invalid(format!("{name}.url must not be empty")));
            }
        }
        // The cache secrets come as a pair or not at all.
        if self.cache.secret_primary.is_some() != self.cache.secret_secondary.is_some() {
            return Err(ConfigError::Invalid(
                "cache.secret_primary and cache.secret_secondary must both be set or both omitted"
                    .into(),
            ));
        }
        Ok(())
    }
}

/// Expand `${VAR}` references against the process environment.
///
/// Unset variables are an error rather than silently expanding to "",
/// since a missing key would otherwise surface much later as a provider
/// auth failure.
fn expand_env(content: &str) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var = &after[..end];
                let value =
                    std::env::var(var).map_err(|_| ConfigError::MissingEnv(var.to_string()))?;
                out.push_str(&value);
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated reference; keep the literal text.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}
