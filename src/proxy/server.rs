//! HTTP server setup and configuration.

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use reqwest::Client;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use super::executor::AttemptExecutor;
use super::handlers;
use super::orchestrator::{Gateway, NoPromptTemplates};
use crate::cache::SecureKeyCache;
use crate::config::Config;
use crate::credentials::HttpCredentialStore;
use crate::escrow::HttpEscrowLedger;
use crate::registry::HttpRegistry;
use crate::router::AttemptBuilder;
use crate::storage;

/// Per-request correlation id, assigned by middleware.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub uuid::Uuid);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub config: Arc<Config>,
    pub db: Option<sqlx::SqlitePool>,
}

async fn assign_request_id(mut request: Request, next: Next) -> Response {
    request
        .extensions_mut()
        .insert(RequestId(uuid::Uuid::new_v4()));
    next.run(request).await
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(middleware::from_fn(assign_request_id))
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();

    // One client shared by collaborators and provider calls; timeouts here
    // are the only time control on the outbound path.
    let http_client = Client::builder()
        .timeout(Duration::from_secs(120))
        .connect_timeout(Duration::from_secs(10))
        .build()?;

    let providers = fetch_providers(&http_client, &config).await?;
    tracing::info!(count = providers.len(), "Loaded provider list from registry");

    let registry = Arc::new(HttpRegistry::new(
        &config.registry,
        http_client.clone(),
        providers,
    ));
    let credentials = Arc::new(HttpCredentialStore::new(
        &config.credentials,
        http_client.clone(),
    ));
    let escrow = Arc::new(HttpEscrowLedger::new(&config.escrow, http_client.clone()));

    let cache = match (&config.cache.secret_primary, &config.cache.secret_secondary) {
        (Some(primary), Some(secondary)) => Some(Arc::new(SecureKeyCache::new(
            primary,
            secondary,
            config.cache.max_entries,
            Duration::from_secs(config.cache.ttl_secs),
            None,
        ))),
        _ => {
            tracing::warn!("Cache secrets not configured, credential caching disabled");
            None
        }
    };

    let builder = AttemptBuilder::new(
        registry.clone(),
        credentials,
        cache,
        Arc::new(config.platform.keys.clone()),
    );
    let executor = AttemptExecutor::new(http_client.clone(), escrow.clone());
    let ignore: HashSet<String> = config.routing.ignore_providers.iter().cloned().collect();

    let gateway = Arc::new(Gateway::new(
        registry,
        builder,
        executor,
        escrow,
        Arc::new(NoPromptTemplates),
        ignore,
    ));

    let db = match &config.database {
        Some(database) if config.logging.log_requests => {
            Some(storage::init_pool(&database.path).await?)
        }
        _ => None,
    };

    let state = AppState {
        gateway,
        config: Arc::new(config),
        db,
    };

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "Starting switchboard gateway");

    axum::serve(listener, app).await?;

    Ok(())
}

/// The registry's known-provider set, fetched once at startup to validate
/// explicit `model/provider` tokens without a lookup per parse.
async fn fetch_providers(client: &Client, config: &Config) -> anyhow::Result<Vec<String>> {
    let url = format!("{}/v1/providers", config.registry.url.trim_end_matches('/'));
    let providers = client
        .get(&url)
        .send()
        .await?
        .error_for_status()?
        .json::<Vec<String>>()
        .await?;
    Ok(providers)
}
