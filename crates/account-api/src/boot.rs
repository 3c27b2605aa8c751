// Service wiring
// Decision: One place builds journal, actors, service and router so main and tests share it
// Decision: Health stays unprefixed, API routes are nested under API_PREFIX when set

use std::sync::Arc;

use account_runtime::{AccountManager, AccountService, ActorAccountService};
use account_storage::{InMemoryJournal, Journal, RocksJournal};
use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, Method};
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api;
use crate::config::{AppConfig, StorageBackend};
use crate::openapi::ApiDoc;

/// Everything a running server needs
pub struct AppContext {
    pub service: Arc<dyn AccountService>,
    pub manager: Arc<AccountManager>,
    pub router: Router,
}

/// Open the journal, start the actor runtime and resume unfinished transfers
pub async fn build(config: &AppConfig) -> Result<AppContext> {
    let journal = open_journal(config)?;

    let manager = Arc::new(AccountManager::new(journal, config.runtime.clone()));
    let resumed = manager
        .recover_in_flight()
        .await
        .context("Failed to recover in-flight transfers")?;
    if resumed > 0 {
        tracing::info!(resumed, "Resumed unfinished transfers");
    }

    let service: Arc<dyn AccountService> = Arc::new(ActorAccountService::new(
        manager.clone(),
        config.timeouts.clone(),
    ));
    let router = build_router(service.clone(), config);

    Ok(AppContext {
        service,
        manager,
        router,
    })
}

fn open_journal(config: &AppConfig) -> Result<Arc<dyn Journal>> {
    match config.storage {
        StorageBackend::RocksDb => {
            std::fs::create_dir_all(&config.journal_dir).with_context(|| {
                format!(
                    "Failed to create journal directory {}",
                    config.journal_dir.display()
                )
            })?;
            let journal = RocksJournal::open(&config.journal_dir)
                .context("Failed to open RocksDB journal")?;
            tracing::info!(path = %config.journal_dir.display(), "Using RocksDB journal");
            Ok(Arc::new(journal))
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory journal, state is lost on exit");
            Ok(Arc::new(InMemoryJournal::new()))
        }
    }
}

// ============================================
// Router
// ============================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    storage: &'static str,
}

/// State for health endpoint
#[derive(Clone)]
struct HealthState {
    storage: &'static str,
}

async fn health(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        storage: state.storage,
    })
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    use utoipa::OpenApi;
    Json(ApiDoc::openapi())
}

/// Build the HTTP router over an account service
pub fn build_router(service: Arc<dyn AccountService>, config: &AppConfig) -> Router {
    let state = api::AppState::new(service);
    let health_state = HealthState {
        storage: config.storage.as_str(),
    };

    if !config.api_prefix.is_empty() {
        tracing::info!(prefix = %config.api_prefix, "API prefix configured");
    }

    let api_routes = Router::new()
        .merge(api::accounts::routes(state.clone()))
        .merge(api::transfers::routes(state));

    let app = Router::new()
        .route("/health", get(health).with_state(health_state))
        .route("/api-doc/openapi.json", get(openapi_json))
        .merge(build_router_with_prefix(api_routes, &config.api_prefix));

    let cors_origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    // Add CORS layer only if origins are configured
    let app = if !cors_origins.is_empty() {
        tracing::info!(origins = ?cors_origins, "CORS origins configured");
        app.layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(cors_origins))
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN]),
        )
    } else {
        app
    };

    app.layer(TraceLayer::new_for_http())
}

/// Nest API routes under a prefix, or return them as is when the prefix is empty
fn build_router_with_prefix<S: Clone + Send + Sync + 'static>(
    api_routes: Router<S>,
    api_prefix: &str,
) -> Router<S> {
    if api_prefix.is_empty() {
        api_routes
    } else {
        Router::new().nest(api_prefix, api_routes)
    }
}
