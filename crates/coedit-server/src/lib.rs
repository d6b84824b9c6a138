//! Coedit coordinator
//!
//! Accepts WebSocket connections at `/ws`, routes messages to per-document
//! authorities, and owns the client registry, presence fan-out and the
//! auth/persistence seams. A small HTTP surface (`/health`, `/documents`)
//! reports server state.

pub mod auth;
pub mod authority;
pub mod config;
pub mod error;
pub mod persistence;
pub mod registry;

mod http;
mod ws;

pub use config::ServerConfig;
pub use error::ServerError;

use crate::auth::{AuthService, NoAuth, SharedSecretAuth};
use crate::authority::{AuthorityRegistry, HistoryConfig};
use crate::persistence::{DocumentStore, JsonFileStore, MemoryStore};
use crate::registry::ClientRegistry;
use axum::routing::get;
use axum::Router;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub struct ServerStats {
    pub started_at: Instant,
    pub total_operations: Arc<AtomicU64>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub auth: Arc<dyn AuthService>,
    pub store: Arc<dyn DocumentStore>,
    pub registry: Arc<ClientRegistry>,
    pub authorities: Arc<AuthorityRegistry>,
    pub stats: Arc<ServerStats>,
}

/// Wire up state from config: auth service, store, registries, counters.
pub async fn build_state(config: ServerConfig) -> anyhow::Result<AppState> {
    let auth: Arc<dyn AuthService> = if config.auth_required {
        match &config.auth_secret {
            Some(secret) => Arc::new(SharedSecretAuth::new(secret.clone())),
            None => {
                warn!("AUTH_REQUIRED is set without AUTH_SECRET; all tokens will be rejected");
                Arc::new(SharedSecretAuth::new(
                    coedit_common::mint_client_id().into_string(),
                ))
            }
        }
    } else {
        Arc::new(NoAuth)
    };

    let store: Arc<dyn DocumentStore> = match &config.data_dir {
        Some(dir) => {
            info!(?dir, "using JSON file store");
            Arc::new(JsonFileStore::new(dir.clone()).await?)
        }
        None => Arc::new(MemoryStore::new()),
    };

    let total_operations = Arc::new(AtomicU64::new(0));
    let history = HistoryConfig {
        high_water: config.history_high_water,
        keep: config.history_keep,
    };

    Ok(AppState {
        config: Arc::new(config),
        auth,
        store: store.clone(),
        registry: Arc::new(ClientRegistry::new()),
        authorities: Arc::new(AuthorityRegistry::new(
            store,
            history,
            total_operations.clone(),
        )),
        stats: Arc::new(ServerStats {
            started_at: Instant::now(),
            total_operations,
        }),
    })
}

pub fn router(state: AppState) -> Router {
    let cors = match &state.config.cors_origin {
        Some(origin) => match origin.parse() {
            Ok(origin) => CorsLayer::new().allow_origin(AllowOrigin::exact(origin)),
            Err(_) => {
                warn!(origin = %origin, "invalid CORS origin, falling back to permissive");
                CorsLayer::permissive()
            }
        },
        None => CorsLayer::permissive(),
    };

    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(http::health))
        .route("/documents", get(http::list_documents))
        .route("/documents/{id}", get(http::document_info))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until ctrl-c.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let addr = config.bind_addr();
    let state = build_state(config).await?;

    tokio::spawn(ws::sweep_task(state.clone()));

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("coedit coordinator listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}
