// ABOUTME: HTTP API - connect, list tables, read rows, sync, health
// ABOUTME: Holds the two live connections and serializes sync runs

pub mod handlers;
pub mod response;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::{Extension, Router};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_postgres::Client;

use crate::config::{ServerSettings, SyncSettings};
use crate::sync::Side;

/// A connection shared between requests. Each query locks it, and a
/// transactional sync keeps it locked until COMMIT or ROLLBACK.
pub type SharedClient = Arc<Mutex<Client>>;

/// Shared server state.
///
/// Connections are replaced wholesale by `POST /connect`. A sync holds
/// `sync_lock` so two runs never interleave statements on the target.
pub struct AppState {
    source: RwLock<Option<SharedClient>>,
    target: RwLock<Option<SharedClient>>,
    pub settings: SyncSettings,
    pub(crate) sync_lock: Mutex<()>,
}

impl AppState {
    pub fn new(settings: SyncSettings) -> Self {
        Self {
            source: RwLock::new(None),
            target: RwLock::new(None),
            settings,
            sync_lock: Mutex::new(()),
        }
    }

    fn slot(&self, side: Side) -> &RwLock<Option<SharedClient>> {
        match side {
            Side::Source => &self.source,
            Side::Target => &self.target,
        }
    }

    pub async fn connection(&self, side: Side) -> Option<SharedClient> {
        self.slot(side).read().await.clone()
    }

    pub async fn is_connected(&self, side: Side) -> bool {
        self.slot(side).read().await.is_some()
    }

    pub async fn set_connection(&self, side: Side, client: Client) {
        *self.slot(side).write().await = Some(Arc::new(Mutex::new(client)));
    }

    /// Drop both connections; their background tasks end once the last
    /// in-flight request releases its handle.
    pub async fn close(&self) {
        for side in [Side::Source, Side::Target] {
            if self.slot(side).write().await.take().is_some() {
                tracing::info!("Closed {} database connection", side);
            }
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/connect", post(handlers::connect_handler))
        .route("/tables", get(handlers::tables_handler))
        .route("/rows", get(handlers::rows_handler))
        .route("/sync", post(handlers::sync_handler))
        .route("/health", get(handlers::health_handler))
        .layer(Extension(state))
}

/// Serve until SIGINT or SIGTERM, then close the connections.
pub async fn serve(settings: &ServerSettings, state: AppState) -> Result<()> {
    let state = Arc::new(state);
    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Started webserver at {}", addr);

    axum::serve(listener, router(Arc::clone(&state)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    tracing::info!("Cleaning up resources...");
    state.close().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Received shutdown signal");
}
