//! HTTP server setup and request routing.
//!
//! Requests flow through middleware in order:
//! 1. Request/response tracing
//! 2. Body size limit (413 above the configured maximum; replaces axum's
//!    default limit)
//! 3. Handler execution
//!
//! # Graceful Shutdown
//!
//! On CTRL+C or SIGTERM the server stops accepting connections and waits
//! for in-flight deliveries to finish.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::GatewayConfig;
use crate::error::Result;
use crate::handlers::{status_router, AppState};
use crate::time::SystemClock;
use crate::webhooks::{
    webhook_router, IdempotencyGuard, InMemoryIdempotencyStore, LoggingProcessor,
    ProviderRegistry, WebhookState,
};

/// How often finished idempotency records are pruned
const PRUNE_INTERVAL: Duration = Duration::from_secs(300);

/// A fully wired gateway.
pub struct Gateway {
    /// Router with webhook, status and metrics routes
    pub router: Router,
    /// Guard shared by every delivery; swept by the prune task
    pub guard: IdempotencyGuard,
}

/// Wires registry, idempotency store and router from `config`.
pub fn build_gateway(config: &GatewayConfig) -> Gateway {
    let registry = ProviderRegistry::from_secrets(&config.secrets, |_| Arc::new(LoggingProcessor));
    let store = InMemoryIdempotencyStore::new(config.retention, config.max_records);
    let guard = IdempotencyGuard::new(Arc::new(store), Arc::new(SystemClock), config.claim_lease);

    let app_state = Arc::new(AppState::new().with_idempotency(guard.clone()));
    let webhooks = WebhookState::new(registry, guard.clone(), Arc::clone(&app_state))
        .with_processing_timeout(config.processing_timeout);

    Gateway {
        router: create_router(Arc::new(webhooks), app_state, config.max_body_bytes),
        guard,
    }
}

/// Loads configuration from the environment and serves until shutdown.
///
/// `addr_override` replaces `WEBHOOK_GATEWAY_ADDR` when given.
///
/// # Errors
///
/// [`crate::Error::Config`] for invalid configuration,
/// [`crate::Error::Io`] if the address cannot be bound.
pub async fn run(addr_override: Option<SocketAddr>) -> Result<()> {
    let mut config = GatewayConfig::from_env()?;
    if let Some(addr) = addr_override {
        config.addr = addr;
    }

    for provider in config.unconfigured_providers() {
        tracing::warn!(
            provider = %provider,
            env_var = provider.secret_env_var(),
            "Webhook secret not set; deliveries will be rejected"
        );
    }

    let gateway = build_gateway(&config);
    spawn_pruner(gateway.guard.clone());

    info!(
        version = crate::VERSION,
        addr = %config.addr,
        "HR webhook gateway starting"
    );
    start_server(gateway.router, config.addr).await
}

fn spawn_pruner(guard: IdempotencyGuard) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            interval.tick().await;
            match guard.prune().await {
                Ok(0) => {}
                Ok(pruned) => tracing::debug!(pruned, "Pruned idempotency records"),
                Err(e) => tracing::warn!(error = %e, "Failed to prune idempotency records"),
            }
        }
    });
}

/// Creates the router with webhook, status and metrics routes.
///
/// # Example
///
/// ```no_run
/// use std::collections::HashMap;
/// use std::sync::Arc;
/// use hr_webhooks::handlers::AppState;
/// use hr_webhooks::server::create_router;
/// use hr_webhooks::time::SystemClock;
/// use hr_webhooks::webhooks::*;
///
/// let app_state = Arc::new(AppState::new());
/// let registry = ProviderRegistry::from_secrets(&HashMap::new(), |_| Arc::new(NoOpProcessor));
/// let guard = IdempotencyGuard::new(
///     Arc::new(InMemoryIdempotencyStore::default()),
///     Arc::new(SystemClock),
///     DEFAULT_CLAIM_LEASE,
/// );
/// let state = Arc::new(WebhookState::new(registry, guard, app_state.clone()));
/// let app = create_router(state, app_state, 1024 * 1024);
/// ```
pub fn create_router(
    webhooks: Arc<WebhookState>,
    app_state: Arc<AppState>,
    max_body_bytes: usize,
) -> Router {
    Router::new()
        .merge(webhook_router(webhooks))
        .merge(status_router(app_state))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
}

/// Serves `app` on `addr` until a shutdown signal arrives.
///
/// # Errors
///
/// Returns [`crate::Error::Io`] if the address cannot be bound.
pub async fn start_server(app: Router, addr: SocketAddr) -> Result<()> {
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("HTTP server listening on {}", actual_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped gracefully");
    Ok(())
}

/// Waits for CTRL+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C, starting graceful shutdown");
        },
        () = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
