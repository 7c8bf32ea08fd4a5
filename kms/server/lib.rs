//! HTTP front-end for the KMS engine.
//!
//! Routes are grouped per manager under `service/`; each handler hands its
//! engine call to the blocking pool and marshals SDK-compatible JSON.

pub mod auth;
pub mod config;
pub mod error;
pub mod service;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::{HeaderValue, Method};
use axum::middleware;
use kms_engine::Kms;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

pub use config::ServerConfig;
pub use error::{ApiError, ApiResult};

/// State handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub kms: Arc<Kms>,
    pub api_key_hash: Option<blake3::Hash>,
}

impl AppState {
    pub fn new(kms: Arc<Kms>, api_key: Option<&str>) -> Self {
        Self {
            kms,
            api_key_hash: api_key.filter(|k| !k.is_empty()).map(|k| blake3::hash(k.as_bytes())),
        }
    }
}

/// Full API router. Health stays outside the API key check.
pub fn router(kms: Arc<Kms>, config: &ServerConfig) -> Router {
    let state = AppState::new(kms, config.api_key.as_deref());

    let mut api = Router::new()
        .merge(service::key_service::routes())
        .merge(service::audit_service::routes());
    if config.enable_secrets {
        api = api.merge(service::secret_service::routes());
    }
    if config.enable_mpc {
        api = api.merge(service::mpc_service::routes());
    }
    let api = api.route_layer(middleware::from_fn_with_state(state.clone(), auth::require_api_key));

    Router::new()
        .merge(service::health_service::routes())
        .merge(api)
        .fallback(service::not_found)
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(cors_layer(&config.cors_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    if origin == "*" {
        return layer.allow_origin(Any);
    }
    match HeaderValue::from_str(origin) {
        Ok(value) => layer.allow_origin(AllowOrigin::exact(value)),
        Err(_) => {
            warn!(origin, "invalid CORS origin; cross-origin requests disabled");
            layer
        }
    }
}

/// Bind, serve until `shutdown` resolves, then flush storage.
pub async fn serve<F>(kms: Arc<Kms>, config: ServerConfig, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(kms.clone(), &config);
    let listener = TcpListener::bind(config.addr).await?;
    info!(
        addr = %config.addr,
        secrets = config.enable_secrets,
        mpc = config.enable_mpc,
        auth = config.api_key.is_some(),
        "KMS API listening"
    );

    let compaction = config
        .compaction_interval
        .map(|period| tokio::spawn(compaction_loop(kms.clone(), period)));

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    if let Some(task) = compaction {
        task.abort();
    }
    match tokio::task::spawn_blocking(move || kms.close()).await {
        Ok(Ok(())) => info!("storage flushed"),
        Ok(Err(e)) => error!(error = %e, "failed to flush storage"),
        Err(e) => error!(error = %e, "flush task failed"),
    }
    Ok(())
}

/// Periodically purges expired storage entries.
async fn compaction_loop(kms: Arc<Kms>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await; // first tick fires immediately

    loop {
        ticker.tick().await;
        let kms = kms.clone();
        match tokio::task::spawn_blocking(move || kms.compact()).await {
            Ok(Ok(0)) => {}
            Ok(Ok(removed)) => debug!(removed, "compacted expired entries"),
            Ok(Err(e)) => warn!(error = %e, "compaction failed"),
            Err(e) => warn!(error = %e, "compaction task failed"),
        }
    }
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
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
                error!(error = %e, "failed to listen for SIGTERM");
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
    info!("shutdown signal received");
}
