mod api;
mod config;
mod cors;
mod document;
mod error;
mod locks;
mod metrics;
mod ws;

use anyhow::Context;
use axum::{
    body::Body,
    extract::State,
    http::{header::CONTENT_TYPE, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::{sync::Arc, time::Instant};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::RelayConfig;
use crate::error::{
    attach_request_id_header, current_request_id, request_id_from_headers_or_generate,
    with_request_id_scope, ErrorCode, RelayError,
};
use crate::metrics::RelayMetrics;
use crate::ws::CollabState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env();

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .with_context(|| format!("invalid log filter `{}`", config.log_filter))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let relay_metrics = Arc::new(RelayMetrics::default());
    metrics::set_global_metrics(Arc::clone(&relay_metrics));

    let state = match &config.seed_document {
        Some(path) => {
            let xml = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read seed document {}", path.display()))?;
            info!(path = %path.display(), bytes = xml.len(), "loaded seed document");
            CollabState::new(xml)
        }
        None => CollabState::default(),
    };

    let app = build_router(state, relay_metrics, config.cors_origins.as_deref());

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind relay listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "starting relay server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("relay server exited unexpectedly")
}

fn build_router(
    state: CollabState,
    relay_metrics: Arc<RelayMetrics>,
    cors_origins: Option<&str>,
) -> Router {
    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .merge(Router::new().route("/metrics", get(render_metrics)).with_state(relay_metrics))
            .merge(ws::router(state.clone()))
            .merge(api::router(state))
            .fallback(not_found)
            .method_not_allowed_fallback(method_not_allowed),
    )
    .layer(cors::cors_layer(cors_origins))
}

fn apply_middleware(router: Router) -> Router {
    router
        .layer(middleware::from_fn(panic_handler))
        .layer(middleware::from_fn(request_context_middleware))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn render_metrics(State(relay_metrics): State<Arc<RelayMetrics>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        relay_metrics.render_prometheus(),
    )
}

async fn not_found() -> RelayError {
    RelayError::from_code(ErrorCode::NotFound)
}

async fn method_not_allowed() -> RelayError {
    RelayError::from_code(ErrorCode::MethodNotAllowed)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    let request_id = current_request_id().unwrap_or_default();
    let handled = tokio::spawn(with_request_id_scope(request_id, next.run(request))).await;

    match handled {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            RelayError::from_code(ErrorCode::InternalError).into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = with_request_id_scope(request_id.clone(), next.run(request)).await;
    attach_request_id_header(&mut response, &request_id);

    let status = response.status().as_u16();
    let latency_ms = started_at.elapsed().as_millis() as u64;
    metrics::record_http_request(method.as_str(), &path, status, latency_ms);

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status,
        latency_ms,
        "request completed"
    );

    response
}
