mod auth;
mod config;
mod cors;
mod db;
mod error;
mod metrics;
mod rooms;
mod ws;

use anyhow::Context;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{header::CONTENT_TYPE, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::{sync::Arc, time::Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::auth::jwt::JwtAccessTokenService;
use crate::config::RelayConfig;
use crate::error::{
    attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope,
    ErrorCode, RelayError,
};
use crate::metrics::{LiveGauges, RelayMetrics};
use crate::rooms::RoomCatalog;
use crate::ws::directory::RoomDirectory;

const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
struct ObservabilityState {
    metrics: Arc<RelayMetrics>,
    directory: RoomDirectory,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env();
    init_tracing(&config);

    if config.is_dev_jwt_secret() {
        warn!("using the development JWT secret; set WATCHROOM_RELAY_JWT_SECRET in production");
    }

    let jwt_service = Arc::new(
        JwtAccessTokenService::new(&config.jwt_secret).context("invalid relay JWT secret")?,
    );
    let catalog = match config.database_url.as_deref() {
        Some(database_url) => RoomCatalog::connect(database_url)
            .await
            .context("failed to initialize room catalog")?,
        None => {
            warn!("WATCHROOM_RELAY_DATABASE_URL is not set; using an empty in-memory room catalog");
            RoomCatalog::in_memory()
        }
    };

    let metrics = Arc::new(RelayMetrics::default());
    metrics::set_global_metrics(Arc::clone(&metrics));
    let directory = RoomDirectory::new(config.room.clone());

    let app = build_router(&config, jwt_service, directory, catalog.clone(), metrics);

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind relay listener on {}", config.listen_addr))?;

    info!(
        listen_addr = %config.listen_addr,
        catalog = catalog.kind(),
        max_frame_bytes = config.connection.max_frame_bytes,
        outbound_capacity = config.connection.outbound_capacity,
        "starting watch room relay"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("relay server exited unexpectedly")
}

fn init_tracing(config: &RelayConfig) {
    let filter =
        EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_router(
    config: &RelayConfig,
    jwt_service: Arc<JwtAccessTokenService>,
    directory: RoomDirectory,
    catalog: RoomCatalog,
    metrics: Arc<RelayMetrics>,
) -> Router {
    let observability = ObservabilityState { metrics, directory: directory.clone() };

    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .route("/metrics", get(render_metrics))
            .with_state(observability.clone())
            .merge(ws::router(jwt_service, directory, catalog, config.connection.clone()))
            .layer(cors::cors_layer(config.cors_origins.as_deref())),
        observability,
    )
}

fn apply_middleware(router: Router, observability: ObservabilityState) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(middleware::from_fn_with_state(observability, request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn render_metrics(State(state): State<ObservabilityState>) -> Response {
    let gauges = LiveGauges {
        rooms: state.directory.count().await,
        clients: state.directory.total_clients().await,
    };
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render_prometheus(gauges),
    )
        .into_response()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!(?error, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                error!(?error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            RelayError::from_code(ErrorCode::InternalError).into_response()
        }
    }
}

async fn request_context_middleware(
    State(observability): State<ObservabilityState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = with_request_id_scope(request_id.clone(), next.run(request)).await;
    attach_request_id_header(&mut response, &request_id);

    let latency_ms = started_at.elapsed().as_millis() as u64;
    let status = response.status().as_u16();
    observability.metrics.record_http_request(method.as_str(), &path, status, latency_ms);

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

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
        routing::{get, post},
        Router,
    };
    use tower::ServiceExt;

    use super::{apply_middleware, build_router, ObservabilityState, MAX_REQUEST_BODY_BYTES};
    use crate::{
        auth::jwt::JwtAccessTokenService,
        config::{RelayConfig, RoomConfig},
        metrics::RelayMetrics,
        rooms::RoomCatalog,
        ws::directory::RoomDirectory,
    };

    fn observability() -> ObservabilityState {
        ObservabilityState {
            metrics: Arc::new(RelayMetrics::default()),
            directory: RoomDirectory::new(RoomConfig::default()),
        }
    }

    fn test_router() -> Router {
        let jwt_service = Arc::new(
            JwtAccessTokenService::new("watchroom_test_secret_that_is_definitely_long_enough")
                .expect("test jwt service should initialize"),
        );
        build_router(
            &RelayConfig::from_env(),
            jwt_service,
            RoomDirectory::new(RoomConfig::default()),
            RoomCatalog::in_memory(),
            Arc::new(RelayMetrics::default()),
        )
    }

    #[tokio::test]
    async fn health_check_has_request_id_header() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .expect("healthz request should build"),
            )
            .await
            .expect("healthz request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn incoming_request_id_is_echoed() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .header("x-request-id", "req-from-client")
                    .body(Body::empty())
                    .expect("healthz request should build"),
            )
            .await
            .expect("healthz request should succeed");

        assert_eq!(
            response.headers().get("x-request-id").and_then(|value| value.to_str().ok()),
            Some("req-from-client")
        );
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_live_gauges() {
        let app = test_router();
        app.clone()
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).expect("request"))
            .await
            .expect("healthz request should succeed");

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).expect("request"))
            .await
            .expect("metrics request should succeed");
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let text = String::from_utf8(body.to_vec()).expect("metrics should be utf8");
        assert!(text.contains("relay_active_rooms 0"));
        assert!(text.contains("relay_connected_clients 0"));
        assert!(text.contains("relay_request_rate_total{method=\"GET\",endpoint=\"/healthz\"} 1"));
    }

    #[tokio::test]
    async fn websocket_route_requires_authentication() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/v1/rooms/room-1/ws")
                    .body(Body::empty())
                    .expect("ws request should build"),
            )
            .await
            .expect("ws request should return a response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn panic_handler_returns_internal_server_error() {
        async fn panic_route() -> &'static str {
            panic!("test panic");
        }

        let app =
            apply_middleware(Router::new().route("/panic", get(panic_route)), observability());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/panic")
                    .body(Body::empty())
                    .expect("panic request should build"),
            )
            .await
            .expect("panic request should return a response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn request_body_limit_is_enforced() {
        async fn echo(body: String) -> String {
            body
        }

        let oversized_body = "a".repeat(MAX_REQUEST_BODY_BYTES + 1);
        let app = apply_middleware(Router::new().route("/echo", post(echo)), observability());

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/echo")
                    .header("content-type", "text/plain")
                    .body(Body::from(oversized_body))
                    .expect("echo request should build"),
            )
            .await
            .expect("echo request should return a response");

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
