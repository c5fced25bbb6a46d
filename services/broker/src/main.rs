//! SSO broker service
//!
//! Single-binary service that:
//! 1. Hosts the cross-frame message endpoint for embedded client portals
//! 2. Verifies and refreshes client token sets against the auth gateway
//! 3. Keeps its own broker session in a file-backed credential store
//! 4. Serves the login page's session-check and sign-in routes

mod config;
mod handler;
mod metrics;
mod protocol;

use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metrics_exporter_prometheus::PrometheusHandle;

use broker_auth::HttpAuthGateway;
use broker_session::{AuthRequestParams, CredentialStore, SessionService};
use common::Secret;

use crate::config::Config;
use crate::handler::{MessageHandler, MessageSink};
use crate::protocol::{Envelope, MessageSource, ResponseMessage};

/// How long in-flight requests get to drain after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    handler: Arc<MessageHandler>,
    session: Arc<SessionService>,
    prometheus: PrometheusHandle,
    default_redirect_uri: String,
    started_at: Instant,
}

/// Build the axum router with all routes and shared state.
///
/// A concurrency limit layer caps concurrent requests at `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/frame/messages", post(frame_messages_handler))
        .route("/session/check", get(session_check_handler))
        .route("/session/login", post(login_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting sso-broker");

    // Install the Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder()?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.broker.listen_addr,
        origin = %config.broker.origin,
        gateway = %config.gateway.base_url,
        "configuration loaded"
    );

    let store = Arc::new(
        CredentialStore::load(config.credentials.path.clone())
            .await
            .with_context(|| {
                format!(
                    "failed to load credential store from {}",
                    config.credentials.path.display()
                )
            })?,
    );

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.gateway.timeout_secs))
        .build()
        .context("failed to build HTTP client")?;
    let gateway = Arc::new(HttpAuthGateway::new(http_client, &config.gateway.base_url));

    let session = Arc::new(SessionService::new(
        store,
        gateway,
        &config.broker.client_id,
        &config.gateway.base_url,
    ));

    let app_state = AppState {
        handler: Arc::new(MessageHandler::new(&config.broker.origin, session.clone())),
        session,
        prometheus: prometheus_handle,
        default_redirect_uri: config.broker.default_redirect_uri.clone(),
        started_at: Instant::now(),
    };

    let app = build_router(app_state, config.broker.max_connections);

    let listener = TcpListener::bind(config.broker.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.broker.listen_addr))?;

    info!(addr = %config.broker.listen_addr, "accepting requests");

    // Graceful shutdown with drain timeout enforcement:
    // 1. shutdown_signal() fires on SIGTERM/SIGINT
    // 2. axum stops accepting new connections and drains in-flight requests
    // 3. DRAIN_TIMEOUT caps the drain so a slow client cannot block exit
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: always 200 once the listener is up. Gateway health is
/// not probed — a broken gateway surfaces per-message, not per-probe.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Body of `POST /frame/messages`: one cross-frame message as posted by a
/// client frame. `source` defaults to the client-frame side; the broker's
/// own relay marks its messages explicitly.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FrameMessage {
    #[serde(default)]
    source: Option<String>,
    data: Value,
}

/// Collects the messages a single `process` call posts, in order.
#[derive(Default)]
struct BufferSink {
    messages: Mutex<Vec<ResponseMessage>>,
}

impl MessageSink for BufferSink {
    fn post(&self, message: ResponseMessage) {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(message);
    }
}

/// Cross-frame message endpoint.
///
/// Always 200 with the ordered list of response messages — zero for a
/// dropped message, one for a plain response, two when a redirect notice
/// follows. The envelope origin comes from the `Origin` header.
async fn frame_messages_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    axum::Json(message): axum::Json<FrameMessage>,
) -> impl IntoResponse {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    let origin = headers
        .get(axum::http::header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();

    let envelope = Envelope {
        origin,
        source: match message.source.as_deref() {
            Some("broker") => MessageSource::Broker,
            _ => MessageSource::ClientFrame,
        },
        data: message.data,
    };

    debug!(request_id, origin = %envelope.origin, "frame message received");

    let sink = BufferSink::default();
    state.handler.process(&envelope, &sink).await;

    axum::Json(
        sink.messages
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner()),
    )
}

/// Login-page session check.
///
/// Cached auth answers with a 303 to the resolved target (the authorize
/// redirect for a pending client flow, the default otherwise); anything
/// else answers with the JSON state so the page renders its form.
async fn session_check_handler(
    State(state): State<AppState>,
    Query(params): Query<AuthRequestParams>,
) -> Response {
    match state
        .session
        .check_authentication_state(&params, &state.default_redirect_uri)
        .await
    {
        Ok(check) => match (check.cached_auth, &check.redirect) {
            (true, Some(redirect)) => Redirect::to(redirect).into_response(),
            _ => axum::Json(check).into_response(),
        },
        Err(e) => {
            warn!(error = %e, "session check failed");
            (
                axum::http::StatusCode::BAD_GATEWAY,
                axum::Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// Body of `POST /session/login`. The password zeroizes on drop and never
/// appears in logs.
#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: Secret<String>,
}

/// Broker login form submission, relayed to the auth gateway.
async fn login_handler(
    State(state): State<AppState>,
    axum::Json(request): axum::Json<LoginRequest>,
) -> Response {
    match state.session.login(&request.username, &request.password).await {
        Ok(response) => {
            metrics::record_login(if response.success { "success" } else { "failure" });
            axum::Json(response).into_response()
        }
        Err(e) => {
            metrics::record_login("error");
            warn!(error = %e, "login request failed");
            (
                axum::http::StatusCode::BAD_GATEWAY,
                axum::Json(serde_json::json!({ "success": false, "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
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
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
