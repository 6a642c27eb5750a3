//! HTTP collaborator exposing liveness/readiness to outside observers (container
//! orchestrators, uptime checks). Entirely separate from the reconciliation core: the
//! controller never reads from or writes to this module.
//!
//! `GET /health` reports whether the container runtime is reachable; `GET /metrics` emits a
//! single Prometheus gauge line. Bound to `0.0.0.0:8080`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use log::info;
use serde::Serialize;

pub const BIND_ADDR: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 8080);

/// Narrow capability the health server needs from the container runtime: can it be reached
/// right now? Kept separate from [`crate::source::ContainerRuntime`] so the health server
/// doesn't have to depend on the full source machinery.
pub trait RuntimeReachability: Send + Sync + 'static {
    fn is_reachable(&self) -> bool;
}

#[derive(Clone)]
struct HealthState {
    runtime: Arc<dyn RuntimeReachability>,
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    docker: String,
}

async fn handle_health(State(state): State<HealthState>) -> impl IntoResponse {
    let reachable = tokio::task::spawn_blocking(move || state.runtime.is_reachable())
        .await
        .unwrap_or(false);

    if reachable {
        (StatusCode::OK, Json(HealthBody { status: "healthy", docker: "connected".to_string() }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthBody { status: "unhealthy", docker: "unreachable".to_string() }),
        )
    }
}

async fn handle_metrics() -> impl IntoResponse {
    const BODY: &str =
        "# HELP sherpa_dns_up Whether the sherpa-dns service is up\n# TYPE sherpa_dns_up gauge\nsherpa_dns_up 1\n";
    axum::http::Response::builder()
        .status(StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(axum::body::boxed(axum::body::Full::from(BODY)))
        .expect("static response is well-formed")
}

fn router(runtime: Arc<dyn RuntimeReachability>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .with_state(HealthState { runtime })
}

/// Serves the health/metrics endpoints until `shutdown` resolves. A bind failure is logged and
/// the future simply returns - a failed health server is not a reason to abort the reconciler,
/// which is the whole point of this instance.
pub async fn serve(runtime: Arc<dyn RuntimeReachability>, shutdown: impl std::future::Future<Output = ()> + Send + 'static) {
    let app = router(runtime);
    info!("health check: http://{BIND_ADDR}/health");
    let server = axum::Server::try_bind(&BIND_ADDR)
        .map(|b| b.serve(app.into_make_service()))
        .map_err(|e| e.to_string());
    match server {
        Ok(server) => {
            if let Err(e) = server.with_graceful_shutdown(shutdown).await {
                log::error!("health server exited with an error: {e}");
            }
        }
        Err(e) => log::error!("could not bind health endpoint on {BIND_ADDR}: {e}"),
    }
}
