/**
 * API HTTP - Vue lecture seule de l'état du watchdog
 *
 * RÔLE :
 * Expose l'état de la flotte et les compteurs de santé pour dashboards,
 * scripts et sondes de supervision.
 *
 * ROUTES :
 * - GET /health          → "ok" (liveness, toujours accessible)
 * - GET /system/health   → compteurs + uptime + taille de flotte
 * - GET /vms             → liste des VMs (statut, IP, horodatages RFC3339)
 * - GET /vms/{name}      → détail d'une VM, 404 si inconnue
 *
 * SÉCURITÉ :
 * Si une clé est configurée, header x-api-key obligatoire sauf sur /health.
 */

use crate::health::{HealthTracker, WatchdogHealth};
use crate::state::{SharedRegistry, VmView};
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub registry: SharedRegistry,
    pub health: HealthTracker,
    pub api_key: Option<Arc<str>>,
}

async fn require_api_key(State(app): State<AppState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    let Some(expected) = app.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);
    if !ok {
        warn!(path = %req.uri().path(), "rejected request without valid API key");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/vms", get(get_vms))
        .route("/vms/{name}", get(get_vm))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .with_state(app_state)
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<WatchdogHealth> {
    Json(app.health.get_health(app.registry.len()))
}

// GET /vms
async fn get_vms(State(app): State<AppState>) -> Json<Vec<VmView>> {
    Json(app.registry.snapshot())
}

// GET /vms/{name}
async fn get_vm(State(app): State<AppState>, Path(name): Path<String>) -> Result<Json<VmView>, StatusCode> {
    app.registry.find(&name).map(Json).ok_or(StatusCode::NOT_FOUND)
}

/// Sert l'API jusqu'à annulation.
pub async fn serve(addr: SocketAddr, app_state: AppState, cancel: CancellationToken) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "status API listening");
    axum::serve(listener, build_router(app_state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Registry;
    use crate::status::VmStatus;
    use crate::testing::record;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    fn app(api_key: Option<&str>) -> (Router, SharedRegistry) {
        let registry = Registry::new(vec![record("web", Some("10.0.0.1")), record("db", None)]);
        registry.set_status(0, VmStatus::Running);
        let state = AppState {
            registry: registry.clone(),
            health: HealthTracker::new(),
            api_key: api_key.map(Into::into),
        };
        (build_router(state), registry)
    }

    async fn get(router: &Router, uri: &str, key: Option<&str>) -> (StatusCode, serde_json::Value) {
        let mut req = HttpRequest::builder().uri(uri);
        if let Some(key) = key {
            req = req.header("x-api-key", key);
        }
        let res = router.clone().oneshot(req.body(Body::empty()).unwrap()).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_vms_listing() {
        let (router, _) = app(None);
        let (status, body) = get(&router, "/vms", None).await;
        assert_eq!(status, StatusCode::OK);
        let vms = body.as_array().unwrap();
        assert_eq!(vms.len(), 2);
        assert_eq!(vms[0]["name"], "web");
        assert_eq!(vms[0]["status"], "Running");
        assert_eq!(vms[0]["ip"], "10.0.0.1");
        assert!(vms[1]["ip"].is_null());
        assert!(vms[1]["last_api_check"].is_null());
        assert!(vms[0]["status_since"].as_str().unwrap().contains('T'));
    }

    #[tokio::test]
    async fn test_vm_detail_and_not_found() {
        let (router, _) = app(None);
        let (status, body) = get(&router, "/vms/db", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "Unknown");
        let (status, _) = get(&router, "/vms/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_system_health() {
        let (router, _) = app(None);
        let (status, body) = get(&router, "/system/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["vms_tracked"], 2);
        assert_eq!(body["probes"], 0);
    }

    #[tokio::test]
    async fn test_api_key_required_except_health() {
        let (router, _) = app(Some("s3cret"));
        assert_eq!(get(&router, "/vms", None).await.0, StatusCode::UNAUTHORIZED);
        assert_eq!(get(&router, "/vms", Some("wrong")).await.0, StatusCode::UNAUTHORIZED);
        assert_eq!(get(&router, "/vms", Some("s3cret")).await.0, StatusCode::OK);
        assert_eq!(get(&router, "/health", None).await.0, StatusCode::OK);
    }
}
