/*!
Passerelle de contrôle factice

Chaque VM est servie sous `/{vm}` : `GET /{vm}/info` renvoie statut (en
majuscules, comme l'API réelle) et interfaces réseau, `POST /{vm}/start`
applique le `StartBehavior` programmé.
*/

use crate::spawn_server;
use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Réponse de `/start`.
#[derive(Debug, Clone)]
pub enum StartBehavior {
    /// 200, puis la VM passe au statut donné.
    Accept { then: String },
    /// Erreur `code 9 / RUNNING` avec l'adresse courante.
    AlreadyRunning,
    /// Erreur HTTP brute.
    Fail { code: u16, body: String },
}

#[derive(Debug, Clone)]
struct FakeVm {
    status: String,
    ip: Option<String>,
    nat_ip: Option<String>,
    start: StartBehavior,
    info_calls: u32,
    start_calls: u32,
}

type Vms = Arc<Mutex<HashMap<String, FakeVm>>>;

pub struct FakeGateway {
    base_url: String,
    vms: Vms,
    handle: JoinHandle<()>,
}

impl FakeGateway {
    pub async fn start() -> Result<Self> {
        let vms: Vms = Arc::new(Mutex::new(HashMap::new()));
        let router = Router::new()
            .route("/{vm}/info", get(info))
            .route("/{vm}/start", post(start))
            .with_state(vms.clone());
        let (base_url, handle) = spawn_server(router).await?;
        tracing::debug!(%base_url, "fake gateway listening");
        Ok(Self { base_url, vms, handle })
    }

    /// Ajoute (ou remplace) une VM ; `/start` accepte et passe à RUNNING.
    pub fn add_vm(&self, name: &str, status: &str, ip: Option<&str>) {
        self.vms.lock().insert(
            name.to_string(),
            FakeVm {
                status: status.to_string(),
                ip: ip.map(Into::into),
                nat_ip: None,
                start: StartBehavior::Accept { then: "RUNNING".into() },
                info_calls: 0,
                start_calls: 0,
            },
        );
    }

    pub fn base_url(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name)
    }

    pub fn set_status(&self, name: &str, status: &str) {
        if let Some(vm) = self.vms.lock().get_mut(name) {
            vm.status = status.to_string();
        }
    }

    pub fn set_nat_ip(&self, name: &str, nat_ip: Option<&str>) {
        if let Some(vm) = self.vms.lock().get_mut(name) {
            vm.nat_ip = nat_ip.map(Into::into);
        }
    }

    pub fn set_start(&self, name: &str, behavior: StartBehavior) {
        if let Some(vm) = self.vms.lock().get_mut(name) {
            vm.start = behavior;
        }
    }

    pub fn status(&self, name: &str) -> Option<String> {
        self.vms.lock().get(name).map(|vm| vm.status.clone())
    }

    pub fn info_calls(&self, name: &str) -> u32 {
        self.vms.lock().get(name).map_or(0, |vm| vm.info_calls)
    }

    pub fn start_calls(&self, name: &str) -> u32 {
        self.vms.lock().get(name).map_or(0, |vm| vm.start_calls)
    }
}

impl Drop for FakeGateway {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn info(State(vms): State<Vms>, Path(name): Path<String>) -> Response {
    let mut vms = vms.lock();
    let Some(vm) = vms.get_mut(&name) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "code": 5, "message": "not found" }))).into_response();
    };
    vm.info_calls += 1;

    let interfaces = match &vm.ip {
        Some(ip) => {
            let mut primary = json!({ "address": ip });
            if let Some(nat) = &vm.nat_ip {
                primary["oneToOneNat"] = json!({ "address": nat });
            }
            json!([{ "primaryV4Address": primary }])
        }
        None => json!([]),
    };
    Json(json!({ "status": vm.status, "networkInterfaces": interfaces })).into_response()
}

async fn start(State(vms): State<Vms>, Path(name): Path<String>) -> Response {
    let mut vms = vms.lock();
    let Some(vm) = vms.get_mut(&name) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "code": 5, "message": "not found" }))).into_response();
    };
    vm.start_calls += 1;

    match vm.start.clone() {
        StartBehavior::Accept { then } => {
            vm.status = then;
            (StatusCode::OK, Json(json!({ "done": false }))).into_response()
        }
        StartBehavior::AlreadyRunning => {
            let ip = vm.nat_ip.clone().or_else(|| vm.ip.clone());
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "code": 9, "message": "RUNNING", "ip": ip })),
            )
                .into_response()
        }
        StartBehavior::Fail { code, body } => {
            let code = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (code, body).into_response()
        }
    }
}
