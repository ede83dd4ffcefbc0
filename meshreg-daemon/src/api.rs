//! Read-only HTTP status surface.
//!
//! - `GET /api/topology/pods` and `GET /api/status/nodes`: `[{name, ip, ready}]`
//! - `GET /api/status/registrar`: cached handles and retry queue depth

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use meshreg_core::InstanceSnapshot;
use meshreg_registrar::Registrar;

use crate::error::{io_err, DaemonError};
use crate::queue::RetryQueue;
use crate::store::InstanceStore;

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<InstanceStore>,
    pub registrar: Arc<Registrar>,
    pub queue: Arc<RetryQueue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub name: String,
    pub ip: String,
    pub ready: bool,
}

impl From<&InstanceSnapshot> for InstanceInfo {
    fn from(snapshot: &InstanceSnapshot) -> Self {
        Self {
            name: snapshot.name.clone(),
            ip: snapshot.pod_ip.clone(),
            ready: snapshot.is_ready(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrarStatus {
    pub handles: usize,
    pub keys: Vec<String>,
    pub retry_ready: usize,
    pub retry_waiting: usize,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/topology/pods", get(instances))
        .route("/api/status/nodes", get(instances))
        .route("/api/status/registrar", get(registrar_status))
        .with_state(state)
}

async fn instances(State(state): State<ApiState>) -> Json<Vec<InstanceInfo>> {
    let list = state.store.list().await;
    Json(list.iter().map(InstanceInfo::from).collect())
}

async fn registrar_status(State(state): State<ApiState>) -> Json<RegistrarStatus> {
    Json(RegistrarStatus {
        handles: state.registrar.len(),
        keys: state
            .registrar
            .keys()
            .into_iter()
            .map(|key| key.to_string())
            .collect(),
        retry_ready: state.queue.len(),
        retry_waiting: state.queue.waiting(),
    })
}

/// Serve the status routes on `listener` until shutdown.
pub async fn api_task(
    listener: TcpListener,
    state: ApiState,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let addr = listener
        .local_addr()
        .map_err(|e| io_err("status listener", e))?;
    tracing::info!(%addr, "status api listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await
        .map_err(|e| io_err(addr.to_string(), e))
}
