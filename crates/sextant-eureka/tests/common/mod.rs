//! In-process fake Eureka server and listener fixtures.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use sextant_core::{ListenerError, NotifyListener, RegistrationStatus, ServerInstance};
use sextant_eureka::model::InstanceInfo;

#[derive(Deserialize)]
struct Envelope {
    instance: InstanceInfo,
}

/// Shared state of the fake server.
#[derive(Default)]
pub struct FakeEureka {
    apps: Mutex<HashMap<String, Vec<InstanceInfo>>>,
    heartbeats: Mutex<HashMap<String, usize>>,
    registrations: AtomicUsize,
    cancellations: AtomicUsize,
    pub reject_register: AtomicBool,
    pub reject_deregister: AtomicBool,
    pub garbage_lookup: AtomicBool,
    pub fail_lookup: AtomicBool,
}

impl FakeEureka {
    /// Instances stored for `app`.
    pub fn instances(&self, app: &str) -> Vec<InstanceInfo> {
        self.apps.lock().get(app).cloned().unwrap_or_default()
    }

    /// Inserts a record as if another node had registered it.
    pub fn insert(&self, info: InstanceInfo) {
        let mut apps = self.apps.lock();
        let instances = apps.entry(info.app.clone()).or_default();
        instances.retain(|i| i.instance_id != info.instance_id);
        instances.push(info);
    }

    /// Drops a record as if its lease had expired.
    pub fn evict(&self, app: &str, id: &str) -> bool {
        let mut apps = self.apps.lock();
        let Some(instances) = apps.get_mut(app) else {
            return false;
        };
        let before = instances.len();
        instances.retain(|i| i.instance_id != id);
        instances.len() != before
    }

    pub fn heartbeats(&self, id: &str) -> usize {
        self.heartbeats.lock().get(id).copied().unwrap_or(0)
    }

    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    /// Lease cancellations received, including rejected ones.
    pub fn cancellations(&self) -> usize {
        self.cancellations.load(Ordering::SeqCst)
    }

    fn set_status(&self, app: &str, id: &str, status: &str) -> bool {
        let mut apps = self.apps.lock();
        let Some(info) = apps
            .get_mut(app)
            .and_then(|instances| instances.iter_mut().find(|i| i.instance_id == id))
        else {
            return false;
        };
        info.status = status.to_owned();
        true
    }
}

async fn register(
    State(state): State<Arc<FakeEureka>>,
    Path(app): Path<String>,
    Json(body): Json<Envelope>,
) -> StatusCode {
    if state.reject_register.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    if body.instance.app != app {
        return StatusCode::BAD_REQUEST;
    }
    state.registrations.fetch_add(1, Ordering::SeqCst);
    state.insert(body.instance);
    StatusCode::NO_CONTENT
}

async fn application(State(state): State<Arc<FakeEureka>>, Path(app): Path<String>) -> Response {
    if state.fail_lookup.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    if state.garbage_lookup.load(Ordering::SeqCst) {
        return (StatusCode::OK, "<applications/>").into_response();
    }
    let instances = state.instances(&app);
    if instances.is_empty() {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(json!({
        "application": {
            "name": app.to_uppercase(),
            "instance": instances,
        }
    }))
    .into_response()
}

async fn heartbeat(
    State(state): State<Arc<FakeEureka>>,
    Path((app, id)): Path<(String, String)>,
) -> StatusCode {
    *state.heartbeats.lock().entry(id.clone()).or_default() += 1;
    if state.instances(&app).iter().any(|i| i.instance_id == id) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn cancel(
    State(state): State<Arc<FakeEureka>>,
    Path((app, id)): Path<(String, String)>,
) -> StatusCode {
    state.cancellations.fetch_add(1, Ordering::SeqCst);
    if state.reject_deregister.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    if state.evict(&app, &id) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn override_status(
    State(state): State<Arc<FakeEureka>>,
    Path((app, id)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> StatusCode {
    let status = query.get("value").map_or("UNKNOWN", String::as_str);
    if state.set_status(&app, &id, status) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn clear_status(
    State(state): State<Arc<FakeEureka>>,
    Path((app, id)): Path<(String, String)>,
) -> StatusCode {
    if state.set_status(&app, &id, "UP") {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

/// Starts a fake server on an ephemeral loopback port.
pub async fn spawn_fake() -> (Arc<FakeEureka>, SocketAddr) {
    let state = Arc::new(FakeEureka::default());

    let app = Router::new()
        .route("/eureka/apps/{app}", get(application).post(register))
        .route("/eureka/apps/{app}/{id}", delete(cancel).put(heartbeat))
        .route(
            "/eureka/apps/{app}/{id}/status",
            delete(clear_status).put(override_status),
        )
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (state, addr)
}

/// Connection string for a fake server with fast polling.
pub fn connection_string(addr: SocketAddr) -> String {
    format!("eureka://{addr}?poll=50ms&timeout=2s")
}

/// Waits until `condition` holds, failing the test after two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Listener that records every batch it receives.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<(RegistrationStatus, Vec<ServerInstance>)>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<(RegistrationStatus, Vec<ServerInstance>)> {
        self.events.lock().clone()
    }
}

impl NotifyListener for RecordingListener {
    fn on_notify(
        &self,
        status: RegistrationStatus,
        instances: &[ServerInstance],
    ) -> Result<(), ListenerError> {
        self.events.lock().push((status, instances.to_vec()));
        Ok(())
    }
}
