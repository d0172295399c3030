//! In-process fake Consul agent and listener fixtures.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::json;
use sextant_consul::model::ServiceRegistration;
use sextant_core::{ListenerError, NotifyListener, RegistrationStatus, ServerInstance};

/// A registered service and the statuses of its checks.
#[derive(Debug, Clone)]
pub struct Registered {
    pub registration: ServiceRegistration,
    pub checks: Vec<String>,
}

/// Shared state of the fake agent.
#[derive(Default)]
pub struct FakeConsul {
    services: Mutex<BTreeMap<String, Registered>>,
    tokens: Mutex<Vec<Option<String>>>,
    queries: Mutex<Vec<String>>,
    deregistrations: AtomicUsize,
    pub reject_register: AtomicBool,
    pub reject_deregister: AtomicBool,
}

impl FakeConsul {
    pub fn get(&self, id: &str) -> Option<Registered> {
        self.services.lock().get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.services.lock().keys().cloned().collect()
    }

    /// Registers a record as if another node had done it.
    pub fn insert(&self, registration: ServiceRegistration, checks: &[&str]) {
        self.services.lock().insert(
            registration.id.clone(),
            Registered {
                registration,
                checks: checks.iter().map(|s| (*s).to_owned()).collect(),
            },
        );
    }

    pub fn set_checks(&self, id: &str, checks: &[&str]) {
        if let Some(entry) = self.services.lock().get_mut(id) {
            entry.checks = checks.iter().map(|s| (*s).to_owned()).collect();
        }
    }

    pub fn remove(&self, id: &str) -> bool {
        self.services.lock().remove(id).is_some()
    }

    /// Token header of every request received, in order.
    pub fn tokens(&self) -> Vec<Option<String>> {
        self.tokens.lock().clone()
    }

    /// Raw query strings of every health request.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }

    pub fn deregistrations(&self) -> usize {
        self.deregistrations.load(Ordering::SeqCst)
    }

    fn record_token(&self, headers: &HeaderMap) {
        let token = headers
            .get("x-consul-token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        self.tokens.lock().push(token);
    }
}

async fn register(
    State(state): State<Arc<FakeConsul>>,
    headers: HeaderMap,
    Json(registration): Json<ServiceRegistration>,
) -> StatusCode {
    state.record_token(&headers);
    if state.reject_register.load(Ordering::SeqCst) {
        return StatusCode::BAD_REQUEST;
    }
    state.insert(registration, &["passing"]);
    StatusCode::OK
}

async fn deregister(
    State(state): State<Arc<FakeConsul>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> StatusCode {
    state.record_token(&headers);
    state.deregistrations.fetch_add(1, Ordering::SeqCst);
    if state.reject_deregister.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    if state.remove(&id) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn health(
    State(state): State<Arc<FakeConsul>>,
    headers: HeaderMap,
    Path(service): Path<String>,
    RawQuery(query): RawQuery,
) -> Response {
    state.record_token(&headers);
    let query = query.unwrap_or_default();
    let tags: Vec<String> = url::form_urlencoded::parse(query.as_bytes())
        .filter(|(k, _)| k == "tag")
        .map(|(_, v)| v.into_owned())
        .collect();
    state.queries.lock().push(query);

    let entries: Vec<_> = state
        .services
        .lock()
        .values()
        .filter(|r| r.registration.name == service)
        .filter(|r| tags.iter().all(|t| r.registration.tags.contains(t)))
        .map(|r| {
            let checks: Vec<_> = r
                .checks
                .iter()
                .enumerate()
                .map(|(n, status)| {
                    json!({
                        "CheckID": format!("service:{}:{n}", r.registration.id),
                        "ServiceID": r.registration.id,
                        "Status": status,
                    })
                })
                .collect();
            json!({
                "Node": {"Node": "node-1", "Address": "10.9.9.9", "Datacenter": "dc1"},
                "Service": {
                    "ID": r.registration.id,
                    "Service": r.registration.name,
                    "Tags": r.registration.tags,
                    "Address": r.registration.address,
                    "Port": r.registration.port,
                    "Meta": r.registration.meta,
                },
                "Checks": checks,
            })
        })
        .collect();

    Json(entries).into_response()
}

/// Starts a fake agent on an ephemeral loopback port.
pub async fn spawn_fake() -> (Arc<FakeConsul>, SocketAddr) {
    let state = Arc::new(FakeConsul::default());

    let app = Router::new()
        .route("/v1/agent/service/register", put(register))
        .route("/v1/agent/service/deregister/{id}", put(deregister))
        .route("/v1/health/service/{service}", get(health))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (state, addr)
}

pub fn connection_string(addr: SocketAddr) -> String {
    format!("consul://{addr}?poll=50ms&timeout=2s")
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
