//! Common test utilities for registry integration tests.

#![allow(dead_code, clippy::unwrap_used)]

pub mod fixtures;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sextant_core::{
    ListenerError, MemoryRegistry, MemoryStore, NotifyListener, PollConfig, RegistrationStatus,
    RegistryError, ServerInstance,
};
use tokio::time::Instant;

/// Routes engine logs to the test harness; `RUST_LOG=sextant_core=debug` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll interval used by the test registries.
pub const TICK: Duration = Duration::from_millis(100);

/// One recorded `on_notify` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub status: RegistrationStatus,
    pub ids: Vec<String>,
    pub statuses: Vec<String>,
}

/// Listener that records every callback it receives.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Event>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl NotifyListener for RecordingListener {
    fn on_notify(
        &self,
        status: RegistrationStatus,
        instances: &[ServerInstance],
    ) -> Result<(), ListenerError> {
        self.events.lock().push(Event {
            status,
            ids: instances.iter().map(|i| i.id.clone()).collect(),
            statuses: instances.iter().map(|i| i.status.clone()).collect(),
        });
        Ok(())
    }

    fn on_lookup_error(&self, service: &str, error: &RegistryError) {
        self.errors.lock().push(format!("{service}: {error}"));
    }
}

/// Listener that fails every notification.
#[derive(Debug, Default)]
pub struct FailingListener;

impl NotifyListener for FailingListener {
    fn on_notify(
        &self,
        _status: RegistrationStatus,
        _instances: &[ServerInstance],
    ) -> Result<(), ListenerError> {
        Err("listener rejected batch".into())
    }
}

/// Listener that panics on every callback.
#[derive(Debug, Default)]
pub struct PanickingListener;

impl NotifyListener for PanickingListener {
    fn on_notify(
        &self,
        _status: RegistrationStatus,
        _instances: &[ServerInstance],
    ) -> Result<(), ListenerError> {
        panic!("listener blew up");
    }

    fn on_lookup_error(&self, _service: &str, _error: &RegistryError) {
        panic!("error hook blew up");
    }
}

/// Memory registry plus direct access to its store.
pub struct TestRegistry {
    pub registry: MemoryRegistry,
    pub store: Arc<MemoryStore>,
    started: Instant,
}

impl TestRegistry {
    /// Creates a registry polling every [`TICK`].
    pub fn new() -> Self {
        Self::with_poll(PollConfig::every(TICK))
    }

    pub fn with_poll(poll: PollConfig) -> Self {
        init_tracing();
        let store = Arc::new(MemoryStore::new());
        let registry = MemoryRegistry::with_store(Arc::clone(&store), poll);
        Self {
            registry,
            store,
            started: Instant::now(),
        }
    }

    /// Puts `instances` into the store behind the registry's back.
    pub fn seed(&self, instances: impl IntoIterator<Item = ServerInstance>) {
        for instance in instances {
            self.store.put(instance);
        }
    }
}

impl TestRegistry {
    /// Sleeps past the next `ticks` polls of subscriptions made at creation.
    ///
    /// Wakes halfway between two polls so test steps never race a tick.
    pub async fn wait_ticks(&self, ticks: u32) {
        let elapsed = self.started.elapsed().as_millis();
        let tick = TICK.as_millis();
        let current = u32::try_from(elapsed / tick).unwrap();
        tokio::time::sleep_until(self.started + TICK * (current + ticks) + TICK / 2).await;
    }
}

impl Default for TestRegistry {
    fn default() -> Self {
        Self::new()
    }
}
