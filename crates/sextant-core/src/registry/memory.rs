//! In-process registry backend for tests and single-node deployments.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

use super::{Listener, ServiceRegistry};
use crate::attrs::PluginAttrs;
use crate::config::PluginConfig;
use crate::error::{RegistryError, Result};
use crate::instance::{ServerInstance, STATUS_OK};
use crate::subscription::{InstanceSource, PollConfig, SubscriptionEngine};

/// Scheme the memory backend is installed under.
pub const SCHEME: &str = "memory";

/// Instance storage behind [`MemoryRegistry`].
///
/// Exposed separately so tests can change instances behind a subscriber's
/// back and simulate an unreachable backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    services: DashMap<String, BTreeMap<String, ServerInstance>>,
    /// Instance id to service name.
    owners: DashMap<String, String>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an instance.
    pub fn put(&self, instance: ServerInstance) {
        if let Some(previous) = self.owners.insert(instance.id.clone(), instance.name.clone()) {
            if previous != instance.name {
                self.remove_from(&previous, &instance.id);
            }
        }
        self.services
            .entry(instance.name.clone())
            .or_default()
            .insert(instance.id.clone(), instance);
    }

    /// Removes an instance, returning it if it existed.
    pub fn remove(&self, id: &str) -> Option<ServerInstance> {
        let (_, service) = self.owners.remove(id)?;
        self.remove_from(&service, id)
    }

    fn remove_from(&self, service: &str, id: &str) -> Option<ServerInstance> {
        let removed = self.services.get_mut(service)?.remove(id);
        self.services.remove_if(service, |_, instances| instances.is_empty());
        removed
    }

    /// Number of services with at least one stored instance.
    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    /// Overwrites the status of a stored instance.
    pub fn set_status(&self, id: &str, status: &str) -> Result<()> {
        let service = self
            .owners
            .get(id)
            .map(|r| r.value().clone())
            .ok_or_else(|| RegistryError::NotRegistered(id.to_owned()))?;

        let mut instances = self
            .services
            .get_mut(&service)
            .ok_or_else(|| RegistryError::NotRegistered(id.to_owned()))?;
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotRegistered(id.to_owned()))?;
        instance.status = status.to_owned();
        Ok(())
    }

    /// Makes every listing fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Lists the instances of `service` that carry every tag in `tags`.
    pub fn list(&self, service: &str, tags: &[String]) -> Result<Vec<ServerInstance>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RegistryError::backend(SCHEME, "lookup", "store unavailable"));
        }

        Ok(self
            .services
            .get(service)
            .map(|instances| {
                instances
                    .values()
                    .filter(|i| i.has_tags(tags))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Total number of stored instances.
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

#[async_trait]
impl InstanceSource for MemoryStore {
    async fn fetch(&self, service: &str) -> Result<Vec<ServerInstance>> {
        self.list(service, &[])
    }
}

/// Registry backed by a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryRegistry {
    store: Arc<MemoryStore>,
    engine: SubscriptionEngine<MemoryStore>,
    shut_down: AtomicBool,
}

impl MemoryRegistry {
    /// Creates a registry over a fresh store.
    pub fn new(poll: PollConfig) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), poll)
    }

    /// Creates a registry over a shared store.
    pub fn with_store(store: Arc<MemoryStore>, poll: PollConfig) -> Self {
        Self {
            engine: SubscriptionEngine::new(Arc::clone(&store), poll),
            store,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Builds a registry from a `memory://` connection string.
    ///
    /// Recognised options: `poll` and `max_backoff` durations.
    pub fn from_config(config: &PluginConfig) -> Result<Self> {
        Ok(Self::new(PollConfig::from_options(
            config,
            PollConfig::default(),
        )?))
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// The subscription engine.
    pub const fn engine(&self) -> &SubscriptionEngine<MemoryStore> {
        &self.engine
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(RegistryError::ShutDown);
        }
        Ok(())
    }
}

/// Plugin constructor for the `memory` scheme.
pub fn construct(config: &PluginConfig) -> Result<(ServerInstance, Arc<dyn ServiceRegistry>)> {
    let registry = MemoryRegistry::from_config(config)?;
    Ok((ServerInstance::default(), Arc::new(registry)))
}

#[async_trait]
impl ServiceRegistry for MemoryRegistry {
    fn name(&self) -> &'static str {
        SCHEME
    }

    async fn start(&self) -> Result<()> {
        self.ensure_running()
    }

    async fn shutdown(&self, interrupt: bool) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.engine.shutdown(interrupt).await;
        info!(backend = SCHEME, "registry shut down");
    }

    async fn register(&self, instance: &ServerInstance) -> Result<()> {
        self.ensure_running()?;
        instance.host_port()?;

        let mut stored = instance.clone();
        if stored.status.is_empty() {
            stored.status = STATUS_OK.to_owned();
        }

        info!(
            service = %instance.name,
            instance_id = %instance.id,
            address = %instance.address,
            "instance registered"
        );
        self.store.put(stored);
        Ok(())
    }

    async fn unregister(&self, id: &str) -> Result<()> {
        self.ensure_running()?;
        match self.store.remove(id) {
            Some(instance) => {
                info!(service = %instance.name, instance_id = %id, "instance unregistered");
                Ok(())
            }
            None => {
                debug!(instance_id = %id, "unregister for unknown instance");
                Err(RegistryError::NotRegistered(id.to_owned()))
            }
        }
    }

    async fn lookup(&self, service: &str, tags: &[String]) -> Result<Vec<ServerInstance>> {
        self.ensure_running()?;
        self.store.list(service, tags)
    }

    async fn subscribe(&self, service: &str, listener: Listener) -> Result<()> {
        self.ensure_running()?;
        self.engine.subscribe(service, listener)
    }

    async fn unsubscribe(&self, service: &str, listener: &Listener) -> Result<()> {
        self.engine.unsubscribe(service, listener)
    }

    fn check_attrs(&self, _attrs: &PluginAttrs) -> Result<()> {
        Ok(())
    }
}
