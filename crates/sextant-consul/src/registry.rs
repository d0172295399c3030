//! [`ServiceRegistry`] over a Consul agent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use sextant_core::{
    BackendAttrs, Listener, PluginAttrs, PluginConfig, RegistryError, Result, ServerInstance,
    ServiceRegistry, SubscriptionEngine,
};
use tracing::{info, warn};

use crate::attrs::ConsulAttrs;
use crate::client::ConsulClient;
use crate::config::ConsulConfig;
use crate::convert::{to_registration, to_server_instance};
use crate::SCHEME;

/// Consul-backed service registry.
///
/// Consul only deregisters an instance by id, so the registry remembers
/// which ids it registered and the service each belongs to.
pub struct ConsulRegistry {
    client: Arc<ConsulClient>,
    engine: SubscriptionEngine<ConsulClient>,
    registered: DashMap<String, String>,
    shut_down: AtomicBool,
}

impl ConsulRegistry {
    /// Creates a registry from configuration.
    pub fn new(config: &ConsulConfig) -> Result<Self> {
        let client = Arc::new(ConsulClient::new(config)?);
        Ok(Self {
            engine: SubscriptionEngine::new(Arc::clone(&client), config.poll),
            client,
            registered: DashMap::new(),
            shut_down: AtomicBool::new(false),
        })
    }

    /// The subscription engine.
    pub const fn engine(&self) -> &SubscriptionEngine<ConsulClient> {
        &self.engine
    }

    /// Ids of the instances registered through this registry, sorted.
    pub fn registered_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.registered.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(RegistryError::ShutDown);
        }
        Ok(())
    }
}

/// Plugin constructor for the `consul` scheme.
pub fn construct(config: &PluginConfig) -> Result<(ServerInstance, Arc<dyn ServiceRegistry>)> {
    let registry = ConsulRegistry::new(&ConsulConfig::from_plugin_config(config)?)?;
    let template = ServerInstance {
        plugin_attrs: ConsulAttrs::default().to_plugin_attrs(),
        ..ServerInstance::default()
    };
    Ok((template, Arc::new(registry)))
}

#[async_trait]
impl ServiceRegistry for ConsulRegistry {
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

        let ids = self.registered_ids();
        self.registered.clear();
        if !interrupt {
            for id in ids {
                if let Err(e) = self.client.deregister(&id).await {
                    warn!(instance_id = %id, error = %e, "deregister on shutdown failed");
                }
            }
        }

        info!(backend = SCHEME, interrupt, "registry shut down");
    }

    async fn register(&self, instance: &ServerInstance) -> Result<()> {
        self.ensure_running()?;

        let attrs = ConsulAttrs::resolve(&instance.plugin_attrs)?;
        let registration = to_registration(instance, &attrs)?;
        self.client.register(&registration).await?;

        info!(
            service = %registration.name,
            instance_id = %registration.id,
            address = %instance.address,
            check = %attrs.check_type,
            "instance registered"
        );
        self.registered.insert(registration.id, registration.name);
        Ok(())
    }

    async fn unregister(&self, id: &str) -> Result<()> {
        self.ensure_running()?;

        let service = self
            .registered
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RegistryError::NotRegistered(id.to_owned()))?;

        // The id stays known until the agent confirms, so a failed call can be retried.
        self.client.deregister(id).await?;
        self.registered.remove(id);
        info!(service = %service, instance_id = %id, "instance unregistered");
        Ok(())
    }

    async fn lookup(&self, service: &str, tags: &[String]) -> Result<Vec<ServerInstance>> {
        self.ensure_running()?;
        Ok(self
            .client
            .health(service, tags)
            .await?
            .iter()
            .map(|entry| to_server_instance(service, entry))
            .filter(|i| i.has_tags(tags))
            .collect())
    }

    async fn subscribe(&self, service: &str, listener: Listener) -> Result<()> {
        self.ensure_running()?;
        self.engine.subscribe(service, listener)
    }

    async fn unsubscribe(&self, service: &str, listener: &Listener) -> Result<()> {
        self.engine.unsubscribe(service, listener)
    }

    fn check_attrs(&self, attrs: &PluginAttrs) -> Result<()> {
        ConsulAttrs::resolve(attrs).map(drop)
    }
}

impl std::fmt::Debug for ConsulRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsulRegistry")
            .field("client", &self.client)
            .field("registered", &self.registered.len())
            .finish()
    }
}
