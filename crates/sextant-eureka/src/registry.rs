//! [`ServiceRegistry`] over a Eureka server.
//!
//! Eureka leases expire unless renewed, so every registration owns a
//! renewal task that heartbeats at the instance's `interval`. The task
//! re-registers the instance if the server has forgotten it (e.g. after a
//! server restart) and stops when the instance is unregistered or the
//! registry shuts down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use sextant_core::{
    BackendAttrs, InstanceSource, Listener, PluginAttrs, PluginConfig, RegistryError, Result,
    ServerInstance, ServiceRegistry, SubscriptionEngine,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::attrs::EurekaAttrs;
use crate::client::{EurekaClient, Renewal};
use crate::config::EurekaConfig;
use crate::convert::to_instance_info;
use crate::model::InstanceInfo;
use crate::SCHEME;

/// An active registration and its renewal task.
struct Lease {
    info: InstanceInfo,
    attrs: EurekaAttrs,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Lease {
    fn stop(&self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

/// Eureka-backed service registry.
pub struct EurekaRegistry {
    client: Arc<EurekaClient>,
    engine: SubscriptionEngine<EurekaClient>,
    leases: DashMap<String, Lease>,
    root: CancellationToken,
    shut_down: AtomicBool,
}

impl EurekaRegistry {
    /// Creates a registry from configuration.
    pub fn new(config: &EurekaConfig) -> Result<Self> {
        let client = Arc::new(EurekaClient::new(config)?);
        Ok(Self {
            engine: SubscriptionEngine::new(Arc::clone(&client), config.poll),
            client,
            leases: DashMap::new(),
            root: CancellationToken::new(),
            shut_down: AtomicBool::new(false),
        })
    }

    /// The subscription engine.
    pub const fn engine(&self) -> &SubscriptionEngine<EurekaClient> {
        &self.engine
    }

    /// Ids of the instances registered through this registry, sorted.
    pub fn registered_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.leases.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Takes a registered instance out of rotation without cancelling its lease.
    pub async fn take_out_of_service(&self, id: &str) -> Result<()> {
        let app = self.app_of(id)?;
        self.client.take_out_of_service(&app, id).await?;
        info!(instance_id = %id, "instance taken out of service");
        Ok(())
    }

    /// Puts an instance taken out of service back into rotation.
    pub async fn put_in_service(&self, id: &str) -> Result<()> {
        let app = self.app_of(id)?;
        self.client.clear_status_override(&app, id).await?;
        info!(instance_id = %id, "instance back in service");
        Ok(())
    }

    /// Spawns the renewal task for a freshly registered lease.
    fn start_lease(&self, info: InstanceInfo, attrs: EurekaAttrs) -> Lease {
        let cancel = self.root.child_token();
        let task = tokio::spawn(
            Renewer {
                client: Arc::clone(&self.client),
                info: info.clone(),
                attrs: attrs.clone(),
                cancel: cancel.clone(),
            }
            .run(),
        );
        Lease {
            info,
            attrs,
            cancel,
            task,
        }
    }

    fn app_of(&self, id: &str) -> Result<String> {
        self.leases
            .get(id)
            .map(|lease| lease.info.app.clone())
            .ok_or_else(|| RegistryError::NotRegistered(id.to_owned()))
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(RegistryError::ShutDown);
        }
        Ok(())
    }
}

/// Plugin constructor for the `eureka` scheme.
///
/// The template instance carries the default attributes.
pub fn construct(config: &PluginConfig) -> Result<(ServerInstance, Arc<dyn ServiceRegistry>)> {
    let registry = EurekaRegistry::new(&EurekaConfig::from_plugin_config(config)?)?;
    let template = ServerInstance {
        plugin_attrs: EurekaAttrs::default().to_plugin_attrs(),
        ..ServerInstance::default()
    };
    Ok((template, Arc::new(registry)))
}

#[async_trait]
impl ServiceRegistry for EurekaRegistry {
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
        self.root.cancel();

        let ids = self.registered_ids();
        for id in ids {
            let Some((_, lease)) = self.leases.remove(&id) else {
                continue;
            };
            lease.stop();

            if interrupt {
                continue;
            }
            if let Err(e) = self
                .client
                .deregister(&lease.info.app, &id, lease.attrs.request_timeout)
                .await
            {
                warn!(instance_id = %id, error = %e, "deregister on shutdown failed");
            }
        }

        info!(backend = SCHEME, interrupt, "registry shut down");
    }

    async fn register(&self, instance: &ServerInstance) -> Result<()> {
        self.ensure_running()?;

        let attrs = EurekaAttrs::resolve(&instance.plugin_attrs)?;
        let info = to_instance_info(instance, &attrs)?;

        self.client.register(&info, attrs.request_timeout).await?;

        info!(
            service = %instance.name,
            instance_id = %info.instance_id,
            address = %instance.address,
            renew_every_ms = attrs.interval.as_millis(),
            "instance registered"
        );

        let id = info.instance_id.clone();
        let lease = self.start_lease(info, attrs);
        if let Some(previous) = self.leases.insert(id, lease) {
            previous.stop();
        }
        Ok(())
    }

    async fn unregister(&self, id: &str) -> Result<()> {
        self.ensure_running()?;

        let (_, lease) = self
            .leases
            .remove(id)
            .ok_or_else(|| RegistryError::NotRegistered(id.to_owned()))?;
        lease.stop();

        let Lease { info, attrs, .. } = lease;
        if let Err(e) = self
            .client
            .deregister(&info.app, id, attrs.request_timeout)
            .await
        {
            // The server still holds the lease; keep renewing it so the caller can retry.
            warn!(instance_id = %id, error = %e, "deregister failed, lease kept");
            self.leases
                .entry(id.to_owned())
                .or_insert_with(|| self.start_lease(info, attrs));
            return Err(e);
        }

        info!(service = %info.app, instance_id = %id, "instance unregistered");
        Ok(())
    }

    async fn lookup(&self, service: &str, tags: &[String]) -> Result<Vec<ServerInstance>> {
        self.ensure_running()?;
        let mut instances = self.client.fetch(service).await?;
        instances.retain(|i| i.has_tags(tags));
        Ok(instances)
    }

    async fn subscribe(&self, service: &str, listener: Listener) -> Result<()> {
        self.ensure_running()?;
        self.engine.subscribe(service, listener)
    }

    async fn unsubscribe(&self, service: &str, listener: &Listener) -> Result<()> {
        self.engine.unsubscribe(service, listener)
    }

    fn check_attrs(&self, attrs: &PluginAttrs) -> Result<()> {
        EurekaAttrs::resolve(attrs).map(drop)
    }
}

impl Drop for EurekaRegistry {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

impl std::fmt::Debug for EurekaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EurekaRegistry")
            .field("client", &self.client)
            .field("leases", &self.leases.len())
            .field("engine", &self.engine)
            .finish()
    }
}

/// Heartbeat loop for one lease.
struct Renewer {
    client: Arc<EurekaClient>,
    info: InstanceInfo,
    attrs: EurekaAttrs,
    cancel: CancellationToken,
}

impl Renewer {
    async fn run(self) {
        let app = &self.info.app;
        let id = &self.info.instance_id;
        let timeout = self.attrs.request_timeout;

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.attrs.interval) => {}
            }

            match self.client.heartbeat(app, id, timeout).await {
                Ok(Renewal::Renewed) => {
                    debug!(instance_id = %id, "lease renewed");
                }
                Ok(Renewal::Unknown) => {
                    warn!(instance_id = %id, "lease unknown to server, registering again");
                    if let Err(e) = self.client.register(&self.info, timeout).await {
                        warn!(instance_id = %id, error = %e, "re-registration failed");
                    }
                }
                Err(e) => {
                    warn!(instance_id = %id, error = %e, "lease renewal failed");
                }
            }
        }

        debug!(instance_id = %id, "lease renewal stopped");
    }
}
