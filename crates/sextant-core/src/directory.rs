//! Scheme-to-backend lookup used to open a registry from a connection string.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::{PluginConfig, RegistryConfig};
use crate::error::{RegistryError, Result};
use crate::instance::ServerInstance;
use crate::registry::{memory, ServiceRegistry};

/// Builds a backend from a parsed connection string.
///
/// Returns a template instance carrying backend defaults, plus the registry
/// handle itself.
pub type PluginConstructor =
    Arc<dyn Fn(&PluginConfig) -> Result<(ServerInstance, Arc<dyn ServiceRegistry>)> + Send + Sync>;

/// A connected backend.
#[derive(Clone)]
pub struct Connection {
    /// Template for instances this process registers.
    pub template: ServerInstance,
    /// The backend handle.
    pub registry: Arc<dyn ServiceRegistry>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("backend", &self.registry.name())
            .field("template", &self.template)
            .finish()
    }
}

/// Table of installed backends, keyed by scheme.
#[derive(Default)]
pub struct PluginDirectory {
    plugins: RwLock<HashMap<String, PluginConstructor>>,
}

impl PluginDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a directory with the in-process `memory` backend installed.
    #[must_use]
    pub fn with_defaults() -> Self {
        let directory = Self::new();
        directory.add(memory::SCHEME, memory::construct);
        directory
    }

    /// Installs `constructor` for `scheme`. A later call for the same scheme
    /// replaces the earlier one.
    pub fn add<F>(&self, scheme: &str, constructor: F)
    where
        F: Fn(&PluginConfig) -> Result<(ServerInstance, Arc<dyn ServiceRegistry>)>
            + Send
            + Sync
            + 'static,
    {
        let scheme = scheme.to_ascii_lowercase();
        if self
            .plugins
            .write()
            .insert(scheme.clone(), Arc::new(constructor))
            .is_some()
        {
            debug!(scheme = %scheme, "registry backend replaced");
        } else {
            debug!(scheme = %scheme, "registry backend installed");
        }
    }

    /// Returns the constructor for `scheme`.
    pub fn resolve(&self, scheme: &str) -> Option<PluginConstructor> {
        self.plugins
            .read()
            .get(&scheme.to_ascii_lowercase())
            .cloned()
    }

    /// Installed schemes, sorted.
    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.plugins.read().keys().cloned().collect();
        schemes.sort();
        schemes
    }

    /// Parses `connection` and builds the backend it names.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidConnectionString`] for a malformed
    /// string and [`RegistryError::UnknownBackend`] if no backend is
    /// installed for its scheme.
    pub fn connect(&self, connection: &str) -> Result<Connection> {
        self.connect_with(&PluginConfig::parse(connection)?)
    }

    /// Builds the backend named by an already parsed connection string.
    pub fn connect_with(&self, config: &PluginConfig) -> Result<Connection> {
        let constructor = self
            .resolve(&config.plugin)
            .ok_or_else(|| RegistryError::UnknownBackend(config.plugin.clone()))?;

        // The lock is released before the constructor runs.
        let (template, registry) = constructor(config)?;

        info!(
            backend = registry.name(),
            addresses = ?config.addresses,
            "registry backend connected"
        );
        Ok(Connection { template, registry })
    }

    /// Connects the backend described by `config` and applies its attribute
    /// overrides to the template, validating them against the backend.
    pub fn open(&self, config: &RegistryConfig) -> Result<Connection> {
        let mut connection = self.connect_with(&config.plugin_config()?)?;
        connection
            .template
            .plugin_attrs
            .extend(config.attrs.iter().map(|(k, v)| (k.clone(), v.clone())));
        connection
            .registry
            .check_attrs(&connection.template.plugin_attrs)?;
        Ok(connection)
    }
}

impl fmt::Debug for PluginDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDirectory")
            .field("schemes", &self.schemes())
            .finish()
    }
}
