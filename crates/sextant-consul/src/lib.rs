//! Consul backend for sextant.
//!
//! Installs the `consul` scheme. Instances are registered with the local
//! agent together with a health check the agent runs on their behalf, so
//! no renewal task is needed. Lookups go through the health endpoint and
//! report each instance's aggregated check status.
//!
//! ```no_run
//! use sextant_core::PluginDirectory;
//!
//! let directory = PluginDirectory::with_defaults();
//! sextant_consul::install(&directory);
//! let connection = directory.connect("consul://127.0.0.1:8500?datacenter=dc1")?;
//! # Ok::<(), sextant_core::RegistryError>(())
//! ```

pub mod attrs;
pub mod client;
pub mod config;
pub mod convert;
pub mod model;
pub mod registry;

use sextant_core::PluginDirectory;

pub use attrs::ConsulAttrs;
pub use client::ConsulClient;
pub use config::ConsulConfig;
pub use registry::ConsulRegistry;

/// Scheme the backend is installed under.
pub const SCHEME: &str = "consul";

/// Installs the `consul` backend into `directory`.
pub fn install(directory: &PluginDirectory) {
    directory.add(SCHEME, registry::construct);
}
