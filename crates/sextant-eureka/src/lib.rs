//! Eureka backend for sextant.
//!
//! Installs the `eureka` scheme:
//!
//! ```no_run
//! use sextant_core::PluginDirectory;
//!
//! let directory = PluginDirectory::with_defaults();
//! sextant_eureka::install(&directory);
//! let connection = directory.connect("eureka://127.0.0.1:8761?poll=10s")?;
//! # Ok::<(), sextant_core::RegistryError>(())
//! ```
//!
//! Lookups filter tags client-side; the only tag Eureka reports is the
//! instance's vip address, which equals its service name.

pub mod attrs;
pub mod client;
pub mod config;
pub mod convert;
pub mod model;
pub mod registry;

use sextant_core::PluginDirectory;

pub use attrs::EurekaAttrs;
pub use client::{EurekaClient, Renewal};
pub use config::EurekaConfig;
pub use registry::EurekaRegistry;

/// Scheme the backend is installed under.
pub const SCHEME: &str = "eureka";

/// Installs the `eureka` backend into `directory`.
pub fn install(directory: &PluginDirectory) {
    directory.add(SCHEME, registry::construct);
}
