//! Service registration and discovery for Sextant clusters.
//!
//! Nodes publish themselves under a service name and discover peers through
//! one uniform contract, whichever backend sits behind it:
//!
//! - **Registry**: the [`ServiceRegistry`] contract and its listener types
//! - **Subscription**: the polling engine that turns lookups into change batches
//! - **Directory**: scheme-to-backend resolution for connection strings
//! - **Attrs**: typed backend attributes with string overrides
//!
//! ```no_run
//! # async fn demo() -> sextant_core::Result<()> {
//! use sextant_core::{PluginDirectory, ServerInstance};
//!
//! let directory = PluginDirectory::with_defaults();
//! let connection = directory.connect("memory://127.0.0.1:0?poll=5s")?;
//! connection.registry.start().await?;
//!
//! let me = ServerInstance::new("store-1", "store", "10.0.0.5:6071");
//! connection.registry.register(&me).await?;
//! let peers = connection.registry.lookup("store", &[]).await?;
//! # let _ = peers;
//! # Ok(())
//! # }
//! ```

pub mod attrs;
pub mod config;
pub mod directory;
pub mod error;
pub mod instance;
pub mod registry;
pub mod subscription;

pub use attrs::{AttrSchema, BackendAttrs, CheckType, PluginAttrs};
pub use config::{PluginConfig, RegistryConfig};
pub use directory::{Connection, PluginConstructor, PluginDirectory};
pub use error::{RegistryError, Result};
pub use instance::{RegistrationStatus, ServerInstance, STATUS_DEREGISTER, STATUS_OK};
pub use registry::{
    Listener, ListenerError, MemoryRegistry, MemoryStore, NotifyListener, ServiceRegistry,
};
pub use subscription::{InstanceSource, PollConfig, SubscriptionEngine};
