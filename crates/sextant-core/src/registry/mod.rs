//! Service registry contract every backend implements.
//!
//! Nodes publish themselves with [`ServiceRegistry::register`] and find
//! peers either with a point-in-time [`ServiceRegistry::lookup`] or by
//! subscribing a [`NotifyListener`] that receives add/remove batches.

pub(crate) mod memory;

use std::sync::Arc;

use async_trait::async_trait;

pub use memory::{MemoryRegistry, MemoryStore};

use crate::attrs::PluginAttrs;
use crate::error::{RegistryError, Result};
use crate::instance::{RegistrationStatus, ServerInstance};

/// Error type a listener may return from a notification.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Receives change batches for one or more subscribed services.
///
/// Listener identity is the allocation behind the `Arc`: subscribing the
/// same `Arc` twice is a no-op, a clone of it unsubscribes it.
pub trait NotifyListener: Send + Sync {
    /// Called with a non-empty batch of instances that were added or changed
    /// status ([`RegistrationStatus::Register`]) or disappeared
    /// ([`RegistrationStatus::Unregister`]).
    ///
    /// A returned error or a panic is logged and does not affect other
    /// listeners or later polls.
    fn on_notify(
        &self,
        status: RegistrationStatus,
        instances: &[ServerInstance],
    ) -> std::result::Result<(), ListenerError>;

    /// Called when a poll for `service` failed.
    ///
    /// This is the only signal a subscriber gets about a failing backend;
    /// without it a persistently failing lookup produces no events at all.
    fn on_lookup_error(&self, service: &str, error: &RegistryError) {
        let _ = (service, error);
    }
}

/// Shared handle to a listener.
pub type Listener = Arc<dyn NotifyListener>;

/// Uniform contract over service discovery backends.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Scheme the backend is installed under.
    fn name(&self) -> &'static str;

    /// Backend warm-up. Must be called before any other method.
    async fn start(&self) -> Result<()>;

    /// Stops every subscription owned by this backend and releases its
    /// resources. With `interrupt`, in-flight polls are abandoned instead
    /// of finishing their current tick.
    async fn shutdown(&self, interrupt: bool);

    /// Publishes `instance`. Repeated calls for the same id refresh it.
    ///
    /// # Errors
    ///
    /// Fails on a malformed address, an attribute override that does not
    /// parse, a backend rejection or an I/O error. Nothing is retried.
    async fn register(&self, instance: &ServerInstance) -> Result<()>;

    /// Removes a previously registered instance.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotRegistered`] if `id` has no active
    /// registration through this backend.
    async fn unregister(&self, id: &str) -> Result<()>;

    /// Lists the current instances of `service`.
    ///
    /// A non-empty `tags` keeps only instances carrying all of them.
    async fn lookup(&self, service: &str, tags: &[String]) -> Result<Vec<ServerInstance>>;

    /// Adds `listener` to the change feed for `service`.
    async fn subscribe(&self, service: &str, listener: Listener) -> Result<()>;

    /// Removes `listener` from the change feed for `service`.
    async fn unsubscribe(&self, service: &str, listener: &Listener) -> Result<()>;

    /// Validates attribute overrides against this backend's schema.
    fn check_attrs(&self, attrs: &PluginAttrs) -> Result<()>;
}
