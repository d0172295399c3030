//! Canonical instance record shared by every backend.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::attrs::PluginAttrs;
use crate::error::{RegistryError, Result};

/// Status a backend's healthy state is normalised to.
pub const STATUS_OK: &str = "OK";

/// Status forced onto instances that disappeared between two polls.
pub const STATUS_DEREGISTER: &str = "deregister";

/// Which kind of change a notification batch carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistrationStatus {
    /// Instances that appeared or changed status.
    Register,
    /// Instances that are gone.
    Unregister,
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Register => f.write_str("register"),
            Self::Unregister => f.write_str("unregister"),
        }
    }
}

/// One addressable process registered under a service name.
///
/// Identity is `id` within `name`. Backends fill `status` and normalise
/// `address` when converting their own records; everything else is set by
/// the caller before [`register`](crate::ServiceRegistry::register).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInstance {
    /// Unique instance identifier.
    pub id: String,
    /// Service name the instance belongs to.
    pub name: String,
    /// Network address as `host:port`.
    pub address: String,
    /// Free-form tags used for filtering.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Application metadata published alongside the instance.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Status as reported by the backend.
    #[serde(default)]
    pub status: String,
    /// Backend attribute overrides, resolved by the backend at register time.
    #[serde(default)]
    pub plugin_attrs: PluginAttrs,
}

impl ServerInstance {
    /// Creates an instance with the given identity and address.
    pub fn new(id: impl Into<String>, name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            ..Self::default()
        }
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    /// Splits `address` into host and port.
    pub fn host_port(&self) -> Result<(&str, u16)> {
        split_host_port(&self.address)
    }

    /// Returns true if the instance carries every tag in `tags`.
    pub fn has_tags(&self, tags: &[String]) -> bool {
        tags.iter().all(|t| self.tags.contains(t))
    }
}

/// Splits a `host:port` address. IPv6 hosts may be bracketed.
pub fn split_host_port(address: &str) -> Result<(&str, u16)> {
    let invalid = || RegistryError::InvalidAddress(address.to_owned());

    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    if host.is_empty() {
        return Err(invalid());
    }

    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((host, port))
}
