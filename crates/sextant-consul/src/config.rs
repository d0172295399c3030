//! Consul connection settings.

use std::time::Duration;

use sextant_core::{PluginConfig, PollConfig, RegistryError, Result};
use url::Url;

/// Settings read from a `consul://` connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsulConfig {
    /// `http` or `https`.
    pub scheme: String,
    /// Agent address as `host:port`.
    pub address: String,
    /// Datacenter queried by lookups; the agent's own when unset.
    pub datacenter: Option<String>,
    /// ACL token sent as `X-Consul-Token`.
    pub token: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
    pub poll: PollConfig,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            scheme: "http".to_owned(),
            address: "127.0.0.1:8500".to_owned(),
            datacenter: None,
            token: None,
            timeout: Duration::from_secs(5),
            poll: PollConfig::every(Duration::from_secs(5))
                .with_max_backoff(Duration::from_secs(60)),
        }
    }
}

impl ConsulConfig {
    /// Reads `scheme`, `datacenter`, `token`, `timeout`, `poll` and
    /// `max_backoff`. Only the first address is used.
    pub fn from_plugin_config(config: &PluginConfig) -> Result<Self> {
        let defaults = Self::default();

        let scheme = config.get("scheme", &defaults.scheme).to_ascii_lowercase();
        if !matches!(scheme.as_str(), "http" | "https") {
            return Err(RegistryError::InvalidConnectionString {
                input: config.as_str().to_owned(),
                reason: format!("unsupported consul scheme: {scheme}"),
            });
        }

        let optional = |key: &str| {
            Some(config.get(key, ""))
                .filter(|v| !v.is_empty())
                .map(str::to_owned)
        };

        Ok(Self {
            scheme,
            address: config.primary_address().to_owned(),
            datacenter: optional("datacenter"),
            token: optional("token"),
            timeout: config.get_duration("timeout", defaults.timeout)?,
            poll: PollConfig::from_options(config, defaults.poll)?,
        })
    }

    /// Base URL of the HTTP API, `{scheme}://{address}/v1/`.
    pub fn api_url(&self) -> Result<Url> {
        let raw = format!("{}://{}/v1/", self.scheme, self.address);
        Url::parse(&raw).map_err(|e| RegistryError::InvalidConnectionString {
            input: raw,
            reason: e.to_string(),
        })
    }
}
