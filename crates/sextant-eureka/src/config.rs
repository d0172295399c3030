//! Eureka connection settings.

use std::time::Duration;

use sextant_core::{PluginConfig, PollConfig, RegistryError, Result};
use url::Url;

/// Settings read from a `eureka://` connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EurekaConfig {
    /// `http` or `https`.
    pub scheme: String,
    /// Server address as `host:port`.
    pub address: String,
    /// Timeout for lookups.
    pub timeout: Duration,
    /// Subscription polling cadence.
    pub poll: PollConfig,
}

impl Default for EurekaConfig {
    fn default() -> Self {
        Self {
            scheme: "http".to_owned(),
            address: "127.0.0.1:8761".to_owned(),
            timeout: Duration::from_secs(5),
            poll: PollConfig::every(Duration::from_secs(5))
                .with_max_backoff(Duration::from_secs(60)),
        }
    }
}

impl EurekaConfig {
    /// Reads `scheme`, `timeout`, `poll` and `max_backoff` options.
    ///
    /// Only the first address is used.
    pub fn from_plugin_config(config: &PluginConfig) -> Result<Self> {
        let defaults = Self::default();

        let scheme = config.get("scheme", &defaults.scheme).to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(RegistryError::InvalidConnectionString {
                input: config.as_str().to_owned(),
                reason: format!("unsupported eureka scheme: {scheme}"),
            });
        }

        Ok(Self {
            scheme,
            address: config.primary_address().to_owned(),
            timeout: config.get_duration("timeout", defaults.timeout)?,
            poll: PollConfig::from_options(config, defaults.poll)?,
        })
    }

    /// Base URL of the applications resource, `{scheme}://{address}/eureka/apps`.
    pub fn apps_url(&self) -> Result<Url> {
        let raw = format!("{}://{}/eureka/apps", self.scheme, self.address);
        Url::parse(&raw).map_err(|e| RegistryError::InvalidConnectionString {
            input: raw,
            reason: e.to_string(),
        })
    }
}
