//! Connection strings and application-level registry settings.
//!
//! A connection string selects and configures one backend:
//!
//! ```text
//! eureka://10.0.0.1:8761,10.0.0.2:8761?timeout=3s&poll=10s
//! ```
//!
//! [`RegistryConfig`] wraps a connection string together with attribute
//! overrides and the polling cadence, loaded from `sextant.toml` and
//! `SEXTANT_`-prefixed environment variables.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::attrs::{format_duration, parse_duration, PluginAttrs};
use crate::error::{RegistryError, Result};
use crate::instance::split_host_port;
use crate::subscription::PollConfig;

const DEFAULT_CONFIG_FILE: &str = "sextant.toml";
const ENV_PREFIX: &str = "SEXTANT_";

/// A parsed connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginConfig {
    /// Backend scheme.
    pub plugin: String,
    /// Backend addresses as `host:port`, in the order given.
    pub addresses: Vec<String>,
    /// Decoded query options.
    pub options: BTreeMap<String, String>,
    raw: String,
}

impl PluginConfig {
    /// Parses `scheme://host1:port1,host2:port2?key=value`.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| RegistryError::InvalidConnectionString {
            input: input.to_owned(),
            reason: reason.to_owned(),
        };

        let (plugin, rest) = input
            .trim()
            .split_once("://")
            .ok_or_else(|| invalid("missing scheme"))?;

        if plugin.is_empty()
            || !plugin
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        {
            return Err(invalid("invalid scheme"));
        }

        let (hosts, query) = rest.split_once('?').unwrap_or((rest, ""));

        let addresses: Vec<String> = hosts
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_owned)
            .collect();

        if addresses.is_empty() {
            return Err(invalid("no addresses"));
        }
        for address in &addresses {
            split_host_port(address).map_err(|_| invalid("addresses must be host:port"))?;
        }

        let options = url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        Ok(Self {
            plugin: plugin.to_ascii_lowercase(),
            addresses,
            options,
            raw: input.to_owned(),
        })
    }

    /// The connection string as given.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// First address; backends that talk to a single endpoint use this one.
    pub fn primary_address(&self) -> &str {
        // parse() guarantees at least one address
        self.addresses.first().map_or("", String::as_str)
    }

    /// Returns the option for `key`, or `default`.
    pub fn get<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.options.get(key).map_or(default, String::as_str)
    }

    /// Returns the option for `key` as an integer, or `default`.
    pub fn get_int(&self, key: &str, default: i64) -> Result<i64> {
        match self.options.get(key) {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| self.bad_option(key, "expected an integer")),
            None => Ok(default),
        }
    }

    /// Returns the option for `key` as a duration, or `default`.
    pub fn get_duration(&self, key: &str, default: Duration) -> Result<Duration> {
        match self.options.get(key) {
            Some(value) => parse_duration(value).map_err(|reason| self.bad_option(key, &reason)),
            None => Ok(default),
        }
    }

    /// Sets `key` unless the connection string already carries it.
    pub fn set_default(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.options.entry(key.into()).or_insert_with(|| value.into());
    }

    fn bad_option(&self, key: &str, reason: &str) -> RegistryError {
        RegistryError::InvalidConnectionString {
            input: self.raw.clone(),
            reason: format!("option {key}: {reason}"),
        }
    }
}

impl std::str::FromStr for PluginConfig {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Registry settings for an application.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Connection string selecting the backend.
    #[serde(default = "default_connection")]
    pub connection: String,

    /// Attribute overrides applied to the template instance.
    #[serde(default)]
    pub attrs: PluginAttrs,

    /// Subscription polling cadence.
    #[serde(default)]
    pub poll: PollConfig,
}

fn default_connection() -> String {
    "memory://127.0.0.1:0".to_owned()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            connection: default_connection(),
            attrs: PluginAttrs::default(),
            poll: PollConfig::default(),
        }
    }
}

impl RegistryConfig {
    /// Loads `sextant.toml` from the current directory (if present) and
    /// `SEXTANT_` environment variables, later sources overriding earlier.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Loads a specific TOML file plus `SEXTANT_` environment variables.
    ///
    /// Nested keys use a double underscore, e.g. `SEXTANT_POLL__INTERVAL=10s`.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?)
    }

    /// Parses settings from a TOML string.
    pub fn parse(toml: &str) -> Result<Self> {
        Ok(Figment::new().merge(Toml::string(toml)).extract()?)
    }

    /// Parses the connection string, filling in the polling cadence for
    /// options the string does not set itself.
    pub fn plugin_config(&self) -> Result<PluginConfig> {
        let mut config = PluginConfig::parse(&self.connection)?;
        config.set_default("poll", format_duration(self.poll.interval));
        config.set_default("max_backoff", format_duration(self.poll.max_backoff));
        Ok(config)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DurationRepr {
    Seconds(u64),
    Text(String),
}

/// Deserialises a duration from `"10s"`-style text or a number of seconds.
pub(crate) fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match DurationRepr::deserialize(deserializer)? {
        DurationRepr::Seconds(secs) => Ok(Duration::from_secs(secs)),
        DurationRepr::Text(s) => parse_duration(&s).map_err(serde::de::Error::custom),
    }
}
