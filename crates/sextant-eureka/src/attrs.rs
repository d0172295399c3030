//! Registration tunables for Eureka instances.

use std::sync::LazyLock;
use std::time::Duration;

use sextant_core::attrs::{format_duration, parse_duration};
use sextant_core::{AttrSchema, BackendAttrs, CheckType, PluginAttrs};

/// Per-instance registration settings.
///
/// Defaults: HTTP check on `/health`, renew every 10s, evict after 120m
/// without renewal, 3s per registration request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EurekaAttrs {
    /// Whether the instance advertises an HTTP health URL.
    pub check_type: CheckType,
    /// Health endpoint path.
    pub health: String,
    /// Lease renewal interval; heartbeats are sent this often.
    pub interval: Duration,
    /// How long the server keeps the lease without a renewal.
    pub deregister: Duration,
    /// Timeout for register, renew and deregister requests.
    pub request_timeout: Duration,
}

impl Default for EurekaAttrs {
    fn default() -> Self {
        Self {
            check_type: CheckType::Http,
            health: "/health".to_owned(),
            interval: Duration::from_secs(10),
            deregister: Duration::from_secs(120 * 60),
            request_timeout: Duration::from_secs(3),
        }
    }
}

static SCHEMA: LazyLock<AttrSchema<EurekaAttrs>> = LazyLock::new(|| {
    AttrSchema::<EurekaAttrs>::new()
        .field("check_type", |a, v| {
            a.check_type = v.parse()?;
            Ok(())
        })
        .field("health", |a, v| {
            if !v.starts_with('/') {
                return Err("health path must start with '/'".to_owned());
            }
            a.health = v.to_owned();
            Ok(())
        })
        .field("interval", |a, v| {
            a.interval = non_zero(parse_duration(v)?)?;
            Ok(())
        })
        .field("deregister", |a, v| {
            a.deregister = parse_duration(v)?;
            Ok(())
        })
        .field("request_timeout", |a, v| {
            a.request_timeout = non_zero(parse_duration(v)?)?;
            Ok(())
        })
});

fn non_zero(d: Duration) -> Result<Duration, String> {
    if d.is_zero() {
        Err("must be greater than zero".to_owned())
    } else {
        Ok(d)
    }
}

impl BackendAttrs for EurekaAttrs {
    fn schema() -> &'static AttrSchema<Self> {
        &SCHEMA
    }
}

impl EurekaAttrs {
    /// Renders every field as an override map.
    pub fn to_plugin_attrs(&self) -> PluginAttrs {
        [
            ("check_type", self.check_type.to_string()),
            ("health", self.health.clone()),
            ("interval", format_duration(self.interval)),
            ("deregister", format_duration(self.deregister)),
            ("request_timeout", format_duration(self.request_timeout)),
        ]
        .into_iter()
        .collect()
    }
}
