//! Health check tunables for Consul registrations.

use std::sync::LazyLock;
use std::time::Duration;

use sextant_core::attrs::{format_duration, parse_duration};
use sextant_core::{AttrSchema, BackendAttrs, CheckType, PluginAttrs};

/// Per-instance check settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsulAttrs {
    pub check_type: CheckType,
    /// Path probed by HTTP checks.
    pub health: String,
    /// How often the agent runs the check.
    pub interval: Duration,
    /// How long a critical instance stays registered before the agent reaps it.
    pub deregister: Duration,
    /// Timeout of a single check run.
    pub timeout: Duration,
}

impl Default for ConsulAttrs {
    fn default() -> Self {
        Self {
            check_type: CheckType::Http,
            health: "/health".to_owned(),
            interval: Duration::from_secs(10),
            deregister: Duration::from_secs(120 * 60),
            timeout: Duration::from_secs(3),
        }
    }
}

static SCHEMA: LazyLock<AttrSchema<ConsulAttrs>> = LazyLock::new(|| {
    AttrSchema::<ConsulAttrs>::new()
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
            a.interval = positive(parse_duration(v)?)?;
            Ok(())
        })
        .field("deregister", |a, v| {
            a.deregister = positive(parse_duration(v)?)?;
            Ok(())
        })
        .field("timeout", |a, v| {
            a.timeout = positive(parse_duration(v)?)?;
            Ok(())
        })
});

fn positive(d: Duration) -> Result<Duration, String> {
    if d.is_zero() {
        return Err("must be greater than zero".to_owned());
    }
    Ok(d)
}

impl BackendAttrs for ConsulAttrs {
    fn schema() -> &'static AttrSchema<Self> {
        &SCHEMA
    }
}

impl ConsulAttrs {
    /// Renders every field as an override map.
    pub fn to_plugin_attrs(&self) -> PluginAttrs {
        [
            ("check_type", self.check_type.to_string()),
            ("health", self.health.clone()),
            ("interval", format_duration(self.interval)),
            ("deregister", format_duration(self.deregister)),
            ("timeout", format_duration(self.timeout)),
        ]
        .into_iter()
        .collect()
    }
}
