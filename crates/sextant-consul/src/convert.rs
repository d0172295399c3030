//! Mapping between [`ServerInstance`] and Consul payloads.

use sextant_core::attrs::format_duration;
use sextant_core::{CheckType, Result, ServerInstance, STATUS_OK};

use crate::attrs::ConsulAttrs;
use crate::model::{
    AgentCheck, HealthCheck, ServiceEntry, ServiceRegistration, CHECK_CRITICAL, CHECK_MAINTENANCE,
    CHECK_PASSING, CHECK_WARNING,
};

/// Builds the agent registration for `instance`, including its check.
pub fn to_registration(instance: &ServerInstance, attrs: &ConsulAttrs) -> Result<ServiceRegistration> {
    let (host, port) = instance.host_port()?;
    let authority = authority(host, port);

    let (http, tcp) = match attrs.check_type {
        CheckType::Http => (Some(format!("http://{authority}{}", attrs.health)), None),
        CheckType::Tcp => (None, Some(authority)),
    };

    Ok(ServiceRegistration {
        id: if instance.id.is_empty() {
            format!("{}-{host}-{port}", instance.name)
        } else {
            instance.id.clone()
        },
        name: instance.name.clone(),
        tags: instance.tags.iter().cloned().collect(),
        address: host.to_owned(),
        port,
        meta: instance.metadata.clone(),
        check: AgentCheck {
            http,
            tcp,
            interval: format_duration(attrs.interval),
            timeout: format_duration(attrs.timeout),
            deregister_critical_service_after: format_duration(attrs.deregister),
        },
    })
}

/// Converts a health entry into the canonical instance of `service`.
pub fn to_server_instance(service: &str, entry: &ServiceEntry) -> ServerInstance {
    let host = if entry.service.address.is_empty() {
        &entry.node.address
    } else {
        &entry.service.address
    };

    ServerInstance {
        id: entry.service.id.clone(),
        name: service.to_owned(),
        address: authority(host, entry.service.port),
        tags: entry.service.tags.iter().cloned().collect(),
        metadata: entry.service.meta.clone(),
        status: aggregate_status(&entry.checks),
        plugin_attrs: Default::default(),
    }
}

/// [`STATUS_OK`] when every check passes, otherwise the worst check status.
pub fn aggregate_status(checks: &[HealthCheck]) -> String {
    checks
        .iter()
        .filter(|c| c.status != CHECK_PASSING)
        .max_by_key(|c| severity(&c.status))
        .map_or_else(|| STATUS_OK.to_owned(), |c| c.status.clone())
}

fn severity(status: &str) -> u8 {
    match status {
        CHECK_CRITICAL => 3,
        CHECK_WARNING => 2,
        CHECK_MAINTENANCE => 1,
        _ => 0,
    }
}

fn authority(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
