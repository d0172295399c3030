//! Mapping between [`ServerInstance`] and Eureka instance records.

use std::collections::BTreeSet;

use sextant_core::{CheckType, Result, ServerInstance, STATUS_OK};

use crate::attrs::EurekaAttrs;
use crate::model::{DataCenterInfo, InstanceInfo, LeaseInfo, PortInfo, STATUS_UP};

/// Eureka's id for an instance registered without one.
pub fn default_instance_id(host: &str, app: &str, port: u16) -> String {
    format!("{host}:{app}:{port}")
}

/// Builds the registration record for `instance`.
pub fn to_instance_info(instance: &ServerInstance, attrs: &EurekaAttrs) -> Result<InstanceInfo> {
    let (host, port) = instance.host_port()?;
    let authority = authority(host, port);

    let instance_id = if instance.id.is_empty() {
        default_instance_id(host, &instance.name, port)
    } else {
        instance.id.clone()
    };

    let health_check_url = match attrs.check_type {
        CheckType::Http => Some(format!("http://{authority}{}", attrs.health)),
        CheckType::Tcp => None,
    };

    Ok(InstanceInfo {
        instance_id,
        host_name: host.to_owned(),
        app: instance.name.clone(),
        ip_addr: host.to_owned(),
        vip_address: instance.name.clone(),
        secure_vip_address: instance.name.clone(),
        status: STATUS_UP.to_owned(),
        overriddenstatus: None,
        port: PortInfo::enabled(port),
        secure_port: Some(PortInfo::disabled(443)),
        home_page_url: format!("http://{authority}/"),
        status_page_url: format!("http://{authority}/info"),
        health_check_url,
        data_center_info: DataCenterInfo::default(),
        lease_info: Some(LeaseInfo {
            renewal_interval_in_secs: attrs.interval.as_secs().max(1),
            duration_in_secs: attrs.deregister.as_secs(),
            eviction_duration_in_secs: attrs.deregister.as_secs(),
        }),
        metadata: instance.metadata.clone(),
    })
}

/// Converts a queried record into the canonical instance of `service`.
///
/// `UP` becomes [`STATUS_OK`]; the vip address is the only tag.
pub fn to_server_instance(service: &str, info: &InstanceInfo) -> ServerInstance {
    let host = if info.ip_addr.is_empty() {
        &info.host_name
    } else {
        &info.ip_addr
    };

    let status = if info.status == STATUS_UP {
        STATUS_OK.to_owned()
    } else {
        info.status.clone()
    };

    let tags: BTreeSet<String> = if info.vip_address.is_empty() {
        BTreeSet::new()
    } else {
        BTreeSet::from([info.vip_address.clone()])
    };

    let id = if info.instance_id.is_empty() {
        default_instance_id(host, &info.app, info.port.port)
    } else {
        info.instance_id.clone()
    };

    ServerInstance {
        id,
        name: service.to_owned(),
        address: authority(host, info.port.port),
        tags,
        metadata: info.metadata.clone(),
        status,
        plugin_attrs: Default::default(),
    }
}

fn authority(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
