//! Test fixtures for registry integration tests.

use sextant_core::{ServerInstance, STATUS_OK};

/// Builder for test instances.
pub struct InstanceBuilder {
    instance: ServerInstance,
}

impl InstanceBuilder {
    /// Creates an instance of `service` with the given id on a loopback port.
    pub fn new(service: &str, id: &str) -> Self {
        Self {
            instance: ServerInstance::new(id, service, "127.0.0.1:6071").with_status(STATUS_OK),
        }
    }

    pub fn with_address(mut self, address: &str) -> Self {
        self.instance.address = address.to_owned();
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.instance = self.instance.with_tag(tag);
        self
    }

    pub fn with_status(mut self, status: &str) -> Self {
        self.instance.status = status.to_owned();
        self
    }

    pub fn with_attr(mut self, key: &str, value: &str) -> Self {
        self.instance.plugin_attrs.set(key, value);
        self
    }

    pub fn build(self) -> ServerInstance {
        self.instance
    }
}

/// Shorthand for an `UP`-style instance of `service`.
pub fn up(service: &str, id: &str) -> ServerInstance {
    InstanceBuilder::new(service, id).with_status("UP").build()
}
