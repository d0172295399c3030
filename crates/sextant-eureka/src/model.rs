//! Eureka wire format (JSON flavour of the v2 REST API).

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Instance status as Eureka reports it.
pub const STATUS_UP: &str = "UP";
/// Status used to take an instance out of rotation.
pub const STATUS_OUT_OF_SERVICE: &str = "OUT_OF_SERVICE";

const DATA_CENTER_CLASS: &str = "com.netflix.appinfo.InstanceInfo$DefaultDataCenterInfo";

/// Registration request body: `{"instance": {...}}`.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest<'a> {
    pub instance: &'a InstanceInfo,
}

/// One instance record, sent on register and returned by queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    #[serde(default)]
    pub instance_id: String,
    #[serde(default)]
    pub host_name: String,
    #[serde(default)]
    pub app: String,
    #[serde(default)]
    pub ip_addr: String,
    #[serde(default)]
    pub vip_address: String,
    #[serde(default)]
    pub secure_vip_address: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overriddenstatus: Option<String>,
    pub port: PortInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure_port: Option<PortInfo>,
    #[serde(default)]
    pub home_page_url: String,
    #[serde(default)]
    pub status_page_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_url: Option<String>,
    #[serde(default)]
    pub data_center_info: DataCenterInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_info: Option<LeaseInfo>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// A port plus its enabled flag: `{"$": 8080, "@enabled": "true"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    #[serde(rename = "$")]
    pub port: u16,
    #[serde(
        rename = "@enabled",
        default,
        serialize_with = "serialize_flag",
        deserialize_with = "deserialize_flag"
    )]
    pub enabled: bool,
}

impl PortInfo {
    pub const fn enabled(port: u16) -> Self {
        Self {
            port,
            enabled: true,
        }
    }

    pub const fn disabled(port: u16) -> Self {
        Self {
            port,
            enabled: false,
        }
    }
}

/// Data center descriptor; only the `MyOwn` flavour is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataCenterInfo {
    pub name: String,
    #[serde(rename = "@class", default)]
    pub class: String,
}

impl Default for DataCenterInfo {
    fn default() -> Self {
        Self {
            name: "MyOwn".to_owned(),
            class: DATA_CENTER_CLASS.to_owned(),
        }
    }
}

/// Lease timing, in whole seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseInfo {
    #[serde(default)]
    pub renewal_interval_in_secs: u64,
    #[serde(default)]
    pub duration_in_secs: u64,
    #[serde(default)]
    pub eviction_duration_in_secs: u64,
}

/// Response of `GET /eureka/apps/{app}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationResponse {
    pub application: Application,
}

/// One application and its instances.
#[derive(Debug, Clone, Deserialize)]
pub struct Application {
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "one_or_many")]
    pub instance: Vec<InstanceInfo>,
}

fn serialize_flag<S: Serializer>(flag: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(if *flag { "true" } else { "false" })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Text(String),
}

fn deserialize_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Text(s) => Ok(s.eq_ignore_ascii_case("true")),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    match OneOrMany::deserialize(deserializer)? {
        OneOrMany::Many(items) => Ok(items),
        OneOrMany::One(item) => Ok(vec![item]),
    }
}
