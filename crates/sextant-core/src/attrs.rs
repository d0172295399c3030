//! Backend attribute bags and the override schema that fills them.
//!
//! Each backend owns a typed attributes struct (health-check path, renewal
//! interval, deregister threshold, ...) that starts from documented
//! defaults. Callers tune it with a `name -> string` override map carried
//! on the [`ServerInstance`](crate::ServerInstance) as [`PluginAttrs`]; the
//! backend resolves that map against its [`AttrSchema`] when registering.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RegistryError, Result};

/// Assigns one field from its string form.
pub type AttrSetter<T> = fn(&mut T, &str) -> std::result::Result<(), String>;

/// Name-to-setter table for one attributes type.
///
/// Built once per type and shared; see [`BackendAttrs::schema`].
pub struct AttrSchema<T> {
    fields: Vec<(&'static str, AttrSetter<T>)>,
}

impl<T: Clone> AttrSchema<T> {
    /// Creates an empty schema.
    #[must_use]
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Adds a field setter.
    #[must_use]
    pub fn field(mut self, name: &'static str, setter: AttrSetter<T>) -> Self {
        self.fields.push((name, setter));
        self
    }

    /// Names of every settable field, in declaration order.
    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|(name, _)| *name)
    }

    fn setter(&self, name: &str) -> Option<AttrSetter<T>> {
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, setter)| *setter)
    }

    /// Overlays `overrides` onto `target`.
    ///
    /// Unknown keys are ignored. If any known key fails to parse, `target`
    /// is left untouched and the failing field is reported.
    pub fn apply<'a, I>(&self, target: &mut T, overrides: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut staged = target.clone();

        for (key, value) in overrides {
            let Some(setter) = self.setter(key) else {
                debug!(attribute = %key, "ignoring unknown attribute");
                continue;
            };

            setter(&mut staged, value).map_err(|reason| RegistryError::InvalidAttribute {
                field: key.clone(),
                value: value.clone(),
                reason,
            })?;
        }

        *target = staged;
        Ok(())
    }
}

impl<T: Clone> Default for AttrSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for AttrSchema<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.fields.iter().map(|(name, _)| name))
            .finish()
    }
}

/// A backend-owned attributes type.
pub trait BackendAttrs: Default + Clone + Send + Sync + 'static {
    /// The override schema for this type.
    fn schema() -> &'static AttrSchema<Self>;

    /// Overlays `overrides` onto `self`; all-or-nothing.
    fn configure(&mut self, overrides: &PluginAttrs) -> Result<()> {
        Self::schema().apply(self, overrides.iter())
    }

    /// Builds the attributes from defaults plus `overrides`.
    fn resolve(overrides: &PluginAttrs) -> Result<Self> {
        let mut attrs = Self::default();
        attrs.configure(overrides)?;
        Ok(attrs)
    }
}

/// Caller-supplied attribute overrides carried on an instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginAttrs(BTreeMap<String, String>);

impl PluginAttrs {
    /// Creates an empty override map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets one override.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Merges every entry of `overrides`, replacing existing keys.
    pub fn extend<K, V, I>(&mut self, overrides: I) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.0
            .extend(overrides.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Returns the override for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Iterates over the overrides.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Returns true if there are no overrides.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PluginAttrs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut attrs = Self::new();
        attrs.extend(iter);
        attrs
    }
}

/// How a backend probes a registered instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    /// HTTP GET against the instance's health path.
    #[default]
    Http,
    /// Plain TCP connect to the instance address.
    Tcp,
}

impl CheckType {
    /// Lowercase name as used in overrides.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Tcp => "tcp",
        }
    }
}

impl std::fmt::Display for CheckType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CheckType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "tcp" => Ok(Self::Tcp),
            other => Err(format!("unknown check type: {other}")),
        }
    }
}

/// Parses a duration such as `500ms`, `10s`, `120m`, `1h`. A bare number is seconds.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    let invalid = || format!("invalid duration: {s}");

    let (digits, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, 1)
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, 1_000)
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, 60_000)
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, 3_600_000)
    } else {
        (s, 1_000)
    };

    let value: u64 = digits.trim().parse().map_err(|_| invalid())?;
    value
        .checked_mul(unit)
        .map(Duration::from_millis)
        .ok_or_else(invalid)
}

/// Formats a duration in the shortest whole unit `parse_duration` accepts.
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms % 3_600_000 == 0 && ms > 0 {
        format!("{}h", ms / 3_600_000)
    } else if ms % 60_000 == 0 && ms > 0 {
        format!("{}m", ms / 60_000)
    } else if ms % 1_000 == 0 {
        format!("{}s", ms / 1_000)
    } else {
        format!("{ms}ms")
    }
}
