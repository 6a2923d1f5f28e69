//! Core data model.
//!
//! Objects arrive from a watch source as untyped [`DynamicObject`]s. The queue
//! only ever carries an [`ObjectKey`]; workers re-read current state from the
//! local cache and convert it to a typed object when they need one.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Object Key
// ---------------------------------------------------------------------------

/// Unique identifier of one observed object: `namespace/name`, or bare `name`
/// for cluster-scoped objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Derive the key from object metadata.
    pub fn from_meta(meta: &ObjectMeta) -> Result<Self> {
        let name = meta.name.as_deref().filter(|n| !n.is_empty());
        let Some(name) = name else {
            return Err(Error::MissingName);
        };
        Ok(match meta.namespace.as_deref().filter(|ns| !ns.is_empty()) {
            Some(ns) => Self(format!("{ns}/{name}")),
            None => Self(name.to_string()),
        })
    }

    /// Derive the key for anything carrying object metadata.
    pub fn of(obj: &impl HasMeta) -> Result<Self> {
        Self::from_meta(obj.meta())
    }

    /// Parse and validate a key string.
    pub fn parse(s: &str) -> Result<Self> {
        split_key(s)?;
        Ok(Self(s.to_string()))
    }

    /// Split into `(namespace, name)`.
    pub fn split(&self) -> (Option<&str>, &str) {
        match self.0.split_once('/') {
            Some((ns, name)) => (Some(ns), name),
            None => (None, self.0.as_str()),
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.split().0
    }

    pub fn name(&self) -> &str {
        self.split().1
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Split a `namespace/name` key, rejecting keys with more than one separator
/// or an empty name.
pub fn split_key(key: &str) -> Result<(Option<&str>, &str)> {
    let invalid = |reason| Error::InvalidKey {
        key: key.to_string(),
        reason,
    };
    let mut parts = key.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, None) if !name.is_empty() => Ok((None, name)),
        (Some(ns), Some(name), None) if !name.is_empty() => Ok((Some(ns), name)),
        (_, _, Some(_)) => Err(invalid("unexpected extra '/'")),
        _ => Err(invalid("empty name")),
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ObjectKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// The subset of Kubernetes object metadata the controller looks at.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uuid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    /// Metadata with just a namespace and name.
    pub fn named(namespace: Option<&str>, name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            namespace: namespace.map(str::to_string),
            ..Self::default()
        }
    }
}

/// Anything that carries [`ObjectMeta`].
pub trait HasMeta {
    fn meta(&self) -> &ObjectMeta;
}

// ---------------------------------------------------------------------------
// Dynamic Object
// ---------------------------------------------------------------------------

/// An untyped object as delivered by the watch source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicObject {
    #[serde(default)]
    pub api_version: String,

    #[serde(default)]
    pub kind: String,

    #[serde(default)]
    pub metadata: ObjectMeta,

    /// Everything else (`spec`, `status`, ...). Not interpreted here.
    #[serde(flatten)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl DynamicObject {
    pub fn new(kind: &str, meta: ObjectMeta) -> Self {
        Self {
            api_version: "v1".to_string(),
            kind: kind.to_string(),
            metadata: meta,
            data: serde_json::Map::new(),
        }
    }

    /// Attach a top-level field (e.g. `spec`).
    pub fn with_field(mut self, name: &str, value: serde_json::Value) -> Self {
        self.data.insert(name.to_string(), value);
        self
    }

    /// Convert to a typed object of the expected kind.
    ///
    /// Fails with [`Error::KindMismatch`] if the object is of another kind and
    /// with [`Error::Decode`] if its shape does not fit `T`.
    pub fn try_parse<T: DeserializeOwned>(&self, expected_kind: &str) -> Result<T> {
        if self.kind != expected_kind {
            return Err(Error::KindMismatch {
                expected: expected_kind.to_string(),
                found: if self.kind.is_empty() {
                    "<none>".to_string()
                } else {
                    self.kind.clone()
                },
            });
        }
        let value = serde_json::to_value(self)?;
        Ok(serde_json::from_value(value)?)
    }
}

impl HasMeta for DynamicObject {
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
}

// ---------------------------------------------------------------------------
// Pod
// ---------------------------------------------------------------------------

/// A minimal typed pod.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: Option<serde_json::Value>,

    #[serde(default)]
    pub status: Option<PodStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    #[serde(default)]
    pub phase: Option<String>,

    #[serde(default, rename = "podIP")]
    pub pod_ip: Option<String>,
}

impl Pod {
    pub const KIND: &'static str = "Pod";

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }
}

impl HasMeta for Pod {
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
}
