//! Cluster object model.
//!
//! Typed representations of every object the controller reads or writes:
//! import requests, mapping resources, and the target objects created on
//! behalf of an import (virtual machines, data volumes, secrets, config maps).

macro_rules! impl_resource {
    ($ty:ty, $kind:literal) => {
        impl_resource!($ty, $kind, true);
    };
    ($ty:ty, $kind:literal, $namespaced:literal) => {
        impl $crate::resources::Resource for $ty {
            const KIND: &'static str = $kind;
            const NAMESPACED: bool = $namespaced;

            fn metadata(&self) -> &$crate::resources::ObjectMeta {
                &self.metadata
            }

            fn metadata_mut(&mut self) -> &mut $crate::resources::ObjectMeta {
                &mut self.metadata
            }
        }
    };
}

pub(crate) use impl_resource;

mod import;
mod mapping;
mod target;

pub use import::*;
pub use mapping::*;
pub use target::*;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Metadata common to every persisted object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    /// Assigned by the store on creation
    pub uid: String,
    /// Optimistic concurrency token, bumped on every write
    pub resource_version: u64,
    /// Bumped only when the object's spec changes
    pub generation: u64,
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// The owner reference flagged as controller, if any.
    pub fn controller_owner(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|r| r.controller)
    }
}

/// Cascading-deletion link from a created object back to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    pub uid: String,
    #[serde(default)]
    pub controller: bool,
    #[serde(default)]
    pub block_owner_deletion: bool,
}

/// Reference to an object by name, optionally in another namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectIdentifier {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ObjectIdentifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }

    /// Namespace of the reference, falling back to the referrer's namespace.
    pub fn namespace_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(default)
    }
}

/// Identity of an object in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn of<R: Resource>(namespace: &str, name: &str) -> Self {
        let namespace = if R::NAMESPACED { namespace } else { "" };
        Self::new(R::KIND, namespace, name)
    }

    pub fn for_object<R: Resource>(object: &R) -> Self {
        let meta = object.metadata();
        Self::of::<R>(&meta.namespace, &meta.name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.kind, self.name)
        } else {
            write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
        }
    }
}

/// A typed object that can be persisted in the [`ObjectStore`](crate::store::ObjectStore).
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Kind name used in keys, owner references and watch events.
    const KIND: &'static str;

    /// Cluster-scoped kinds ignore the namespace component of their key.
    const NAMESPACED: bool = true;

    fn metadata(&self) -> &ObjectMeta;

    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    /// Controller owner reference pointing at this object.
    fn controller_reference(&self) -> OwnerReference {
        let meta = self.metadata();
        OwnerReference {
            kind: Self::KIND.to_string(),
            name: meta.name.clone(),
            uid: meta.uid.clone(),
            controller: true,
            block_owner_deletion: true,
        }
    }
}

/// Longest DNS-1123 label.
pub const MAX_NAME_LEN: usize = 63;

/// Normalize an arbitrary name into a DNS-1123 label (max 63 characters).
///
/// Lowercases, replaces invalid characters with `-`, collapses repeats and
/// trims leading/trailing separators.
pub fn normalize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_dash = true;
    for c in raw.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.truncate(MAX_NAME_LEN);
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "vm".to_string()
    } else {
        trimmed.to_string()
    }
}
