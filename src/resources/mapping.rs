use super::{impl_resource, ObjectIdentifier, ObjectMeta};
use serde::{Deserialize, Serialize};

/// Reusable mapping rules referenced by name from import requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMapping {
    pub metadata: ObjectMeta,
    pub spec: MappingConfiguration,
}

impl_resource!(ResourceMapping, "ResourceMapping");

/// Network, storage and disk translation rules.
///
/// `None` lists are absent, which is distinct from present-but-empty when
/// merging two configurations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MappingConfiguration {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_mappings: Option<Vec<MappingItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_mappings: Option<Vec<MappingItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_mappings: Option<Vec<MappingItem>>,
}

/// One source-to-target translation rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingItem {
    pub source: MappingSource,
    pub target: ObjectIdentifier,
    /// Network binding for network mappings (`pod` or `multus`)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mapping_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_mode: Option<VolumeMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_mode: Option<AccessMode>,
}

impl MappingItem {
    pub fn new(source: MappingSource, target: impl Into<String>) -> Self {
        Self {
            source,
            target: ObjectIdentifier::new(target),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, mapping_type: impl Into<String>) -> Self {
        self.mapping_type = Some(mapping_type.into());
        self
    }

    /// Items with neither id nor name cannot take part in lookups.
    pub fn is_identifiable(&self) -> bool {
        self.source.id.is_some() || self.source.name.is_some()
    }
}

/// Source identity of a mapping item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MappingSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl MappingSource {
    pub fn id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: None,
        }
    }

    pub fn name(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: Some(name.into()),
        }
    }

    pub fn both(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: Some(name.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeMode {
    Filesystem,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    ReadWriteOnce,
    ReadWriteMany,
    ReadOnlyMany,
}
