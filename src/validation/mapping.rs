//! Mapping completeness and target-existence checks.

use crate::mapping::find_mapping;
use crate::provider::SourceVm;
use crate::resources::{
    MappingConfiguration, MappingItem, NetworkAttachmentDefinition, StorageClass,
};
use crate::store::ObjectStore;
use std::fmt;

/// Network mapping type for secondary networks.
pub const NETWORK_TYPE_MULTUS: &str = "multus";
/// Network mapping type for the pod network; also the default when unset.
pub const NETWORK_TYPE_POD: &str = "pod";

/// What a mapping validity failure is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingFailureKind {
    NetworkMappingMissing,
    NetworkTargetMissing,
    NetworkTypeInvalid,
    MultiplePodNetworks,
    StorageMappingMissing,
    StorageTargetMissing,
}

/// One mapping validity problem. These always invalidate the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingFailure {
    pub kind: MappingFailureKind,
    pub message: String,
}

impl MappingFailure {
    fn new(kind: MappingFailureKind, message: String) -> Self {
        Self { kind, message }
    }
}

impl fmt::Display for MappingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Network type of a mapping item, defaulting to the pod network.
pub fn network_type(item: &MappingItem) -> &str {
    item.mapping_type.as_deref().unwrap_or(NETWORK_TYPE_POD)
}

/// Check that every NIC network is mapped to an existing target and that at
/// most one NIC lands on the pod network.
pub fn validate_network_mappings(
    vm: &SourceVm,
    mappings: &MappingConfiguration,
    store: &ObjectStore,
    namespace: &str,
) -> Vec<MappingFailure> {
    let mut failures = Vec::new();
    let mut pod_nics = Vec::new();

    for nic in &vm.nics {
        let network = nic
            .network_name
            .as_deref()
            .or(nic.network_id.as_deref())
            .unwrap_or("<none>");
        let Some(item) = find_mapping(
            mappings.network_mappings.as_deref(),
            nic.network_id.as_deref(),
            nic.network_name.as_deref(),
        ) else {
            failures.push(MappingFailure::new(
                MappingFailureKind::NetworkMappingMissing,
                format!("network {network} of NIC {} has no mapping", nic.name),
            ));
            continue;
        };

        match network_type(item) {
            NETWORK_TYPE_POD => pod_nics.push(nic.name.as_str()),
            NETWORK_TYPE_MULTUS => {
                let target_ns = item.target.namespace_or(namespace);
                if !store.contains::<NetworkAttachmentDefinition>(target_ns, &item.target.name) {
                    failures.push(MappingFailure::new(
                        MappingFailureKind::NetworkTargetMissing,
                        format!(
                            "network attachment definition {} for NIC {} does not exist",
                            item.target.qualified(namespace),
                            nic.name
                        ),
                    ));
                }
            }
            other => failures.push(MappingFailure::new(
                MappingFailureKind::NetworkTypeInvalid,
                format!("network {network} is mapped with unknown type {other}"),
            )),
        }
    }

    if pod_nics.len() > 1 {
        failures.push(MappingFailure::new(
            MappingFailureKind::MultiplePodNetworks,
            format!(
                "NICs {} are all mapped to the pod network",
                pod_nics.join(", ")
            ),
        ));
    }

    failures
}

/// Check that every disk resolves to a storage class, either through a disk
/// mapping or through the mapping of its storage domain.
pub fn validate_storage_mappings(
    vm: &SourceVm,
    mappings: &MappingConfiguration,
    store: &ObjectStore,
) -> Vec<MappingFailure> {
    let mut failures = Vec::new();

    for disk in &vm.disks {
        let Some(item) = storage_mapping_for(mappings, disk) else {
            let domain = disk
                .storage_domain_name
                .as_deref()
                .or(disk.storage_domain_id.as_deref())
                .unwrap_or("<none>");
            failures.push(MappingFailure::new(
                MappingFailureKind::StorageMappingMissing,
                format!(
                    "disk {} has neither a disk mapping nor a mapping for storage domain {domain}",
                    disk.name
                ),
            ));
            continue;
        };

        if !store.contains::<StorageClass>("", &item.target.name) {
            failures.push(MappingFailure::new(
                MappingFailureKind::StorageTargetMissing,
                format!(
                    "storage class {} for disk {} does not exist",
                    item.target.name, disk.name
                ),
            ));
        }
    }

    failures
}

/// Resolve the mapping that decides a disk's storage: a disk mapping wins over
/// the storage domain mapping.
pub fn storage_mapping_for<'a>(
    mappings: &'a MappingConfiguration,
    disk: &crate::provider::SourceDisk,
) -> Option<&'a MappingItem> {
    find_mapping(
        mappings.disk_mappings.as_deref(),
        Some(disk.id.as_str()),
        Some(disk.name.as_str()),
    )
    .or_else(|| {
        find_mapping(
            mappings.storage_mappings.as_deref(),
            disk.storage_domain_id.as_deref(),
            disk.storage_domain_name.as_deref(),
        )
    })
}
