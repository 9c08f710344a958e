use super::{impl_resource, AccessMode, ObjectIdentifier, ObjectMeta, VolumeMode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Virtual machines
// ============================================================================

/// Cluster-native virtual machine created for an import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachine {
    pub metadata: ObjectMeta,
    pub spec: VirtualMachineSpec,
}

impl_resource!(VirtualMachine, "VirtualMachine");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualMachineSpec {
    pub running: bool,
    pub template: VmTemplateSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VmTemplateSpec {
    pub cpu: CpuTopology,
    pub memory_mib: u64,
    pub firmware: Firmware,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_type: Option<String>,
    pub disks: Vec<VmDisk>,
    pub volumes: Vec<VmVolume>,
    pub interfaces: Vec<VmInterface>,
    pub networks: Vec<VmNetwork>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuTopology {
    pub sockets: u32,
    pub cores: u32,
    pub threads: u32,
}

impl Default for CpuTopology {
    fn default() -> Self {
        Self {
            sockets: 1,
            cores: 1,
            threads: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Firmware {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    pub bootloader: Bootloader,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Bootloader {
    #[default]
    Bios,
    Efi {
        secure_boot: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmDisk {
    pub name: String,
    pub bus: DiskBus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_order: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskBus {
    Virtio,
    Sata,
    Scsi,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmVolume {
    pub name: String,
    /// Name of the DataVolume backing this volume
    pub data_volume: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmInterface {
    pub name: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    pub binding: InterfaceBinding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceBinding {
    Bridge,
    Masquerade,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmNetwork {
    pub name: String,
    #[serde(default)]
    pub pod: bool,
    /// `namespace/name` of the NetworkAttachmentDefinition for multus networks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multus: Option<String>,
}

/// Running instance of a virtual machine, written by the VM runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstance {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: VirtualMachineInstanceStatus,
}

impl_resource!(VirtualMachineInstance, "VirtualMachineInstance");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualMachineInstanceStatus {
    pub phase: InstancePhase,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstancePhase {
    #[default]
    Pending,
    Scheduling,
    Scheduled,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

// ============================================================================
// Data volumes
// ============================================================================

/// Importable volume; bytes are copied by the external volume-import subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataVolume {
    pub metadata: ObjectMeta,
    pub spec: DataVolumeSpec,
    #[serde(default)]
    pub status: DataVolumeStatus,
}

impl_resource!(DataVolume, "DataVolume");

impl DataVolume {
    pub fn phase(&self) -> DataVolumePhase {
        self.status.phase
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataVolumeSpec {
    pub source: DataVolumeSource,
    pub storage: StorageSpec,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checkpoints: Vec<DataVolumeCheckpoint>,
    #[serde(default)]
    pub final_checkpoint: bool,
}

impl DataVolumeSpec {
    pub fn last_checkpoint(&self) -> Option<&DataVolumeCheckpoint> {
        self.checkpoints.last()
    }

    /// Append the next checkpoint in the chain, continuing from the last one.
    ///
    /// No-op once the final checkpoint has been recorded.
    pub fn append_checkpoint(&mut self, snapshot: &str, last: bool) -> bool {
        if self.final_checkpoint {
            return false;
        }
        let previous = self
            .last_checkpoint()
            .map(|c| c.current.clone())
            .unwrap_or_default();
        self.checkpoints.push(DataVolumeCheckpoint {
            previous,
            current: snapshot.to_string(),
        });
        self.final_checkpoint = last;
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataVolumeCheckpoint {
    pub previous: String,
    pub current: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataVolumeSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imageio: Option<ImageIoSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vddk: Option<VddkSource>,
}

/// oVirt image transfer source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIoSource {
    pub url: String,
    pub disk_id: String,
    pub secret_ref: String,
    pub cert_config_map: String,
}

/// VMware VDDK source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VddkSource {
    pub url: String,
    pub uuid: String,
    pub backing_file: String,
    pub thumbprint: String,
    pub secret_ref: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_mode: Option<VolumeMode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_modes: Vec<AccessMode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataVolumeStatus {
    pub phase: DataVolumePhase,
    /// Copy progress in percent, as reported by the importer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataVolumePhase {
    #[default]
    Pending,
    ImportScheduled,
    ImportInProgress,
    /// Warm import: current checkpoint copied, waiting for the next one
    Paused,
    Succeeded,
    Failed,
    Unknown,
}

// ============================================================================
// Supporting objects
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Secret {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub string_data: BTreeMap<String, String>,
}

impl_resource!(Secret, "Secret");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMap {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl_resource!(ConfigMap, "ConfigMap");

/// Secondary (multus) network definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAttachmentDefinition {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub config: String,
}

impl_resource!(NetworkAttachmentDefinition, "NetworkAttachmentDefinition");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageClass {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub provisioner: String,
}

impl_resource!(StorageClass, "StorageClass", false);

impl ObjectIdentifier {
    /// `namespace/name` form used by multus network references.
    pub fn qualified(&self, default_namespace: &str) -> String {
        format!("{}/{}", self.namespace_or(default_namespace), self.name)
    }
}
