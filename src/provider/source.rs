//! Normalized description of a source virtual machine.
//!
//! Every provider translates its platform payloads into these types once,
//! right after `load_vm`. Validation and mapping only ever look at this model.

use serde::{Deserialize, Serialize};

/// Source VM, normalized across platforms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceVm {
    pub id: String,
    pub name: String,
    pub cluster: Option<String>,
    /// Platform status string ("up", "down", "migrating", ...)
    pub status: String,
    pub cpu_sockets: u32,
    pub cpu_cores: u32,
    pub cpu_threads: u32,
    pub cpu_architecture: Option<String>,
    pub memory_mib: u64,
    /// `bios`, `efi` or `secure_boot`; anything else is unrecognized
    pub bios_type: Option<String>,
    pub machine_type: Option<String>,
    pub serial: Option<String>,
    /// Origin platform marker; VMs exported from a cluster come back as `kubevirt`
    pub origin: Option<String>,
    pub features: VmFeatures,
    pub nics: Vec<SourceNic>,
    pub disks: Vec<SourceDisk>,
}

impl SourceVm {
    pub fn total_vcpus(&self) -> u32 {
        self.cpu_sockets * self.cpu_cores.max(1) * self.cpu_threads.max(1)
    }

    pub fn disk(&self, id: &str) -> Option<&SourceDisk> {
        self.disks.iter().find(|d| d.id == id)
    }
}

/// Optional VM features that have no (or only partial) equivalent on the target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VmFeatures {
    pub high_availability: bool,
    pub cpu_shares: u32,
    pub cpu_pinning: bool,
    pub cpu_hotplug: bool,
    pub memory_hotplug: bool,
    pub custom_properties: bool,
    pub graphics: Vec<String>,
    pub has_illegal_images: bool,
    pub io_threads: u32,
    pub memory_ballooning: bool,
    pub memory_overcommit_percent: u32,
    pub migration_policy: Option<String>,
    pub numa_tuned: bool,
    pub placement_affinity: Option<String>,
    pub rng_source: Option<String>,
    pub sound_card: bool,
    pub start_paused: bool,
    pub storage_error_resume: Option<String>,
    pub timezone: Option<String>,
    pub tpm: bool,
    pub usb: bool,
    pub watchdog_model: Option<String>,
    pub nested_virtualization: bool,
    pub fault_tolerance: bool,
    pub snapshot_count: u32,
    pub host_devices: u32,
}

/// Source network interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceNic {
    pub id: String,
    pub name: String,
    /// Id of the network (or vNIC profile) the interface is attached to
    pub network_id: Option<String>,
    pub network_name: Option<String>,
    pub interface_model: String,
    pub mac_address: Option<String>,
    pub plugged: bool,
    pub linked: bool,
    pub on_boot: bool,
    pub port_mirroring: bool,
    pub pass_through: bool,
    pub custom_properties: bool,
    pub network_filter: Option<String>,
    pub qos: bool,
}

/// Source disk together with its attachment to the VM.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceDisk {
    pub id: String,
    pub name: String,
    pub size_bytes: u64,
    pub storage_domain_id: Option<String>,
    pub storage_domain_name: Option<String>,
    /// Attachment bus (`virtio`, `virtio_scsi`, `sata`, `ide`, ...)
    pub interface: String,
    pub bootable: bool,
    /// Platform disk status; `ok` is the only importable value
    pub status: String,
    /// `image`, `lun`, `cinder`, ...
    pub storage_type: String,
    pub format: Option<String>,
    pub read_only: bool,
    pub pass_discard: bool,
    pub uses_scsi_reservation: bool,
    pub logical_name: Option<String>,
    pub sgio: Option<String>,
    pub shareable: bool,
    pub backup: bool,
    pub propagate_errors: bool,
    pub wipe_after_delete: bool,
    pub independent_mode: bool,
    /// Datastore path of the backing file (VMware)
    pub backing_file: Option<String>,
}
