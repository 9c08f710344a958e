//! Attribute checks over a normalized source VM.
//!
//! Each check has a stable id and a default action. Validators only report
//! *that* a check tripped; the action table decides what that means.

use super::{CheckAction, ValidationFailure};
use crate::provider::{SourceDisk, SourceNic, SourceVm};
use std::fmt;
use std::str::FromStr;

macro_rules! checks {
    ($( $variant:ident => $id:literal, $action:ident; )*) => {
        /// Identifier of one attribute check.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum CheckId {
            $( $variant, )*
        }

        impl CheckId {
            /// Every known check, in table order.
            pub const ALL: &'static [CheckId] = &[$( CheckId::$variant, )*];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $( CheckId::$variant => $id, )*
                }
            }

            /// Action applied when no override is configured.
            pub fn default_action(&self) -> CheckAction {
                match self {
                    $( CheckId::$variant => CheckAction::$action, )*
                }
            }
        }

        impl FromStr for CheckId {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $id => Ok(CheckId::$variant), )*
                    _ => Err(format!("Unknown check id: {}", s)),
                }
            }
        }
    };
}

checks! {
    // VM
    VmCpuArchitecture => "vm.cpu.architecture", Block;
    VmCpuTopology => "vm.cpu.topology", Block;
    VmCpuShares => "vm.cpu.shares", Log;
    VmCpuPinning => "vm.cpu.pinning", Warn;
    VmCpuHotplug => "vm.cpu.hotplug", Log;
    VmMemory => "vm.memory", Block;
    VmMemoryHotplug => "vm.memory.hotplug", Log;
    VmMemoryBallooning => "vm.memory.ballooning", Log;
    VmMemoryOvercommit => "vm.memory.overcommit", Warn;
    VmBiosType => "vm.bios.type", Warn;
    VmMachineType => "vm.machine_type", Log;
    VmCustomProperties => "vm.custom_properties", Warn;
    VmDisplayType => "vm.display.type", Log;
    VmHasIllegalImages => "vm.has_illegal_images", Block;
    VmHighAvailability => "vm.ha.enabled", Log;
    VmIoThreads => "vm.io_threads", Log;
    VmMigrationPolicy => "vm.migration", Log;
    VmNumaTune => "vm.numa_tune", Warn;
    VmOrigin => "vm.origin", Block;
    VmPlacementAffinity => "vm.placement_policy.affinity", Warn;
    VmRngSource => "vm.rng_device.source", Warn;
    VmSoundCard => "vm.sound_card", Warn;
    VmStartPaused => "vm.start_paused", Log;
    VmStorageErrorResume => "vm.storage_error_resume_behaviour", Log;
    VmTimezone => "vm.timezone", Log;
    VmTpm => "vm.tpm", Warn;
    VmUsb => "vm.usb", Warn;
    VmWatchdog => "vm.watchdog", Warn;
    VmStatus => "vm.status", Block;
    VmSerialNumber => "vm.serial_number", Log;
    VmNestedVirtualization => "vm.nested_virtualization", Warn;
    VmFaultTolerance => "vm.fault_tolerance", Block;
    VmSnapshots => "vm.snapshots", Log;
    VmHostDevices => "vm.host_devices", Block;
    // NIC
    NicInterfaceModel => "nic.interface_model", Block;
    NicNetwork => "nic.network", Block;
    NicMacAddress => "nic.mac_address", Warn;
    NicOnBoot => "nic.on_boot", Log;
    NicPlugged => "nic.plugged", Warn;
    NicLinked => "nic.linked", Log;
    NicPortMirroring => "nic.port_mirroring", Warn;
    NicPassThrough => "nic.vnic_profile.pass_through", Block;
    NicCustomProperties => "nic.vnic_profile.custom_properties", Warn;
    NicNetworkFilter => "nic.vnic_profile.network_filter", Warn;
    NicQos => "nic.vnic_profile.qos", Warn;
    // Disk attachment
    DiskAttachmentInterface => "disk_attachment.interface", Block;
    DiskAttachmentLogicalName => "disk_attachment.logical_name", Log;
    DiskAttachmentPassDiscard => "disk_attachment.pass_discard", Warn;
    DiskAttachmentScsiReservation => "disk_attachment.uses_scsi_reservation", Block;
    DiskAttachmentReadOnly => "disk_attachment.read_only", Warn;
    // Disk
    DiskBackup => "disk.backup", Warn;
    DiskLunStorage => "disk.lun_storage", Block;
    DiskPropagateErrors => "disk.propagate_errors", Log;
    DiskWipeAfterDelete => "disk.wipe_after_delete", Log;
    DiskStatus => "disk.status", Block;
    DiskStorageType => "disk.storage_type", Block;
    DiskSgio => "disk.sgio", Block;
    DiskShareable => "disk.shareable", Block;
    DiskFormat => "disk.format", Log;
    DiskSize => "disk.size", Block;
    DiskIndependentMode => "disk.independent_mode", Warn;
}

impl fmt::Display for CheckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const SUPPORTED_ARCHITECTURES: &[&str] = &["x86_64", "undefined"];
const SUPPORTED_BIOS_TYPES: &[&str] = &["bios", "efi", "secure_boot"];
const IMPORTABLE_VM_STATUSES: &[&str] = &["up", "down", "poweredon", "poweredoff"];
const SUPPORTED_NIC_MODELS: &[&str] = &[
    "virtio", "e1000", "e1000e", "rtl8139", "ne2k_pci", "pcnet", "vmxnet3",
];
const SUPPORTED_DISK_INTERFACES: &[&str] = &["virtio", "virtio_scsi", "sata", "scsi", "ide"];

fn fail(failures: &mut Vec<ValidationFailure>, check_id: CheckId, message: String) {
    failures.push(ValidationFailure { check_id, message });
}

/// Run every VM, NIC and disk check.
pub fn validate_source_vm(vm: &SourceVm) -> Vec<ValidationFailure> {
    let mut failures = validate_vm(vm);
    for nic in &vm.nics {
        failures.extend(validate_nic(nic));
    }
    for disk in &vm.disks {
        failures.extend(validate_disk(disk));
    }
    failures
}

/// VM-level attribute checks.
pub fn validate_vm(vm: &SourceVm) -> Vec<ValidationFailure> {
    let mut failures = Vec::new();
    let name = &vm.name;
    let features = &vm.features;

    if let Some(arch) = vm.cpu_architecture.as_deref() {
        if !SUPPORTED_ARCHITECTURES.contains(&arch.to_lowercase().as_str()) {
            fail(
                &mut failures,
                CheckId::VmCpuArchitecture,
                format!("VM {name} has unsupported CPU architecture {arch}"),
            );
        }
    }
    if vm.cpu_sockets == 0 {
        fail(
            &mut failures,
            CheckId::VmCpuTopology,
            format!("VM {name} has no CPU sockets"),
        );
    }
    if features.cpu_shares > 0 {
        fail(
            &mut failures,
            CheckId::VmCpuShares,
            format!("VM {name} has CPU shares set to {}", features.cpu_shares),
        );
    }
    if features.cpu_pinning {
        fail(
            &mut failures,
            CheckId::VmCpuPinning,
            format!("VM {name} uses CPU pinning"),
        );
    }
    if features.cpu_hotplug {
        fail(
            &mut failures,
            CheckId::VmCpuHotplug,
            format!("VM {name} has CPU hotplug enabled"),
        );
    }
    if vm.memory_mib == 0 {
        fail(
            &mut failures,
            CheckId::VmMemory,
            format!("VM {name} has no memory"),
        );
    }
    if features.memory_hotplug {
        fail(
            &mut failures,
            CheckId::VmMemoryHotplug,
            format!("VM {name} has memory hotplug enabled"),
        );
    }
    if features.memory_ballooning {
        fail(
            &mut failures,
            CheckId::VmMemoryBallooning,
            format!("VM {name} has memory ballooning enabled"),
        );
    }
    if features.memory_overcommit_percent > 100 {
        fail(
            &mut failures,
            CheckId::VmMemoryOvercommit,
            format!(
                "VM {name} overcommits memory by {}%",
                features.memory_overcommit_percent
            ),
        );
    }
    if let Some(bios) = vm.bios_type.as_deref() {
        if !SUPPORTED_BIOS_TYPES.contains(&bios) {
            fail(
                &mut failures,
                CheckId::VmBiosType,
                format!("VM {name} has unrecognized BIOS type {bios}, BIOS will be used"),
            );
        }
    }
    if let Some(machine_type) = vm.machine_type.as_deref() {
        fail(
            &mut failures,
            CheckId::VmMachineType,
            format!("VM {name} machine type {machine_type} is replaced by the cluster default"),
        );
    }
    if features.custom_properties {
        fail(
            &mut failures,
            CheckId::VmCustomProperties,
            format!("VM {name} has custom properties"),
        );
    }
    let unsupported_graphics: Vec<&str> = features
        .graphics
        .iter()
        .map(String::as_str)
        .filter(|g| !g.eq_ignore_ascii_case("vnc"))
        .collect();
    if !unsupported_graphics.is_empty() {
        fail(
            &mut failures,
            CheckId::VmDisplayType,
            format!(
                "VM {name} graphics consoles {} are replaced by VNC",
                unsupported_graphics.join(", ")
            ),
        );
    }
    if features.has_illegal_images {
        fail(
            &mut failures,
            CheckId::VmHasIllegalImages,
            format!("VM {name} has illegal disk images"),
        );
    }
    if features.high_availability {
        fail(
            &mut failures,
            CheckId::VmHighAvailability,
            format!("VM {name} is highly available"),
        );
    }
    if features.io_threads > 1 {
        fail(
            &mut failures,
            CheckId::VmIoThreads,
            format!("VM {name} uses {} IO threads", features.io_threads),
        );
    }
    if let Some(policy) = features.migration_policy.as_deref() {
        fail(
            &mut failures,
            CheckId::VmMigrationPolicy,
            format!("VM {name} has migration policy {policy}"),
        );
    }
    if features.numa_tuned {
        fail(
            &mut failures,
            CheckId::VmNumaTune,
            format!("VM {name} has NUMA tuning"),
        );
    }
    if vm
        .origin
        .as_deref()
        .is_some_and(|o| o.eq_ignore_ascii_case("kubevirt"))
    {
        fail(
            &mut failures,
            CheckId::VmOrigin,
            format!("VM {name} originates from a cluster import"),
        );
    }
    if let Some(affinity) = features.placement_affinity.as_deref() {
        fail(
            &mut failures,
            CheckId::VmPlacementAffinity,
            format!("VM {name} has placement affinity {affinity}"),
        );
    }
    if let Some(rng) = features.rng_source.as_deref() {
        if rng != "urandom" && rng != "random" {
            fail(
                &mut failures,
                CheckId::VmRngSource,
                format!("VM {name} uses random number source {rng}"),
            );
        }
    }
    if features.sound_card {
        fail(
            &mut failures,
            CheckId::VmSoundCard,
            format!("VM {name} has a sound card"),
        );
    }
    if features.start_paused {
        fail(
            &mut failures,
            CheckId::VmStartPaused,
            format!("VM {name} starts paused"),
        );
    }
    if let Some(behaviour) = features.storage_error_resume.as_deref() {
        fail(
            &mut failures,
            CheckId::VmStorageErrorResume,
            format!("VM {name} storage error resume behaviour {behaviour} is ignored"),
        );
    }
    if let Some(timezone) = features.timezone.as_deref() {
        fail(
            &mut failures,
            CheckId::VmTimezone,
            format!("VM {name} timezone {timezone} is not carried over"),
        );
    }
    if features.tpm {
        fail(
            &mut failures,
            CheckId::VmTpm,
            format!("VM {name} has a TPM device"),
        );
    }
    if features.usb {
        fail(
            &mut failures,
            CheckId::VmUsb,
            format!("VM {name} has USB enabled"),
        );
    }
    if let Some(model) = features.watchdog_model.as_deref() {
        if model != "i6300esb" {
            fail(
                &mut failures,
                CheckId::VmWatchdog,
                format!("VM {name} has unsupported watchdog {model}"),
            );
        }
    }
    if !vm.status.is_empty()
        && !IMPORTABLE_VM_STATUSES.contains(&vm.status.to_lowercase().as_str())
    {
        fail(
            &mut failures,
            CheckId::VmStatus,
            format!("VM {name} is in status {}", vm.status),
        );
    }
    if let Some(serial) = vm.serial.as_deref() {
        fail(
            &mut failures,
            CheckId::VmSerialNumber,
            format!("VM {name} serial number {serial} is carried over as firmware serial"),
        );
    }
    if features.nested_virtualization {
        fail(
            &mut failures,
            CheckId::VmNestedVirtualization,
            format!("VM {name} uses nested virtualization"),
        );
    }
    if features.fault_tolerance {
        fail(
            &mut failures,
            CheckId::VmFaultTolerance,
            format!("VM {name} has fault tolerance enabled"),
        );
    }
    if features.snapshot_count > 0 {
        fail(
            &mut failures,
            CheckId::VmSnapshots,
            format!(
                "VM {name} has {} snapshots that are not imported",
                features.snapshot_count
            ),
        );
    }
    if features.host_devices > 0 {
        fail(
            &mut failures,
            CheckId::VmHostDevices,
            format!("VM {name} has {} host devices", features.host_devices),
        );
    }

    failures
}

/// NIC attribute checks.
pub fn validate_nic(nic: &SourceNic) -> Vec<ValidationFailure> {
    let mut failures = Vec::new();
    let name = &nic.name;

    if !SUPPORTED_NIC_MODELS.contains(&nic.interface_model.to_lowercase().as_str()) {
        fail(
            &mut failures,
            CheckId::NicInterfaceModel,
            format!(
                "NIC {name} has unsupported interface model {}",
                nic.interface_model
            ),
        );
    }
    if nic.network_id.is_none() && nic.network_name.is_none() {
        fail(
            &mut failures,
            CheckId::NicNetwork,
            format!("NIC {name} is not attached to a network"),
        );
    }
    if nic.mac_address.as_deref().is_none_or(str::is_empty) {
        fail(
            &mut failures,
            CheckId::NicMacAddress,
            format!("NIC {name} has no MAC address, a new one is generated"),
        );
    }
    if !nic.on_boot {
        fail(
            &mut failures,
            CheckId::NicOnBoot,
            format!("NIC {name} is not activated on boot"),
        );
    }
    if !nic.plugged {
        fail(
            &mut failures,
            CheckId::NicPlugged,
            format!("NIC {name} is unplugged"),
        );
    }
    if !nic.linked {
        fail(
            &mut failures,
            CheckId::NicLinked,
            format!("NIC {name} link is down"),
        );
    }
    if nic.port_mirroring {
        fail(
            &mut failures,
            CheckId::NicPortMirroring,
            format!("NIC {name} uses port mirroring"),
        );
    }
    if nic.pass_through {
        fail(
            &mut failures,
            CheckId::NicPassThrough,
            format!("NIC {name} uses pass-through"),
        );
    }
    if nic.custom_properties {
        fail(
            &mut failures,
            CheckId::NicCustomProperties,
            format!("NIC {name} profile has custom properties"),
        );
    }
    if let Some(filter) = nic.network_filter.as_deref() {
        fail(
            &mut failures,
            CheckId::NicNetworkFilter,
            format!("NIC {name} profile has network filter {filter}"),
        );
    }
    if nic.qos {
        fail(
            &mut failures,
            CheckId::NicQos,
            format!("NIC {name} profile has QoS"),
        );
    }

    failures
}

/// Disk and disk-attachment checks.
pub fn validate_disk(disk: &SourceDisk) -> Vec<ValidationFailure> {
    let mut failures = Vec::new();
    let name = &disk.name;

    if !SUPPORTED_DISK_INTERFACES.contains(&disk.interface.to_lowercase().as_str()) {
        fail(
            &mut failures,
            CheckId::DiskAttachmentInterface,
            format!("Disk {name} uses unsupported interface {}", disk.interface),
        );
    }
    if let Some(logical_name) = disk.logical_name.as_deref() {
        fail(
            &mut failures,
            CheckId::DiskAttachmentLogicalName,
            format!("Disk {name} logical name {logical_name} is not preserved"),
        );
    }
    if disk.pass_discard {
        fail(
            &mut failures,
            CheckId::DiskAttachmentPassDiscard,
            format!("Disk {name} passes discard requests"),
        );
    }
    if disk.uses_scsi_reservation {
        fail(
            &mut failures,
            CheckId::DiskAttachmentScsiReservation,
            format!("Disk {name} uses SCSI reservation"),
        );
    }
    if disk.read_only {
        fail(
            &mut failures,
            CheckId::DiskAttachmentReadOnly,
            format!("Disk {name} is attached read-only"),
        );
    }
    if disk.backup {
        fail(
            &mut failures,
            CheckId::DiskBackup,
            format!("Disk {name} has incremental backup enabled"),
        );
    }
    let storage_type = disk.storage_type.to_lowercase();
    if storage_type == "lun" {
        fail(
            &mut failures,
            CheckId::DiskLunStorage,
            format!("Disk {name} is a direct LUN"),
        );
    } else if !storage_type.is_empty() && storage_type != "image" {
        fail(
            &mut failures,
            CheckId::DiskStorageType,
            format!("Disk {name} has unsupported storage type {}", disk.storage_type),
        );
    }
    if disk.propagate_errors {
        fail(
            &mut failures,
            CheckId::DiskPropagateErrors,
            format!("Disk {name} propagates errors"),
        );
    }
    if disk.wipe_after_delete {
        fail(
            &mut failures,
            CheckId::DiskWipeAfterDelete,
            format!("Disk {name} is wiped after delete"),
        );
    }
    if !disk.status.is_empty() && !disk.status.eq_ignore_ascii_case("ok") {
        fail(
            &mut failures,
            CheckId::DiskStatus,
            format!("Disk {name} is in status {}", disk.status),
        );
    }
    if let Some(sgio) = disk.sgio.as_deref() {
        fail(
            &mut failures,
            CheckId::DiskSgio,
            format!("Disk {name} uses SCSI generic IO {sgio}"),
        );
    }
    if disk.shareable {
        fail(
            &mut failures,
            CheckId::DiskShareable,
            format!("Disk {name} is shareable"),
        );
    }
    if let Some(format) = disk.format.as_deref() {
        if !format.eq_ignore_ascii_case("raw") {
            fail(
                &mut failures,
                CheckId::DiskFormat,
                format!("Disk {name} in {format} format is converted to raw"),
            );
        }
    }
    if disk.size_bytes == 0 {
        fail(
            &mut failures,
            CheckId::DiskSize,
            format!("Disk {name} has no size"),
        );
    }
    if disk.independent_mode {
        fail(
            &mut failures,
            CheckId::DiskIndependentMode,
            format!("Disk {name} is independent and cannot be snapshotted"),
        );
    }

    failures
}
