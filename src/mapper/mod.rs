//! Source VM to target object translation.
//!
//! A [`Mapper`] turns the normalized source VM plus the merged mapping into
//! the target `VirtualMachine` and one `DataVolumeSpec` per source disk.
//! Platforms differ only in how a disk's bytes are fetched, which is captured
//! by [`VolumeSourceTemplate`].

use crate::provider::{SourceDisk, SourceNic, SourceVm};
use crate::resources::{
    normalize_name, Bootloader, CpuTopology, DataVolumeSource, DataVolumeSpec, DiskBus, Firmware,
    ImageIoSource, InterfaceBinding, MappingConfiguration, ObjectMeta, StorageSpec, VddkSource,
    VirtualMachine, VirtualMachineSpec, VmDisk, VmInterface, VmNetwork, VmTemplateSpec, VmVolume,
    MAX_NAME_LEN,
};
use crate::mapping::find_mapping;
use crate::validation::mapping::{network_type, storage_mapping_for, NETWORK_TYPE_MULTUS};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// Annotation recording which source VM a target VM was imported from.
pub const SOURCE_VM_ANNOTATION: &str = "vmimport.io/source-vm-id";

/// Errors raised while translating a source VM.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MapperError {
    #[error("NIC {nic} network has no mapping")]
    MissingNetworkMapping { nic: String },

    #[error("disk {disk} has no storage mapping")]
    MissingStorageMapping { disk: String },

    #[error("disks {first} and {second} both map to data volume {name}")]
    DataVolumeNameCollision {
        name: String,
        first: String,
        second: String,
    },
}

/// Names of the transient objects the importer reads its credentials from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapperContext {
    pub namespace: String,
    pub credentials_secret: String,
    pub ca_config_map: String,
}

/// Where the disk importer reads a disk from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeSourceTemplate {
    /// oVirt image transfer endpoint
    ImageIo { url: String },
    /// VMware VDDK endpoint
    Vddk { url: String, thumbprint: String },
}

/// Translates a loaded source VM into target objects.
pub trait Mapper: Send + Sync {
    /// Target VM for `target_name`, without disks or volumes.
    fn map_vm(&self, target_name: &str) -> Result<VirtualMachine, MapperError>;

    /// One data volume spec per source disk, keyed by source disk id.
    fn map_data_volumes(
        &self,
        target_name: &str,
    ) -> Result<BTreeMap<String, DataVolumeSpec>, MapperError>;

    /// Wire disks and volumes into the VM, given source disk id to data volume name.
    ///
    /// Replaces any previous wiring so repeated calls converge.
    fn map_disks(&self, vm: &mut VirtualMachine, data_volumes: &BTreeMap<String, String>);
}

/// Longest disk id kept verbatim in a data volume name; fits a UUID.
const MAX_DISK_SUFFIX: usize = 40;
/// Hex digits of the disk id digest used when the id cannot be kept verbatim.
const DIGEST_LEN: usize = 8;

/// Data volume name for one disk of a target VM.
///
/// Only the target part is shortened to fit a DNS-1123 label, so every disk
/// keeps its own suffix. Disk ids that are too long or not valid label
/// characters are shortened and tagged with a digest of the raw id.
pub fn data_volume_name(target_name: &str, disk_id: &str) -> String {
    let suffix = disk_suffix(disk_id);
    let mut prefix = normalize_name(target_name);
    prefix.truncate(MAX_NAME_LEN - suffix.len() - 1);
    format!("{}-{}", prefix.trim_end_matches('-'), suffix)
}

fn disk_suffix(disk_id: &str) -> String {
    let normalized = normalize_name(disk_id);
    if normalized == disk_id && normalized.len() <= MAX_DISK_SUFFIX {
        return normalized;
    }
    let digest = Uuid::new_v5(&Uuid::NAMESPACE_OID, disk_id.as_bytes()).simple().to_string();
    let mut head = normalized;
    head.truncate(MAX_DISK_SUFFIX - DIGEST_LEN - 1);
    format!("{}-{}", head.trim_end_matches('-'), &digest[..DIGEST_LEN])
}

/// Data volume names for the given disks, keyed by disk id.
///
/// # Errors
///
/// Returns `MapperError::DataVolumeNameCollision` if two disks end up with
/// the same name.
pub fn data_volume_names<'a>(
    target_name: &str,
    disk_ids: impl IntoIterator<Item = &'a str>,
) -> Result<BTreeMap<String, String>, MapperError> {
    let mut names = BTreeMap::new();
    let mut owners: BTreeMap<String, &str> = BTreeMap::new();
    for disk_id in disk_ids {
        let name = data_volume_name(target_name, disk_id);
        if let Some(first) = owners.insert(name.clone(), disk_id) {
            return Err(MapperError::DataVolumeNameCollision {
                name,
                first: first.to_string(),
                second: disk_id.to_string(),
            });
        }
        names.insert(disk_id.to_string(), name);
    }
    Ok(names)
}

/// Platform-independent mapper over the normalized source model.
pub struct VmMapper {
    vm: SourceVm,
    mapping: MappingConfiguration,
    context: MapperContext,
    volume_source: VolumeSourceTemplate,
}

impl VmMapper {
    pub fn new(
        vm: SourceVm,
        mapping: MappingConfiguration,
        context: MapperContext,
        volume_source: VolumeSourceTemplate,
    ) -> Self {
        Self {
            vm,
            mapping,
            context,
            volume_source,
        }
    }

    fn map_firmware(&self) -> Firmware {
        let bootloader = match self.vm.bios_type.as_deref() {
            Some("efi") => Bootloader::Efi { secure_boot: false },
            Some("secure_boot") => Bootloader::Efi { secure_boot: true },
            _ => Bootloader::Bios,
        };
        Firmware {
            serial: self.vm.serial.clone(),
            bootloader,
        }
    }

    fn map_nic(&self, nic: &SourceNic) -> Result<(VmInterface, VmNetwork), MapperError> {
        let item = find_mapping(
            self.mapping.network_mappings.as_deref(),
            nic.network_id.as_deref(),
            nic.network_name.as_deref(),
        )
        .ok_or_else(|| MapperError::MissingNetworkMapping {
            nic: nic.name.clone(),
        })?;

        let name = normalize_name(&nic.name);
        let (binding, network) = if network_type(item) == NETWORK_TYPE_MULTUS {
            (
                InterfaceBinding::Bridge,
                VmNetwork {
                    name: name.clone(),
                    pod: false,
                    multus: Some(item.target.qualified(&self.context.namespace)),
                },
            )
        } else {
            (
                InterfaceBinding::Masquerade,
                VmNetwork {
                    name: name.clone(),
                    pod: true,
                    multus: None,
                },
            )
        };

        let interface = VmInterface {
            name,
            model: interface_model(&nic.interface_model).to_string(),
            mac_address: nic.mac_address.clone().filter(|mac| !mac.is_empty()),
            binding,
        };
        Ok((interface, network))
    }

    fn map_volume_source(&self, disk: &SourceDisk) -> DataVolumeSource {
        match &self.volume_source {
            VolumeSourceTemplate::ImageIo { url } => DataVolumeSource {
                imageio: Some(ImageIoSource {
                    url: url.clone(),
                    disk_id: disk.id.clone(),
                    secret_ref: self.context.credentials_secret.clone(),
                    cert_config_map: self.context.ca_config_map.clone(),
                }),
                vddk: None,
            },
            VolumeSourceTemplate::Vddk { url, thumbprint } => DataVolumeSource {
                imageio: None,
                vddk: Some(VddkSource {
                    url: url.clone(),
                    uuid: self.vm.id.clone(),
                    backing_file: disk.backing_file.clone().unwrap_or_default(),
                    thumbprint: thumbprint.clone(),
                    secret_ref: self.context.credentials_secret.clone(),
                }),
            },
        }
    }
}

impl Mapper for VmMapper {
    fn map_vm(&self, target_name: &str) -> Result<VirtualMachine, MapperError> {
        let mut interfaces = Vec::with_capacity(self.vm.nics.len());
        let mut networks = Vec::with_capacity(self.vm.nics.len());
        for nic in &self.vm.nics {
            let (interface, network) = self.map_nic(nic)?;
            interfaces.push(interface);
            networks.push(network);
        }

        let mut metadata = ObjectMeta::new(self.context.namespace.clone(), target_name);
        metadata
            .annotations
            .insert(SOURCE_VM_ANNOTATION.to_string(), self.vm.id.clone());

        Ok(VirtualMachine {
            metadata,
            spec: VirtualMachineSpec {
                running: false,
                template: VmTemplateSpec {
                    cpu: CpuTopology {
                        sockets: self.vm.cpu_sockets.max(1),
                        cores: self.vm.cpu_cores.max(1),
                        threads: self.vm.cpu_threads.max(1),
                    },
                    memory_mib: self.vm.memory_mib,
                    firmware: self.map_firmware(),
                    machine_type: None,
                    disks: Vec::new(),
                    volumes: Vec::new(),
                    interfaces,
                    networks,
                },
            },
        })
    }

    fn map_data_volumes(
        &self,
        _target_name: &str,
    ) -> Result<BTreeMap<String, DataVolumeSpec>, MapperError> {
        let mut volumes = BTreeMap::new();
        for disk in &self.vm.disks {
            let item = storage_mapping_for(&self.mapping, disk).ok_or_else(|| {
                MapperError::MissingStorageMapping {
                    disk: disk.name.clone(),
                }
            })?;

            let spec = DataVolumeSpec {
                source: self.map_volume_source(disk),
                storage: StorageSpec {
                    storage_class_name: Some(item.target.name.clone()),
                    size_bytes: disk.size_bytes,
                    volume_mode: item.volume_mode,
                    access_modes: item.access_mode.into_iter().collect(),
                },
                checkpoints: Vec::new(),
                final_checkpoint: false,
            };
            volumes.insert(disk.id.clone(), spec);
        }
        Ok(volumes)
    }

    fn map_disks(&self, vm: &mut VirtualMachine, data_volumes: &BTreeMap<String, String>) {
        let template = &mut vm.spec.template;
        template.disks.clear();
        template.volumes.clear();

        // Source disk order decides device order; the bootable disk boots first
        for disk in &self.vm.disks {
            let Some(volume) = data_volumes.get(&disk.id) else {
                continue;
            };
            template.disks.push(VmDisk {
                name: volume.clone(),
                bus: disk_bus(&disk.interface),
                boot_order: disk.bootable.then_some(1),
            });
            template.volumes.push(VmVolume {
                name: volume.clone(),
                data_volume: volume.clone(),
            });
        }
    }
}

fn interface_model(source: &str) -> &'static str {
    match source.to_lowercase().as_str() {
        "e1000" => "e1000",
        "e1000e" => "e1000e",
        "rtl8139" => "rtl8139",
        "ne2k_pci" => "ne2k_pci",
        "pcnet" => "pcnet",
        _ => "virtio",
    }
}

fn disk_bus(interface: &str) -> DiskBus {
    match interface.to_lowercase().as_str() {
        "sata" | "ide" => DiskBus::Sata,
        "scsi" | "virtio_scsi" => DiskBus::Scsi,
        _ => DiskBus::Virtio,
    }
}
