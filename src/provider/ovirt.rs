//! oVirt provider implementation.

use super::{
    check_status, Credentials, Provider, ProviderError, ProviderState, SourceDisk, SourceNic,
    SourceVm, VmFeatures, VmPowerState,
};
use crate::mapper::{Mapper, MapperContext, VmMapper, VolumeSourceTemplate};
use crate::resources::{MappingConfiguration, PlatformSource, Secret, SourceType};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// oVirt engine provider.
///
/// Talks to the engine REST API in JSON:
/// - VM lookup via GET /vms/{id} or GET /vms?search=name=...
/// - NICs via GET /vms/{id}/nics, disks via GET /vms/{id}/diskattachments + GET /disks/{id}
/// - Power via POST /vms/{id}/stop and /vms/{id}/start
///
/// Disks are copied through the engine's image transfer service, so warm
/// imports are not supported.
pub struct OvirtProvider {
    /// Shared HTTP client for connection pooling
    client: Arc<Client>,
    /// Per-request timeout
    timeout: Duration,
    state: ProviderState,
}

impl OvirtProvider {
    pub fn new(client: Arc<Client>, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            state: ProviderState::default(),
        }
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let creds = self.state.credentials()?;
        let url = format!("{}/{}", creds.api_url, path);

        let response = self
            .client
            .get(&url)
            .basic_auth(&creds.username, Some(&creds.password))
            .header("Accept", "application/json")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, self.timeout_ms()))?;

        let response = check_status(response, path).await?;
        let body = response.text().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to read response body: {}", e))
        })?;
        serde_json::from_str(&body).map_err(|e| {
            ProviderError::InvalidResponse(format!(
                "Failed to parse oVirt response for {}: {}",
                path, e
            ))
        })
    }

    async fn post_action(&self, path: &str) -> Result<(), ProviderError> {
        let creds = self.state.credentials()?;
        let url = format!("{}/{}", creds.api_url, path);

        let response = self
            .client
            .post(&url)
            .basic_auth(&creds.username, Some(&creds.password))
            .header("Accept", "application/json")
            .json(&serde_json::json!({}))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, self.timeout_ms()))?;

        check_status(response, path).await.map(|_| ())
    }

    async fn find_vm(&self, source: &PlatformSource) -> Result<OvirtVm, ProviderError> {
        if let Some(id) = source.vm.id.as_deref() {
            return self.get_json(&format!("vms/{}", id)).await;
        }

        let name = source.vm.name.as_deref().ok_or_else(|| {
            ProviderError::Configuration("source VM needs an id or a name".to_string())
        })?;
        let mut search = format!("name={}", name);
        if let Some(cluster) = source.vm.cluster.as_deref() {
            search.push_str(&format!(" and cluster={}", cluster));
        }
        let found: OvirtVmList = self
            .get_json(&format!("vms?search={}", urlencode(&search)))
            .await?;

        found
            .vm
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::NotFound(format!("VM {}", name)))
    }

    fn vm_id(&self) -> Result<&str, ProviderError> {
        Ok(self.state.vm()?.id.as_str())
    }
}

fn urlencode(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            ' ' => "%20".to_string(),
            '=' => "%3D".to_string(),
            c => c.to_string(),
        })
        .collect()
}

// ============================================================================
// Engine payloads
// ============================================================================

#[derive(Debug, Deserialize)]
struct OvirtVmList {
    #[serde(default)]
    vm: Vec<OvirtVm>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OvirtVm {
    id: String,
    name: String,
    status: String,
    cluster: Option<OvirtRef>,
    cpu: OvirtCpu,
    /// Bytes
    memory: u64,
    bios: Option<OvirtBios>,
    custom_emulated_machine: Option<String>,
    serial_number: Option<OvirtSerial>,
    origin: Option<String>,
    high_availability: OvirtEnabled,
    usb: OvirtEnabled,
    soundcard_enabled: bool,
    start_paused: bool,
    io: Option<OvirtIo>,
    memory_policy: Option<OvirtMemoryPolicy>,
    placement_policy: Option<OvirtPlacement>,
    rng_device: Option<OvirtRng>,
    storage_error_resume_behaviour: Option<String>,
    time_zone: Option<OvirtTimeZone>,
    custom_properties: Option<serde_json::Value>,
    has_illegal_images: bool,
    numa_tune_mode: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OvirtRef {
    id: String,
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OvirtCpu {
    architecture: Option<String>,
    topology: OvirtTopology,
    cpu_tune: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OvirtTopology {
    sockets: u32,
    cores: u32,
    threads: u32,
}

#[derive(Debug, Deserialize)]
struct OvirtBios {
    #[serde(rename = "type")]
    bios_type: String,
}

#[derive(Debug, Deserialize)]
struct OvirtSerial {
    value: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OvirtEnabled {
    enabled: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OvirtIo {
    threads: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OvirtMemoryPolicy {
    ballooning: bool,
    over_commit: Option<OvirtOverCommit>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OvirtOverCommit {
    percent: u32,
}

#[derive(Debug, Deserialize)]
struct OvirtPlacement {
    affinity: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OvirtRng {
    source: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OvirtTimeZone {
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OvirtNicList {
    #[serde(default)]
    nic: Vec<OvirtNic>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OvirtNic {
    id: String,
    name: String,
    interface: String,
    mac: Option<OvirtMac>,
    plugged: bool,
    linked: bool,
    on_boot: Option<bool>,
    vnic_profile: Option<OvirtVnicProfile>,
}

#[derive(Debug, Deserialize)]
struct OvirtMac {
    address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OvirtVnicProfile {
    id: String,
    name: Option<String>,
    pass_through: Option<OvirtPassThrough>,
    port_mirroring: bool,
    network_filter: Option<OvirtRef>,
    qos: Option<OvirtRef>,
    custom_properties: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OvirtPassThrough {
    mode: String,
}

#[derive(Debug, Default, Deserialize)]
struct OvirtDiskAttachmentList {
    #[serde(default)]
    disk_attachment: Vec<OvirtDiskAttachment>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OvirtDiskAttachment {
    interface: String,
    bootable: bool,
    pass_discard: bool,
    uses_scsi_reservation: bool,
    read_only: bool,
    logical_name: Option<String>,
    disk: OvirtRef,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OvirtDisk {
    id: String,
    alias: Option<String>,
    name: Option<String>,
    provisioned_size: u64,
    status: String,
    storage_type: String,
    format: Option<String>,
    sgio: Option<String>,
    shareable: bool,
    backup: Option<String>,
    propagate_errors: bool,
    wipe_after_delete: bool,
    storage_domains: Option<OvirtStorageDomains>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OvirtStorageDomains {
    storage_domain: Vec<OvirtRef>,
}

#[derive(Debug, Deserialize)]
struct OvirtSnapshot {
    id: String,
}

fn normalize_vm(vm: OvirtVm, nics: Vec<OvirtNic>, disks: Vec<SourceDisk>) -> SourceVm {
    let bios_type = vm.bios.map(|b| match b.bios_type.as_str() {
        "q35_ovmf" => "efi".to_string(),
        "q35_secure_boot" => "secure_boot".to_string(),
        "i440fx_sea_bios" | "q35_sea_bios" | "cluster_default" => "bios".to_string(),
        other => other.to_string(),
    });

    SourceVm {
        id: vm.id,
        name: vm.name,
        cluster: vm.cluster.map(|c| c.name.unwrap_or(c.id)),
        status: vm.status,
        cpu_sockets: vm.cpu.topology.sockets,
        cpu_cores: vm.cpu.topology.cores,
        cpu_threads: vm.cpu.topology.threads,
        cpu_architecture: vm.cpu.architecture,
        memory_mib: vm.memory / (1024 * 1024),
        bios_type,
        machine_type: vm.custom_emulated_machine,
        serial: vm.serial_number.and_then(|s| s.value),
        origin: vm.origin,
        features: VmFeatures {
            high_availability: vm.high_availability.enabled,
            cpu_pinning: vm.cpu.cpu_tune.is_some(),
            custom_properties: vm.custom_properties.is_some(),
            has_illegal_images: vm.has_illegal_images,
            io_threads: vm.io.map(|io| io.threads).unwrap_or_default(),
            memory_ballooning: vm.memory_policy.as_ref().is_some_and(|p| p.ballooning),
            memory_overcommit_percent: vm
                .memory_policy
                .and_then(|p| p.over_commit)
                .map(|o| o.percent)
                .unwrap_or_default(),
            numa_tuned: vm.numa_tune_mode.is_some(),
            placement_affinity: vm
                .placement_policy
                .and_then(|p| p.affinity)
                .filter(|a| a != "migratable"),
            rng_source: vm.rng_device.and_then(|r| r.source),
            sound_card: vm.soundcard_enabled,
            start_paused: vm.start_paused,
            storage_error_resume: vm
                .storage_error_resume_behaviour
                .filter(|b| b != "auto_resume"),
            timezone: vm.time_zone.and_then(|t| t.name),
            usb: vm.usb.enabled,
            ..Default::default()
        },
        nics: nics.into_iter().map(normalize_nic).collect(),
        disks,
    }
}

fn normalize_nic(nic: OvirtNic) -> SourceNic {
    let profile = nic.vnic_profile.unwrap_or_default();
    SourceNic {
        id: nic.id,
        name: nic.name,
        network_id: Some(profile.id).filter(|id| !id.is_empty()),
        network_name: profile.name,
        interface_model: nic.interface,
        mac_address: nic.mac.and_then(|m| m.address),
        plugged: nic.plugged,
        linked: nic.linked,
        on_boot: nic.on_boot.unwrap_or(true),
        port_mirroring: profile.port_mirroring,
        pass_through: profile
            .pass_through
            .is_some_and(|p| p.mode == "enabled"),
        custom_properties: profile.custom_properties.is_some(),
        network_filter: profile.network_filter.map(|f| f.name.unwrap_or(f.id)),
        qos: profile.qos.is_some(),
    }
}

fn normalize_disk(attachment: OvirtDiskAttachment, disk: OvirtDisk) -> SourceDisk {
    let domain = disk
        .storage_domains
        .and_then(|d| d.storage_domain.into_iter().next());
    SourceDisk {
        name: disk.alias.or(disk.name).unwrap_or_else(|| disk.id.clone()),
        id: disk.id,
        size_bytes: disk.provisioned_size,
        storage_domain_id: domain.as_ref().map(|d| d.id.clone()),
        storage_domain_name: domain.and_then(|d| d.name),
        interface: attachment.interface,
        bootable: attachment.bootable,
        status: disk.status,
        storage_type: disk.storage_type,
        format: disk.format,
        read_only: attachment.read_only,
        pass_discard: attachment.pass_discard,
        uses_scsi_reservation: attachment.uses_scsi_reservation,
        logical_name: attachment.logical_name,
        sgio: disk.sgio.filter(|s| s != "disabled"),
        shareable: disk.shareable,
        backup: disk.backup.is_some_and(|b| b == "incremental"),
        propagate_errors: disk.propagate_errors,
        wipe_after_delete: disk.wipe_after_delete,
        independent_mode: false,
        backing_file: None,
    }
}

#[async_trait]
impl Provider for OvirtProvider {
    fn source_type(&self) -> SourceType {
        SourceType::Ovirt
    }

    async fn connect(&mut self, secret: &Secret) -> Result<(), ProviderError> {
        self.state.credentials = Some(Credentials::from_secret(secret)?);
        tracing::debug!(secret = %secret.metadata.name, "Connected to oVirt engine");
        Ok(())
    }

    async fn load_vm(&mut self, source: &PlatformSource) -> Result<(), ProviderError> {
        let vm = self.find_vm(source).await?;

        let nics: OvirtNicList = self.get_json(&format!("vms/{}/nics", vm.id)).await?;
        let attachments: OvirtDiskAttachmentList = self
            .get_json(&format!("vms/{}/diskattachments", vm.id))
            .await?;

        let mut disks = Vec::with_capacity(attachments.disk_attachment.len());
        for attachment in attachments.disk_attachment {
            let disk: OvirtDisk = self
                .get_json(&format!("disks/{}", attachment.disk.id))
                .await?;
            disks.push(normalize_disk(attachment, disk));
        }

        let vm = normalize_vm(vm, nics.nic, disks);
        tracing::debug!(
            vm = %vm.name,
            nics = vm.nics.len(),
            disks = vm.disks.len(),
            "Loaded oVirt VM"
        );
        self.state.vm = Some(vm);
        Ok(())
    }

    fn source_vm(&self) -> Result<&SourceVm, ProviderError> {
        self.state.vm()
    }

    fn prepare_resource_mapping(
        &mut self,
        external: Option<&MappingConfiguration>,
        inline: Option<&MappingConfiguration>,
    ) {
        self.state.prepare_mapping(external, inline);
    }

    fn resource_mapping(&self) -> &MappingConfiguration {
        &self.state.mapping
    }

    async fn stop_vm(&self) -> Result<(), ProviderError> {
        self.post_action(&format!("vms/{}/stop", self.vm_id()?)).await
    }

    async fn start_vm(&self) -> Result<(), ProviderError> {
        self.post_action(&format!("vms/{}/start", self.vm_id()?)).await
    }

    async fn vm_status(&self) -> Result<VmPowerState, ProviderError> {
        let vm: OvirtVm = self.get_json(&format!("vms/{}", self.vm_id()?)).await?;
        Ok(if vm.status == "down" {
            VmPowerState::Down
        } else {
            VmPowerState::Up
        })
    }

    fn create_mapper(&self, context: MapperContext) -> Result<Box<dyn Mapper>, ProviderError> {
        let creds = self.state.credentials()?;
        Ok(Box::new(VmMapper::new(
            self.state.vm()?.clone(),
            self.state.mapping.clone(),
            context,
            VolumeSourceTemplate::ImageIo {
                url: creds.api_url.clone(),
            },
        )))
    }

    fn importer_credentials(&self) -> Result<BTreeMap<String, String>, ProviderError> {
        Ok(self.state.credentials()?.importer_data())
    }

    fn ca_certificate(&self) -> Option<String> {
        self.state.credentials.as_ref().and_then(|c| c.ca_cert.clone())
    }

    async fn validate_disk_status(&self, disk_id: &str) -> Result<bool, ProviderError> {
        let disk: OvirtDisk = self.get_json(&format!("disks/{}", disk_id)).await?;
        Ok(disk.status == "ok")
    }

    async fn create_vm_snapshot(&self) -> Result<String, ProviderError> {
        let creds = self.state.credentials()?;
        let path = format!("vms/{}/snapshots", self.vm_id()?);
        let response = self
            .client
            .post(format!("{}/{}", creds.api_url, path))
            .basic_auth(&creds.username, Some(&creds.password))
            .header("Accept", "application/json")
            .json(&serde_json::json!({
                "description": "vmimport",
                "persist_memorystate": false,
            }))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, self.timeout_ms()))?;

        let snapshot: OvirtSnapshot = check_status(response, &path)
            .await?
            .json()
            .await
            .map_err(|e| {
                ProviderError::InvalidResponse(format!("Failed to parse snapshot: {}", e))
            })?;
        Ok(snapshot.id)
    }
}
