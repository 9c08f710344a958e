//! VMware provider implementation.

use super::{
    check_status, clean_up_transients, Credentials, Provider, ProviderError, ProviderState,
    SourceDisk, SourceNic, SourceVm, VmFeatures, VmPowerState,
};
use crate::mapper::{Mapper, MapperContext, VmMapper, VolumeSourceTemplate};
use crate::resources::{
    MappingConfiguration, PlatformSource, Secret, SourceType, VirtualMachineImport,
};
use crate::store::ObjectStore;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Header carrying the vSphere automation API session token.
pub const SESSION_HEADER: &str = "vmware-api-session-id";

/// vSphere provider.
///
/// Talks to the vSphere automation REST API:
/// - Session via POST /session (basic auth), then the session header on every call
/// - VM lookup via GET /vcenter/vm/{id} or GET /vcenter/vm?names=...
/// - Power via GET/POST /vcenter/vm/{id}/power
/// - Snapshots via POST/DELETE /vcenter/vm/{id}/snapshots
///
/// Disks are read through VDDK, which supports changed-block tracking, so
/// warm imports are supported.
pub struct VmwareProvider {
    /// Shared HTTP client for connection pooling
    client: Arc<Client>,
    /// Per-request timeout
    timeout: Duration,
    session: Option<String>,
    state: ProviderState,
}

impl VmwareProvider {
    pub fn new(client: Arc<Client>, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            session: None,
            state: ProviderState::default(),
        }
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ProviderError> {
        let creds = self.state.credentials()?;
        let session = self
            .session
            .as_deref()
            .ok_or(ProviderError::NotConnected("no vSphere session"))?;

        Ok(self
            .client
            .request(method, format!("{}/{}", creds.api_url, path))
            .header(SESSION_HEADER, session)
            .header("Accept", "application/json")
            .timeout(self.timeout))
    }

    async fn send(
        &self,
        builder: RequestBuilder,
        path: &str,
    ) -> Result<reqwest::Response, ProviderError> {
        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, self.timeout_ms()))?;
        check_status(response, path).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let response = self.send(self.request(Method::GET, path)?, path).await?;
        let body = response.text().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to read response body: {}", e))
        })?;
        serde_json::from_str(&body).map_err(|e| {
            ProviderError::InvalidResponse(format!(
                "Failed to parse vSphere response for {}: {}",
                path, e
            ))
        })
    }

    async fn find_vm_id(&self, source: &PlatformSource) -> Result<String, ProviderError> {
        if let Some(id) = source.vm.id.as_deref() {
            return Ok(id.to_string());
        }

        let name = source.vm.name.as_deref().ok_or_else(|| {
            ProviderError::Configuration("source VM needs an id or a name".to_string())
        })?;
        let path = "vcenter/vm";
        let builder = self.request(Method::GET, path)?.query(&[("names", name)]);
        let found: Vec<VmwareVmSummary> = self
            .send(builder, path)
            .await?
            .json()
            .await
            .map_err(|e| {
                ProviderError::InvalidResponse(format!("Failed to parse VM list: {}", e))
            })?;

        found
            .into_iter()
            .next()
            .map(|summary| summary.vm)
            .ok_or_else(|| ProviderError::NotFound(format!("VM {}", name)))
    }

    async fn power(&self, action: &str) -> Result<(), ProviderError> {
        let path = format!("vcenter/vm/{}/power?action={}", self.vm_id()?, action);
        self.send(self.request(Method::POST, &path)?, &path)
            .await
            .map(|_| ())
    }

    async fn delete_snapshot(&self, snapshot: &str) -> Result<(), ProviderError> {
        let path = format!("vcenter/vm/{}/snapshots/{}", self.vm_id()?, snapshot);
        match self.send(self.request(Method::DELETE, &path)?, &path).await {
            Ok(_) | Err(ProviderError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn vm_id(&self) -> Result<&str, ProviderError> {
        Ok(self.state.vm()?.id.as_str())
    }
}

// ============================================================================
// vSphere payloads
// ============================================================================

#[derive(Debug, Deserialize)]
struct VmwareVmSummary {
    vm: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VmwareVm {
    name: String,
    power_state: String,
    cpu: VmwareCpu,
    memory: VmwareMemory,
    boot: Option<VmwareBoot>,
    identity: Option<VmwareIdentity>,
    nics: BTreeMap<String, VmwareNic>,
    disks: BTreeMap<String, VmwareDisk>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VmwareCpu {
    count: u32,
    cores_per_socket: u32,
    hot_add_enabled: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VmwareMemory {
    #[serde(rename = "size_MiB")]
    size_mib: u64,
    hot_add_enabled: bool,
}

#[derive(Debug, Deserialize)]
struct VmwareBoot {
    #[serde(rename = "type")]
    boot_type: String,
}

#[derive(Debug, Deserialize)]
struct VmwareIdentity {
    instance_uuid: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VmwareNic {
    label: String,
    #[serde(rename = "type")]
    nic_type: String,
    mac_address: Option<String>,
    state: String,
    start_connected: bool,
    backing: VmwareNicBacking,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VmwareNicBacking {
    network: Option<String>,
    network_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VmwareDisk {
    label: String,
    #[serde(rename = "type")]
    disk_type: String,
    capacity: u64,
    backing: VmwareDiskBacking,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VmwareDiskBacking {
    vmdk_file: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VmwarePower {
    state: String,
}

#[derive(Debug, Deserialize)]
struct VmwareSnapshot {
    snapshot: String,
}

/// Datastore name from a `[datastore] path/file.vmdk` backing path.
fn datastore_of(vmdk_file: &str) -> Option<String> {
    let rest = vmdk_file.strip_prefix('[')?;
    let end = rest.find(']')?;
    Some(rest[..end].to_string())
}

fn normalize_vm(id: &str, vm: VmwareVm) -> SourceVm {
    let cores = vm.cpu.cores_per_socket.max(1);
    let bios_type = vm.boot.map(|b| match b.boot_type.as_str() {
        "EFI" => "efi".to_string(),
        "BIOS" => "bios".to_string(),
        other => other.to_lowercase(),
    });

    SourceVm {
        id: id.to_string(),
        name: vm.name,
        cluster: None,
        status: vm.power_state.to_lowercase().replace('_', ""),
        cpu_sockets: vm.cpu.count / cores,
        cpu_cores: cores,
        cpu_threads: 1,
        cpu_architecture: None,
        memory_mib: vm.memory.size_mib,
        bios_type,
        machine_type: None,
        serial: vm.identity.and_then(|i| i.instance_uuid),
        origin: None,
        features: VmFeatures {
            cpu_hotplug: vm.cpu.hot_add_enabled,
            memory_hotplug: vm.memory.hot_add_enabled,
            ..Default::default()
        },
        nics: vm
            .nics
            .into_iter()
            .map(|(key, nic)| SourceNic {
                id: key,
                name: nic.label,
                network_id: nic.backing.network,
                network_name: nic.backing.network_name,
                interface_model: nic.nic_type.to_lowercase(),
                mac_address: nic.mac_address,
                plugged: true,
                linked: nic.state == "CONNECTED",
                on_boot: nic.start_connected,
                ..Default::default()
            })
            .collect(),
        disks: vm
            .disks
            .into_iter()
            .map(|(key, disk)| SourceDisk {
                id: key,
                name: disk.label,
                size_bytes: disk.capacity,
                storage_domain_name: disk.backing.vmdk_file.as_deref().and_then(datastore_of),
                interface: disk.disk_type.to_lowercase(),
                status: "ok".to_string(),
                storage_type: "image".to_string(),
                backing_file: disk.backing.vmdk_file,
                ..Default::default()
            })
            .collect(),
    }
}

#[async_trait]
impl Provider for VmwareProvider {
    fn source_type(&self) -> SourceType {
        SourceType::Vmware
    }

    async fn connect(&mut self, secret: &Secret) -> Result<(), ProviderError> {
        let creds = Credentials::from_secret(secret)?;
        if creds.thumbprint.is_none() {
            return Err(ProviderError::Configuration(format!(
                "secret {} is missing key '{}'",
                secret.metadata.name,
                Credentials::THUMBPRINT
            )));
        }

        let path = "session";
        let response = self
            .client
            .post(format!("{}/{}", creds.api_url, path))
            .basic_auth(&creds.username, Some(&creds.password))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, self.timeout_ms()))?;
        let token: String = check_status(response, path)
            .await?
            .json()
            .await
            .map_err(|e| {
                ProviderError::InvalidResponse(format!("Failed to parse session: {}", e))
            })?;

        self.session = Some(token);
        self.state.credentials = Some(creds);
        tracing::debug!(secret = %secret.metadata.name, "Opened vSphere session");
        Ok(())
    }

    async fn load_vm(&mut self, source: &PlatformSource) -> Result<(), ProviderError> {
        let id = self.find_vm_id(source).await?;
        let vm: VmwareVm = self.get_json(&format!("vcenter/vm/{}", id)).await?;

        let vm = normalize_vm(&id, vm);
        tracing::debug!(
            vm = %vm.name,
            nics = vm.nics.len(),
            disks = vm.disks.len(),
            "Loaded vSphere VM"
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
        self.power("stop").await
    }

    async fn start_vm(&self) -> Result<(), ProviderError> {
        self.power("start").await
    }

    async fn vm_status(&self) -> Result<VmPowerState, ProviderError> {
        let power: VmwarePower = self
            .get_json(&format!("vcenter/vm/{}/power", self.vm_id()?))
            .await?;
        Ok(if power.state == "POWERED_OFF" {
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
            VolumeSourceTemplate::Vddk {
                url: creds.api_url.clone(),
                thumbprint: creds.thumbprint.clone().unwrap_or_default(),
            },
        )))
    }

    fn importer_credentials(&self) -> Result<BTreeMap<String, String>, ProviderError> {
        let creds = self.state.credentials()?;
        let mut data = creds.importer_data();
        if let Some(thumbprint) = &creds.thumbprint {
            data.insert("thumbprint".to_string(), thumbprint.clone());
        }
        Ok(data)
    }

    fn ca_certificate(&self) -> Option<String> {
        self.state.credentials.as_ref().and_then(|c| c.ca_cert.clone())
    }

    async fn clean_up(
        &self,
        store: &ObjectStore,
        request: &VirtualMachineImport,
    ) -> Result<(), ProviderError> {
        let mut errors = Vec::new();
        if let Some(snapshot) = request.status.warm_import.root_snapshot.as_deref() {
            if let Err(e) = self.delete_snapshot(snapshot).await {
                errors.push(e.to_string());
            }
        }
        clean_up_transients(store, request, errors)
    }

    fn supports_warm_migration(&self) -> bool {
        true
    }

    async fn create_vm_snapshot(&self) -> Result<String, ProviderError> {
        let path = format!("vcenter/vm/{}/snapshots", self.vm_id()?);
        let builder = self.request(Method::POST, &path)?.json(&serde_json::json!({
            "name": format!("vmimport-{}", uuid::Uuid::new_v4()),
            "memory": false,
            "quiesce": false,
        }));
        let snapshot: VmwareSnapshot = self
            .send(builder, &path)
            .await?
            .json()
            .await
            .map_err(|e| {
                ProviderError::InvalidResponse(format!("Failed to parse snapshot: {}", e))
            })?;

        tracing::debug!(snapshot = %snapshot.snapshot, "Created vSphere snapshot");
        Ok(snapshot.snapshot)
    }

    async fn validate_disk_status(&self, disk_id: &str) -> Result<bool, ProviderError> {
        let vm: VmwareVm = self
            .get_json(&format!("vcenter/vm/{}", self.vm_id()?))
            .await?;
        Ok(vm.disks.contains_key(disk_id))
    }
}
