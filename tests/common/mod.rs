//! Shared test utilities for vmimport integration tests.
//!
//! Provides a scriptable in-memory provider, a seeded object store and
//! builders for import requests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use vmimport::mapper::{Mapper, MapperContext, VmMapper, VolumeSourceTemplate};
use vmimport::mapping::merge_configuration;
use vmimport::provider::{
    clean_up_transients, Provider, ProviderError, ProviderFactory, SourceDisk, SourceNic,
    SourceVm, VmPowerState,
};
use vmimport::reconciler::{ImportReconciler, ManualClock, ReconcileSettings};
use vmimport::resources::{
    DataVolume, DataVolumePhase, InstancePhase, MappingConfiguration, MappingItem, MappingSource,
    ObjectIdentifier, ObjectMeta, PlatformSource, Secret, SourceType, StorageClass,
    VirtualMachineImport, VirtualMachineImportSource, VirtualMachineImportSpec,
    VirtualMachineInstance, VirtualMachineInstanceStatus, VmIdentity,
};
use vmimport::store::ObjectStore;
use vmimport::validation::ValidationEngine;

// =============================================================================
// Well-Known Test Constants
// =============================================================================

pub const NAMESPACE: &str = "default";
pub const CREDENTIALS_SECRET: &str = "ovirt-creds";
pub const STORAGE_CLASS: &str = "standard";
pub const STORAGE_DOMAIN: &str = "data";
pub const SOURCE_NETWORK: &str = "ovirtmgmt";
pub const DISK_ID: &str = "disk-1";

/// Fixed start time for clock-driven tests.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
}

// =============================================================================
// Fake Provider
// =============================================================================

/// Scriptable behaviour and call counters shared by every provider a
/// [`FakeFactory`] hands out.
pub struct FakeState {
    pub vm: Mutex<SourceVm>,
    pub running: AtomicBool,
    pub warm: AtomicBool,
    pub disks_ready: AtomicBool,
    pub fail_snapshots: AtomicBool,
    pub fail_importer_credentials: AtomicBool,
    pub connects: AtomicU32,
    pub stops: AtomicU32,
    pub snapshots: AtomicU32,
    pub cleanups: AtomicU32,
}

impl FakeState {
    pub fn new(vm: SourceVm) -> Arc<Self> {
        Arc::new(Self {
            vm: Mutex::new(vm),
            running: AtomicBool::new(true),
            warm: AtomicBool::new(false),
            disks_ready: AtomicBool::new(true),
            fail_snapshots: AtomicBool::new(false),
            fail_importer_credentials: AtomicBool::new(false),
            connects: AtomicU32::new(0),
            stops: AtomicU32::new(0),
            snapshots: AtomicU32::new(0),
            cleanups: AtomicU32::new(0),
        })
    }

    pub fn count(counter: &AtomicU32) -> u32 {
        counter.load(Ordering::SeqCst)
    }
}

pub struct FakeProvider {
    state: Arc<FakeState>,
    vm: Option<SourceVm>,
    mapping: MappingConfiguration,
}

#[async_trait]
impl Provider for FakeProvider {
    fn source_type(&self) -> SourceType {
        SourceType::Ovirt
    }

    async fn connect(&mut self, _secret: &Secret) -> Result<(), ProviderError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load_vm(&mut self, _source: &PlatformSource) -> Result<(), ProviderError> {
        self.vm = Some(self.state.vm.lock().unwrap().clone());
        Ok(())
    }

    fn source_vm(&self) -> Result<&SourceVm, ProviderError> {
        self.vm
            .as_ref()
            .ok_or(ProviderError::NotConnected("load_vm must be called first"))
    }

    fn prepare_resource_mapping(
        &mut self,
        external: Option<&MappingConfiguration>,
        inline: Option<&MappingConfiguration>,
    ) {
        self.mapping = merge_configuration(inline, external);
    }

    fn resource_mapping(&self) -> &MappingConfiguration {
        &self.mapping
    }

    async fn stop_vm(&self) -> Result<(), ProviderError> {
        self.state.stops.fetch_add(1, Ordering::SeqCst);
        self.state.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn start_vm(&self) -> Result<(), ProviderError> {
        self.state.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn vm_status(&self) -> Result<VmPowerState, ProviderError> {
        Ok(if self.state.running.load(Ordering::SeqCst) {
            VmPowerState::Up
        } else {
            VmPowerState::Down
        })
    }

    fn create_mapper(&self, context: MapperContext) -> Result<Box<dyn Mapper>, ProviderError> {
        Ok(Box::new(VmMapper::new(
            self.source_vm()?.clone(),
            self.mapping.clone(),
            context,
            VolumeSourceTemplate::ImageIo {
                url: "https://engine.example.com/ovirt-engine/api".to_string(),
            },
        )))
    }

    fn importer_credentials(&self) -> Result<BTreeMap<String, String>, ProviderError> {
        if self.state.fail_importer_credentials.load(Ordering::SeqCst) {
            return Err(ProviderError::Configuration("no credentials".to_string()));
        }
        Ok(BTreeMap::from([
            ("accessKeyId".to_string(), "admin@internal".to_string()),
            ("secretKey".to_string(), "secret".to_string()),
        ]))
    }

    fn ca_certificate(&self) -> Option<String> {
        Some("-----BEGIN CERTIFICATE-----".to_string())
    }

    async fn clean_up(
        &self,
        store: &ObjectStore,
        request: &VirtualMachineImport,
    ) -> Result<(), ProviderError> {
        self.state.cleanups.fetch_add(1, Ordering::SeqCst);
        clean_up_transients(store, request, Vec::new())
    }

    fn supports_warm_migration(&self) -> bool {
        self.state.warm.load(Ordering::SeqCst)
    }

    async fn create_vm_snapshot(&self) -> Result<String, ProviderError> {
        if self.state.fail_snapshots.load(Ordering::SeqCst) {
            return Err(ProviderError::Upstream {
                status: 500,
                message: "snapshot failed".to_string(),
            });
        }
        let n = self.state.snapshots.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("snap-{}", n))
    }

    async fn validate_disk_status(&self, _disk_id: &str) -> Result<bool, ProviderError> {
        Ok(self.state.disks_ready.load(Ordering::SeqCst))
    }
}

pub struct FakeFactory {
    pub state: Arc<FakeState>,
}

impl ProviderFactory for FakeFactory {
    fn create(&self, _source_type: SourceType) -> Result<Box<dyn Provider>, ProviderError> {
        Ok(Box::new(FakeProvider {
            state: Arc::clone(&self.state),
            vm: None,
            mapping: MappingConfiguration::default(),
        }))
    }
}

// =============================================================================
// Builders
// =============================================================================

/// A running source VM with one NIC and one disk that passes every blocking check.
pub fn sample_vm() -> SourceVm {
    SourceVm {
        id: "vm-1".to_string(),
        name: "Web 01".to_string(),
        status: "up".to_string(),
        cpu_sockets: 1,
        cpu_cores: 2,
        cpu_threads: 1,
        cpu_architecture: Some("x86_64".to_string()),
        memory_mib: 2048,
        bios_type: Some("bios".to_string()),
        nics: vec![SourceNic {
            id: "nic-1".to_string(),
            name: "nic1".to_string(),
            network_name: Some(SOURCE_NETWORK.to_string()),
            interface_model: "virtio".to_string(),
            mac_address: Some("56:6f:05:0f:00:01".to_string()),
            plugged: true,
            linked: true,
            on_boot: true,
            ..Default::default()
        }],
        disks: vec![SourceDisk {
            id: DISK_ID.to_string(),
            name: "root".to_string(),
            size_bytes: 10 * 1024 * 1024 * 1024,
            storage_domain_name: Some(STORAGE_DOMAIN.to_string()),
            interface: "virtio".to_string(),
            bootable: true,
            status: "ok".to_string(),
            storage_type: "image".to_string(),
            format: Some("raw".to_string()),
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// [`sample_vm`] with a second, non-bootable data disk on the same storage domain.
pub fn two_disk_vm() -> SourceVm {
    let mut vm = sample_vm();
    let mut data = vm.disks[0].clone();
    data.id = "disk-2".to_string();
    data.name = "data".to_string();
    data.bootable = false;
    vm.disks.push(data);
    vm
}

/// Mapping that covers [`sample_vm`].
pub fn sample_mappings() -> MappingConfiguration {
    MappingConfiguration {
        network_mappings: Some(vec![
            MappingItem::new(MappingSource::name(SOURCE_NETWORK), "pod").with_type("pod")
        ]),
        storage_mappings: Some(vec![MappingItem::new(
            MappingSource::name(STORAGE_DOMAIN),
            STORAGE_CLASS,
        )]),
        disk_mappings: None,
    }
}

pub fn import_request(name: &str, mappings: Option<MappingConfiguration>) -> VirtualMachineImport {
    VirtualMachineImport::new(
        ObjectMeta::new(NAMESPACE, name),
        VirtualMachineImportSpec {
            source: VirtualMachineImportSource {
                ovirt: Some(PlatformSource {
                    vm: VmIdentity {
                        id: Some("vm-1".to_string()),
                        ..Default::default()
                    },
                    mappings,
                }),
                vmware: None,
            },
            provider_credentials_secret: ObjectIdentifier::new(CREDENTIALS_SECRET),
            ..Default::default()
        },
    )
}

/// Store holding the credentials secret and the target storage class.
pub fn seeded_store() -> Arc<ObjectStore> {
    let store = Arc::new(ObjectStore::new());
    store
        .create(&Secret {
            metadata: ObjectMeta::new(NAMESPACE, CREDENTIALS_SECRET),
            string_data: BTreeMap::from([
                ("apiUrl".to_string(), "https://engine.example.com".to_string()),
                ("username".to_string(), "admin@internal".to_string()),
                ("password".to_string(), "secret".to_string()),
            ]),
        })
        .unwrap();
    store
        .create(&StorageClass {
            metadata: ObjectMeta::new("", STORAGE_CLASS),
            provisioner: "csi.example.com".to_string(),
        })
        .unwrap();
    store
}

/// Everything a reconciler test needs.
pub struct Harness {
    pub store: Arc<ObjectStore>,
    pub state: Arc<FakeState>,
    pub clock: Arc<ManualClock>,
    pub reconciler: Arc<ImportReconciler>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(ReconcileSettings::default())
    }

    pub fn with_settings(settings: ReconcileSettings) -> Self {
        Self::with_source_vm(sample_vm(), settings)
    }

    pub fn with_source_vm(vm: SourceVm, settings: ReconcileSettings) -> Self {
        let store = seeded_store();
        let state = FakeState::new(vm);
        let clock = Arc::new(ManualClock::new(start_time()));
        let reconciler = Arc::new(ImportReconciler::new(
            Arc::clone(&store),
            Arc::new(FakeFactory {
                state: Arc::clone(&state),
            }),
            Arc::new(ValidationEngine::default()),
            clock.clone(),
            settings,
        ));
        Self {
            store,
            state,
            clock,
            reconciler,
        }
    }

    pub fn submit(&self, request: &VirtualMachineImport) {
        self.store.create(request).unwrap();
    }

    pub fn request(&self, name: &str) -> VirtualMachineImport {
        self.store
            .get_required::<VirtualMachineImport>(NAMESPACE, name)
            .unwrap()
    }

    pub fn data_volume(&self, name: &str) -> DataVolume {
        self.store.get_required::<DataVolume>(NAMESPACE, name).unwrap()
    }

    /// Report an importer phase on a data volume.
    pub fn set_volume_phase(&self, name: &str, phase: DataVolumePhase) {
        let mut dv = self.data_volume(name);
        dv.status.phase = phase;
        self.store.update(&dv).unwrap();
    }

    /// Report the target VM's instance as running.
    pub fn start_instance(&self, name: &str) {
        self.store
            .create(&VirtualMachineInstance {
                metadata: ObjectMeta::new(NAMESPACE, name),
                status: VirtualMachineInstanceStatus {
                    phase: InstancePhase::Running,
                },
            })
            .unwrap();
    }
}
