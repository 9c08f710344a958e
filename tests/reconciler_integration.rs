//! Integration tests for the import reconciler (cold imports).

mod common;

use common::*;
use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::time::Duration;
use vmimport::conditions::find_condition;
use vmimport::reconciler::{Action, ReconcileError, ReconcileSettings};
use vmimport::resources::{
    ConditionReason, ConditionStatus, ConditionType, ConfigMap, DataVolume, DataVolumePhase,
    ObjectMeta, ResourceMapping, Secret, VirtualMachine, VirtualMachineImport,
};

const TARGET: &str = "web-01";
const VOLUME: &str = "web-01-disk-1";

fn condition(
    request: &VirtualMachineImport,
    condition_type: ConditionType,
) -> (ConditionStatus, ConditionReason) {
    let c = find_condition(&request.status.conditions, condition_type)
        .unwrap_or_else(|| panic!("missing {:?} condition", condition_type));
    (c.status, c.reason)
}

#[tokio::test]
async fn test_cold_import_creates_target_objects() {
    let h = Harness::new();
    let request = import_request("import-1", Some(sample_mappings()));
    h.submit(&request);

    let action = h.reconciler.reconcile(NAMESPACE, "import-1").await.unwrap();
    assert_eq!(action, Action::Requeue(Duration::from_secs(30)));

    // Source VM stopped before anything is created
    assert_eq!(FakeState::count(&h.state.stops), 1);
    assert!(!h.state.running.load(Ordering::SeqCst));

    let request = h.request("import-1");
    assert_eq!(
        condition(&request, ConditionType::Valid),
        (ConditionStatus::True, ConditionReason::ValidationCompleted)
    );
    assert_eq!(
        condition(&request, ConditionType::MappingRulesVerified).0,
        ConditionStatus::True
    );
    assert_eq!(
        condition(&request, ConditionType::Processing),
        (ConditionStatus::True, ConditionReason::CopyingDisks)
    );
    assert_eq!(request.status.target_vm_name.as_deref(), Some(TARGET));
    assert_eq!(request.status.data_volumes.len(), 1);
    assert_eq!(request.status.data_volumes[0].name, VOLUME);

    // Every created object is owned by the request
    let vm = h.store.get_required::<VirtualMachine>(NAMESPACE, TARGET).unwrap();
    let owner = vm.metadata.controller_owner().unwrap();
    assert_eq!(owner.kind, "VirtualMachineImport");
    assert_eq!(owner.uid, request.metadata.uid);
    assert!(!vm.spec.running);

    let dv = h.data_volume(VOLUME);
    assert_eq!(dv.spec.storage.storage_class_name.as_deref(), Some(STORAGE_CLASS));
    assert!(dv.spec.source.imageio.is_some());
    assert!(h
        .store
        .contains::<Secret>(NAMESPACE, &request.credentials_secret_name()));
    assert!(h
        .store
        .contains::<ConfigMap>(NAMESPACE, &request.ca_config_map_name()));
}

#[tokio::test]
async fn test_cold_import_completes_when_volumes_succeed() {
    let h = Harness::new();
    h.submit(&import_request("import-1", Some(sample_mappings())));
    h.reconciler.reconcile(NAMESPACE, "import-1").await.unwrap();

    h.set_volume_phase(VOLUME, DataVolumePhase::Succeeded);
    let action = h.reconciler.reconcile(NAMESPACE, "import-1").await.unwrap();
    assert_eq!(action, Action::Done);

    let request = h.request("import-1");
    assert_eq!(
        condition(&request, ConditionType::Succeeded),
        (ConditionStatus::True, ConditionReason::VirtualMachineReady)
    );
    assert_eq!(
        condition(&request, ConditionType::Processing),
        (ConditionStatus::False, ConditionReason::Completed)
    );
    assert_eq!(request.status.progress, 100);

    // Transient importer objects are removed once the import succeeded
    assert!(FakeState::count(&h.state.cleanups) >= 1);
    assert!(!h
        .store
        .contains::<Secret>(NAMESPACE, &request.credentials_secret_name()));
    assert!(!h
        .store
        .contains::<ConfigMap>(NAMESPACE, &request.ca_config_map_name()));

    // The target VM is wired to its data volume
    let vm = h.store.get_required::<VirtualMachine>(NAMESPACE, TARGET).unwrap();
    assert!(!vm.spec.template.volumes.is_empty());
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let h = Harness::new();
    h.submit(&import_request("import-1", Some(sample_mappings())));

    let first = h.reconciler.reconcile(NAMESPACE, "import-1").await.unwrap();
    let vm_before = h.store.get_required::<VirtualMachine>(NAMESPACE, TARGET).unwrap();
    let second = h.reconciler.reconcile(NAMESPACE, "import-1").await.unwrap();
    let vm_after = h.store.get_required::<VirtualMachine>(NAMESPACE, TARGET).unwrap();

    assert_eq!(first, second);
    assert_eq!(vm_before.metadata.resource_version, vm_after.metadata.resource_version);
    assert_eq!(h.store.list::<DataVolume>(Some(NAMESPACE)).unwrap().len(), 1);
}

#[tokio::test]
async fn test_finished_request_is_not_touched() {
    let h = Harness::new();
    h.submit(&import_request("import-1", Some(sample_mappings())));
    h.reconciler.reconcile(NAMESPACE, "import-1").await.unwrap();
    h.set_volume_phase(VOLUME, DataVolumePhase::Succeeded);
    h.reconciler.reconcile(NAMESPACE, "import-1").await.unwrap();

    let connects = FakeState::count(&h.state.connects);
    let version = h.request("import-1").metadata.resource_version;

    let action = h.reconciler.reconcile(NAMESPACE, "import-1").await.unwrap();
    assert_eq!(action, Action::Done);
    assert_eq!(FakeState::count(&h.state.connects), connects);
    assert_eq!(h.request("import-1").metadata.resource_version, version);
}

#[tokio::test]
async fn test_missing_request_is_done() {
    let h = Harness::new();
    let action = h.reconciler.reconcile(NAMESPACE, "nope").await.unwrap();
    assert_eq!(action, Action::Done);
}

#[tokio::test]
async fn test_validation_failure_blocks_import() {
    let h = Harness::new();
    // No storage mapping for the disk
    let mut mappings = sample_mappings();
    mappings.storage_mappings = None;
    h.submit(&import_request("import-1", Some(mappings)));

    let err = h
        .reconciler
        .reconcile(NAMESPACE, "import-1")
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::ValidationFailed(_)));
    assert!(!err.is_retryable());

    let request = h.request("import-1");
    assert_eq!(
        condition(&request, ConditionType::Valid),
        (ConditionStatus::False, ConditionReason::IncompleteMappingRules)
    );
    assert_eq!(
        condition(&request, ConditionType::Processing),
        (ConditionStatus::False, ConditionReason::ValidationFailed)
    );
    assert!(find_condition(&request.status.conditions, ConditionType::Succeeded).is_none());

    // Nothing was stopped or created
    assert_eq!(FakeState::count(&h.state.stops), 0);
    assert!(!h.store.contains::<VirtualMachine>(NAMESPACE, TARGET));
}

#[tokio::test]
async fn test_missing_storage_class_fails_validation() {
    let h = Harness::new();
    h.store
        .delete::<vmimport::resources::StorageClass>("", STORAGE_CLASS)
        .unwrap();
    h.submit(&import_request("import-1", Some(sample_mappings())));

    let err = h
        .reconciler
        .reconcile(NAMESPACE, "import-1")
        .await
        .unwrap_err();
    assert!(err.to_string().contains(STORAGE_CLASS));
}

#[tokio::test]
async fn test_external_mapping_resource_is_merged() {
    let h = Harness::new();
    let mut inline = sample_mappings();
    let storage = inline.storage_mappings.take();
    h.store
        .create(&ResourceMapping {
            metadata: vmimport::resources::ObjectMeta::new(NAMESPACE, "shared"),
            spec: vmimport::resources::MappingConfiguration {
                storage_mappings: storage,
                ..Default::default()
            },
        })
        .unwrap();

    let mut request = import_request("import-1", Some(inline));
    request.spec.resource_mapping = Some(vmimport::resources::ObjectIdentifier::new("shared"));
    h.submit(&request);

    let action = h.reconciler.reconcile(NAMESPACE, "import-1").await.unwrap();
    assert!(matches!(action, Action::Requeue(_)));
    assert!(h.store.contains::<DataVolume>(NAMESPACE, VOLUME));
}

#[tokio::test]
async fn test_missing_credentials_is_retryable() {
    let h = Harness::new();
    let mut request = import_request("import-1", Some(sample_mappings()));
    request.spec.provider_credentials_secret.name = "missing".to_string();
    h.submit(&request);

    let err = h
        .reconciler
        .reconcile(NAMESPACE, "import-1")
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::MissingCredentials(_)));
    assert!(err.is_retryable());
    assert_eq!(FakeState::count(&h.state.connects), 0);
}

#[tokio::test]
async fn test_request_without_source_is_invalid() {
    let h = Harness::new();
    let mut request = import_request("import-1", None);
    request.spec.source.ovirt = None;
    h.submit(&request);

    let err = h
        .reconciler
        .reconcile(NAMESPACE, "import-1")
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::InvalidRequest(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_target_name_from_spec() {
    let h = Harness::new();
    let mut request = import_request("import-1", Some(sample_mappings()));
    request.spec.target_vm_name = Some("custom-vm".to_string());
    h.submit(&request);

    h.reconciler.reconcile(NAMESPACE, "import-1").await.unwrap();
    assert!(h.store.contains::<VirtualMachine>(NAMESPACE, "custom-vm"));
    assert!(h.store.contains::<DataVolume>(NAMESPACE, "custom-vm-disk-1"));
    assert_eq!(
        h.request("import-1").status.target_vm_name.as_deref(),
        Some("custom-vm")
    );
}

#[tokio::test]
async fn test_long_target_name_keeps_one_volume_per_disk() {
    let h = Harness::with_source_vm(two_disk_vm(), ReconcileSettings::default());
    let target = "a".repeat(63);
    let mut request = import_request("import-1", Some(sample_mappings()));
    request.spec.target_vm_name = Some(target.clone());
    h.submit(&request);

    h.reconciler.reconcile(NAMESPACE, "import-1").await.unwrap();

    let request = h.request("import-1");
    let names: Vec<String> = request
        .status
        .data_volumes
        .iter()
        .map(|dv| dv.name.clone())
        .collect();
    assert_eq!(names.len(), 2);
    assert_ne!(names[0], names[1]);
    for name in &names {
        assert!(name.len() <= 63, "{name} is not a valid label");
        assert!(h.store.contains::<DataVolume>(NAMESPACE, name));
    }
    assert_eq!(h.store.list::<DataVolume>(Some(NAMESPACE)).unwrap().len(), 2);

    let vm = h.store.get_required::<VirtualMachine>(NAMESPACE, &target).unwrap();
    let wired: BTreeSet<&str> = vm
        .spec
        .template
        .volumes
        .iter()
        .map(|v| v.data_volume.as_str())
        .collect();
    assert_eq!(wired.len(), 2);

    // Copying one disk is not enough
    h.set_volume_phase(&names[0], DataVolumePhase::Succeeded);
    let action = h.reconciler.reconcile(NAMESPACE, "import-1").await.unwrap();
    assert_eq!(action, Action::Requeue(Duration::from_secs(30)));

    h.set_volume_phase(&names[1], DataVolumePhase::Succeeded);
    let action = h.reconciler.reconcile(NAMESPACE, "import-1").await.unwrap();
    assert_eq!(action, Action::Done);
}

#[tokio::test]
async fn test_failed_volume_fails_import() {
    let h = Harness::new();
    h.submit(&import_request("import-1", Some(sample_mappings())));
    h.reconciler.reconcile(NAMESPACE, "import-1").await.unwrap();

    h.set_volume_phase(VOLUME, DataVolumePhase::Failed);
    let action = h.reconciler.reconcile(NAMESPACE, "import-1").await.unwrap();
    assert_eq!(action, Action::Done);

    let request = h.request("import-1");
    assert_eq!(
        condition(&request, ConditionType::Succeeded),
        (ConditionStatus::False, ConditionReason::DataVolumeCreationFailed)
    );
}

#[tokio::test]
async fn test_start_vm_waits_for_running_instance() {
    let h = Harness::new();
    let mut request = import_request("import-1", Some(sample_mappings()));
    request.spec.start_vm = Some(true);
    h.submit(&request);

    h.reconciler.reconcile(NAMESPACE, "import-1").await.unwrap();
    h.set_volume_phase(VOLUME, DataVolumePhase::Succeeded);

    let action = h.reconciler.reconcile(NAMESPACE, "import-1").await.unwrap();
    assert_eq!(action, Action::Requeue(Duration::from_secs(30)));
    let vm = h.store.get_required::<VirtualMachine>(NAMESPACE, TARGET).unwrap();
    assert!(vm.spec.running);
    assert_eq!(
        condition(&h.request("import-1"), ConditionType::VirtualMachineReady),
        (ConditionStatus::False, ConditionReason::VirtualMachineStarting)
    );

    h.start_instance(TARGET);
    let action = h.reconciler.reconcile(NAMESPACE, "import-1").await.unwrap();
    assert_eq!(action, Action::Done);

    let request = h.request("import-1");
    assert_eq!(
        condition(&request, ConditionType::VirtualMachineReady),
        (ConditionStatus::True, ConditionReason::VirtualMachineRunning)
    );
    assert_eq!(
        condition(&request, ConditionType::Succeeded).0,
        ConditionStatus::True
    );
}

#[tokio::test]
async fn test_creation_failure_runs_cleanup() {
    let h = Harness::new();
    h.state
        .fail_importer_credentials
        .store(true, Ordering::SeqCst);
    h.submit(&import_request("import-1", Some(sample_mappings())));

    let err = h
        .reconciler
        .reconcile(NAMESPACE, "import-1")
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Provider(_)));
    assert_eq!(FakeState::count(&h.state.cleanups), 1);
}

#[tokio::test]
async fn test_existing_unowned_target_vm_is_not_adopted() {
    let h = Harness::new();
    h.store
        .create(&VirtualMachine {
            metadata: ObjectMeta::new(NAMESPACE, TARGET),
            spec: Default::default(),
        })
        .unwrap();
    h.submit(&import_request("import-1", Some(sample_mappings())));

    let err = h
        .reconciler
        .reconcile(NAMESPACE, "import-1")
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::NotOwned(_)), "{err}");
    assert!(err.is_retryable());

    let vm = h.store.get_required::<VirtualMachine>(NAMESPACE, TARGET).unwrap();
    assert!(vm.metadata.owner_references.is_empty());
    assert!(h.store.list::<DataVolume>(Some(NAMESPACE)).unwrap().is_empty());
    assert_eq!(FakeState::count(&h.state.cleanups), 1);
}

#[tokio::test]
async fn test_second_request_for_same_target_is_rejected() {
    let h = Harness::new();
    for name in ["import-1", "import-2"] {
        let mut request = import_request(name, Some(sample_mappings()));
        request.spec.target_vm_name = Some("shared".to_string());
        h.submit(&request);
    }

    h.reconciler.reconcile(NAMESPACE, "import-1").await.unwrap();
    let err = h
        .reconciler
        .reconcile(NAMESPACE, "import-2")
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::NotOwned(_)), "{err}");

    let owner_uid = h.request("import-1").metadata.uid;
    let vm = h.store.get_required::<VirtualMachine>(NAMESPACE, "shared").unwrap();
    assert_eq!(vm.metadata.controller_owner().unwrap().uid, owner_uid);
    let dv = h.data_volume("shared-disk-1");
    assert_eq!(dv.metadata.controller_owner().unwrap().uid, owner_uid);
}

#[tokio::test]
async fn test_deleting_request_collects_owned_objects() {
    let h = Harness::new();
    h.submit(&import_request("import-1", Some(sample_mappings())));
    h.reconciler.reconcile(NAMESPACE, "import-1").await.unwrap();
    let request = h.request("import-1");

    h.store
        .delete::<VirtualMachineImport>(NAMESPACE, "import-1")
        .unwrap();

    assert!(!h.store.contains::<VirtualMachine>(NAMESPACE, TARGET));
    assert!(!h.store.contains::<DataVolume>(NAMESPACE, VOLUME));
    assert!(!h
        .store
        .contains::<Secret>(NAMESPACE, &request.credentials_secret_name()));
    assert!(!h
        .store
        .contains::<ConfigMap>(NAMESPACE, &request.ca_config_map_name()));
    // Objects the request does not own survive
    assert!(h.store.contains::<Secret>(NAMESPACE, CREDENTIALS_SECRET));
}
