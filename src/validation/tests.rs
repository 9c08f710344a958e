use super::*;
use crate::provider::{SourceDisk, SourceNic};
use crate::resources::{
    MappingItem, MappingSource, NetworkAttachmentDefinition, ObjectIdentifier, ObjectMeta,
    StorageClass,
};
use chrono::TimeZone;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
}

fn failure(check_id: CheckId, message: &str) -> ValidationFailure {
    ValidationFailure {
        check_id,
        message: message.to_string(),
    }
}

fn nic(name: &str, network: &str) -> SourceNic {
    SourceNic {
        id: format!("{name}-id"),
        name: name.to_string(),
        network_name: Some(network.to_string()),
        interface_model: "virtio".to_string(),
        mac_address: Some("56:6f:05:0f:00:05".to_string()),
        plugged: true,
        linked: true,
        on_boot: true,
        ..Default::default()
    }
}

fn disk(id: &str, domain: &str) -> SourceDisk {
    SourceDisk {
        id: id.to_string(),
        name: format!("{id}-name"),
        size_bytes: 1 << 30,
        storage_domain_name: Some(domain.to_string()),
        interface: "virtio".to_string(),
        status: "ok".to_string(),
        storage_type: "image".to_string(),
        ..Default::default()
    }
}

fn vm(nics: Vec<SourceNic>, disks: Vec<SourceDisk>) -> SourceVm {
    SourceVm {
        id: "vm-1".to_string(),
        name: "web".to_string(),
        status: "down".to_string(),
        cpu_sockets: 1,
        cpu_cores: 1,
        cpu_threads: 1,
        memory_mib: 1024,
        nics,
        disks,
        ..Default::default()
    }
}

fn store_with_targets() -> ObjectStore {
    let store = ObjectStore::new();
    store
        .create(&StorageClass {
            metadata: ObjectMeta::new("", "standard"),
            provisioner: "csi".to_string(),
        })
        .unwrap();
    store
        .create(&NetworkAttachmentDefinition {
            metadata: ObjectMeta::new("default", "vlan10"),
            config: String::new(),
        })
        .unwrap();
    store
}

fn mappings(networks: Vec<MappingItem>, storage: Vec<MappingItem>) -> MappingConfiguration {
    MappingConfiguration {
        network_mappings: Some(networks),
        storage_mappings: Some(storage),
        disk_mappings: None,
    }
}

// ============================================================================
// Action table
// ============================================================================

#[test]
fn test_action_table_defaults() {
    let table = CheckActionTable::default();
    assert_eq!(table.action(CheckId::VmUsb), CheckAction::Warn);
    assert_eq!(table.action(CheckId::DiskLunStorage), CheckAction::Block);
    assert_eq!(table.entries().count(), CheckId::ALL.len());
}

#[test]
fn test_action_table_overrides() {
    let mut overrides = BTreeMap::new();
    overrides.insert("vm.usb".to_string(), CheckAction::Block);

    let table = CheckActionTable::with_overrides(&overrides).unwrap();
    assert_eq!(table.action(CheckId::VmUsb), CheckAction::Block);
    assert_eq!(table.action(CheckId::VmTpm), CheckAction::Warn);
}

#[test]
fn test_action_table_rejects_unknown_check() {
    let mut overrides = BTreeMap::new();
    overrides.insert("vm.flux_capacitor".to_string(), CheckAction::Log);

    let err = CheckActionTable::with_overrides(&overrides).unwrap_err();
    assert!(err.contains("vm.flux_capacitor"));
}

#[test]
fn test_check_action_parse_and_serde() {
    assert_eq!("BLOCK".parse::<CheckAction>().unwrap(), CheckAction::Block);
    assert!("deny".parse::<CheckAction>().is_err());
    assert_eq!(serde_json::to_string(&CheckAction::Warn).unwrap(), "\"warn\"");
}

// ============================================================================
// Rule aggregation
// ============================================================================

#[test]
fn test_rules_block_wins() {
    let engine = ValidationEngine::default();
    let condition = engine.rules_condition(
        &[
            failure(CheckId::VmUsb, "usb"),
            failure(CheckId::DiskLunStorage, "lun"),
            failure(CheckId::DiskSgio, "sgio"),
        ],
        now(),
    );

    assert_eq!(condition.condition_type, ConditionType::MappingRulesVerified);
    assert_eq!(condition.status, ConditionStatus::False);
    assert_eq!(condition.reason, ConditionReason::MappingRulesCheckingFailed);
    assert_eq!(condition.message, "lun, sgio");
}

#[test]
fn test_rules_warnings_only() {
    let engine = ValidationEngine::default();
    let condition = engine.rules_condition(
        &[
            failure(CheckId::VmUsb, "usb"),
            failure(CheckId::VmCpuShares, "shares"),
            failure(CheckId::VmTpm, "tpm"),
        ],
        now(),
    );

    assert_eq!(condition.status, ConditionStatus::True);
    assert_eq!(condition.reason, ConditionReason::ReportedWarnings);
    assert_eq!(condition.message, "usb, tpm");
}

#[test]
fn test_rules_log_only_has_empty_message() {
    let engine = ValidationEngine::default();
    let condition = engine.rules_condition(&[failure(CheckId::VmCpuShares, "shares")], now());

    assert_eq!(condition.status, ConditionStatus::True);
    assert_eq!(condition.reason, ConditionReason::MappingRulesCheckingCompleted);
    assert!(condition.message.is_empty());
}

#[test]
fn test_rules_respect_overrides() {
    let mut overrides = BTreeMap::new();
    overrides.insert("disk.lun_storage".to_string(), CheckAction::Log);
    let engine = ValidationEngine::new(CheckActionTable::with_overrides(&overrides).unwrap());

    let condition = engine.rules_condition(&[failure(CheckId::DiskLunStorage, "lun")], now());
    assert!(condition.is_true());
}

// ============================================================================
// Mapping validity
// ============================================================================

#[test]
fn test_complete_mapping_is_valid() {
    let store = store_with_targets();
    let vm = vm(vec![nic("eth0", "ovirtmgmt")], vec![disk("d1", "data")]);
    let mappings = mappings(
        vec![MappingItem::new(MappingSource::name("ovirtmgmt"), "pod").with_type("pod")],
        vec![MappingItem::new(MappingSource::name("data"), "standard")],
    );

    let report = ValidationEngine::default().validate(&vm, &mappings, &store, "default", now());
    assert!(report.is_valid());
    assert_eq!(report.mapping.reason, ConditionReason::ValidationCompleted);
    assert_eq!(report.rules.reason, ConditionReason::MappingRulesCheckingCompleted);
}

#[test]
fn test_missing_mappings_reported() {
    let store = store_with_targets();
    let vm = vm(vec![nic("eth0", "ovirtmgmt")], vec![disk("d1", "data")]);

    let report = ValidationEngine::default().validate(
        &vm,
        &MappingConfiguration::default(),
        &store,
        "default",
        now(),
    );

    assert!(!report.is_valid());
    assert_eq!(report.mapping.reason, ConditionReason::IncompleteMappingRules);
    assert!(report.mapping.message.contains("network ovirtmgmt of NIC eth0"));
    assert!(report.mapping.message.contains("storage domain data"));
    assert!(report.mapping.message.contains(MESSAGE_SEPARATOR));
}

#[test]
fn test_disk_mapping_overrides_storage_domain() {
    let store = store_with_targets();
    let vm = vm(vec![], vec![disk("d1", "unmapped-domain")]);
    let mut config = mappings(vec![], vec![]);
    config.disk_mappings = Some(vec![MappingItem::new(MappingSource::id("d1"), "standard")]);

    let report = ValidationEngine::default().validate(&vm, &config, &store, "default", now());
    assert!(report.mapping.is_true());
}

#[test]
fn test_missing_targets_reported() {
    let store = store_with_targets();
    let vm = vm(vec![nic("eth0", "vlan")], vec![disk("d1", "data")]);
    let mut multus = MappingItem::new(MappingSource::name("vlan"), "vlan20").with_type("multus");
    multus.target = ObjectIdentifier {
        name: "vlan20".to_string(),
        namespace: Some("network".to_string()),
    };
    let config = mappings(
        vec![multus],
        vec![MappingItem::new(MappingSource::name("data"), "gold")],
    );

    let failures = mapping::validate_network_mappings(&vm, &config, &store, "default");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, MappingFailureKind::NetworkTargetMissing);
    assert!(failures[0].message.contains("network/vlan20"));

    let failures = mapping::validate_storage_mappings(&vm, &config, &store);
    assert_eq!(failures[0].kind, MappingFailureKind::StorageTargetMissing);
}

#[test]
fn test_existing_multus_target_accepted() {
    let store = store_with_targets();
    let vm = vm(vec![nic("eth0", "vlan")], vec![]);
    let config = mappings(
        vec![MappingItem::new(MappingSource::name("vlan"), "vlan10").with_type("multus")],
        vec![],
    );

    assert!(mapping::validate_network_mappings(&vm, &config, &store, "default").is_empty());
}

#[test]
fn test_at_most_one_pod_network() {
    let store = store_with_targets();
    let vm = vm(vec![nic("eth0", "a"), nic("eth1", "b")], vec![]);
    let config = mappings(
        vec![
            MappingItem::new(MappingSource::name("a"), "pod"),
            MappingItem::new(MappingSource::name("b"), "pod").with_type("pod"),
        ],
        vec![],
    );

    let failures = mapping::validate_network_mappings(&vm, &config, &store, "default");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, MappingFailureKind::MultiplePodNetworks);
    assert!(failures[0].message.contains("eth0, eth1"));
}

#[test]
fn test_unknown_network_type_rejected() {
    let store = store_with_targets();
    let vm = vm(vec![nic("eth0", "a")], vec![]);
    let config = mappings(
        vec![MappingItem::new(MappingSource::name("a"), "x").with_type("bridge")],
        vec![],
    );

    let failures = mapping::validate_network_mappings(&vm, &config, &store, "default");
    assert_eq!(failures[0].kind, MappingFailureKind::NetworkTypeInvalid);
}
