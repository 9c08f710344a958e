use super::{impl_resource, normalize_name, MappingConfiguration, ObjectIdentifier, ObjectMeta};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// User-submitted request to import one virtual machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineImport {
    pub metadata: ObjectMeta,
    pub spec: VirtualMachineImportSpec,
    #[serde(default)]
    pub status: VirtualMachineImportStatus,
}

impl_resource!(VirtualMachineImport, "VirtualMachineImport");

impl VirtualMachineImport {
    pub fn new(metadata: ObjectMeta, spec: VirtualMachineImportSpec) -> Self {
        Self {
            metadata,
            spec,
            status: VirtualMachineImportStatus::default(),
        }
    }

    /// Whether the request should start the VM once disks are imported.
    pub fn should_start_vm(&self) -> bool {
        self.spec.start_vm.unwrap_or(false)
    }

    /// Whether the finalize deadline of a warm import has been reached.
    pub fn finalize_due(&self, now: DateTime<Utc>) -> bool {
        self.spec.warm && self.spec.finalize_date.is_some_and(|date| now >= date)
    }

    /// Name of the transient Secret handed to the disk importer.
    pub fn credentials_secret_name(&self) -> String {
        normalize_name(&format!("vmimport-{}-credentials", self.metadata.name))
    }

    /// Name of the transient ConfigMap carrying the platform CA certificate.
    pub fn ca_config_map_name(&self) -> String {
        normalize_name(&format!("vmimport-{}-ca", self.metadata.name))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineImportSpec {
    pub source: VirtualMachineImportSource,
    /// Secret holding the source platform API credentials
    pub provider_credentials_secret: ObjectIdentifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_vm_name: Option<String>,
    /// Reusable mapping resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_mapping: Option<ObjectIdentifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_vm: Option<bool>,
    #[serde(default)]
    pub warm: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalize_date: Option<DateTime<Utc>>,
}

/// Source platform selector. Exactly one variant is expected to be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineImportSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ovirt: Option<PlatformSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vmware: Option<PlatformSource>,
}

impl VirtualMachineImportSource {
    /// The selected platform and its source description.
    pub fn selected(&self) -> Option<(SourceType, &PlatformSource)> {
        match (&self.ovirt, &self.vmware) {
            (Some(source), None) => Some((SourceType::Ovirt, source)),
            (None, Some(source)) => Some((SourceType::Vmware, source)),
            _ => None,
        }
    }

    /// Inline mapping configuration of the selected platform.
    pub fn mappings(&self) -> Option<&MappingConfiguration> {
        self.selected().and_then(|(_, source)| source.mappings.as_ref())
    }
}

/// Source VM identity plus optional inline mapping rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSource {
    pub vm: VmIdentity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mappings: Option<MappingConfiguration>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmIdentity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
}

/// Source virtualization platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Ovirt,
    Vmware,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Ovirt => "ovirt",
            SourceType::Vmware => "vmware",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualMachineImportStatus {
    pub conditions: Vec<Condition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_vm_name: Option<String>,
    pub data_volumes: Vec<DataVolumeItem>,
    pub warm_import: WarmImportStatus,
    /// Coarse import progress, 0-100
    pub progress: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataVolumeItem {
    pub name: String,
}

/// Bookkeeping for the incremental (warm) import protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WarmImportStatus {
    pub failures: u32,
    pub consecutive_failures: u32,
    pub successes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_stage_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_snapshot: Option<String>,
}

/// Typed, timestamped status entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    pub reason: ConditionReason,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
    pub last_heartbeat_time: DateTime<Utc>,
}

impl Condition {
    /// New condition with both timestamps set to `now`.
    pub fn new(
        condition_type: ConditionType,
        status: ConditionStatus,
        reason: ConditionReason,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            condition_type,
            status,
            reason,
            message: message.into(),
            last_transition_time: now,
            last_heartbeat_time: now,
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    pub fn is_false(&self) -> bool {
        self.status == ConditionStatus::False
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    /// Terminal outcome of the import
    Succeeded,
    /// Mapping rules are complete and point at existing targets
    Valid,
    /// Source VM attributes passed rule checking
    MappingRulesVerified,
    /// Import is in progress
    Processing,
    /// Target VM reached the running phase
    VirtualMachineReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Machine-readable cause of a condition's current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionReason {
    // Valid
    ValidationCompleted,
    IncompleteMappingRules,
    // MappingRulesVerified
    MappingRulesCheckingCompleted,
    MappingRulesCheckingFailed,
    ReportedWarnings,
    // Processing
    CreatingTargetVm,
    CopyingDisks,
    WaitingForDataVolumes,
    CopyingStage,
    CopyingPaused,
    FinalizingWarmImport,
    ValidationFailed,
    Completed,
    // VirtualMachineReady
    VirtualMachineStarting,
    VirtualMachineRunning,
    // Succeeded
    VirtualMachineReady,
    DataVolumeCreationFailed,
    WarmImportFailed,
}

impl fmt::Display for ConditionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
