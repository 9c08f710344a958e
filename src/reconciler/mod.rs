//! Import reconciler.
//!
//! Drives one import request from submission to completion. Each call to
//! [`ImportReconciler::reconcile`] reads the current state of the request and
//! the objects it owns, performs the next step and reports when to look
//! again. Every step is idempotent, so re-running a reconcile without any
//! change in between is safe.
//!
//! # Steps
//!
//! 1. Fetch the request (terminal requests stop here)
//! 2. Connect the provider, load the source VM, merge the mappings
//! 3. Validate mappings and VM attributes
//! 4. Stop the source VM (cold imports)
//! 5. Create the target VM and the importer's transient Secret and ConfigMap
//! 6. Create data volumes and wait for them to be copied
//! 7. Start the target VM if requested
//! 8. Warm imports: stage checkpoints until finalization ([`WarmStager`])
//! 9. Mark the request succeeded

mod clock;
mod error;
mod warm;

pub use clock::*;
pub use error::ReconcileError;
pub use warm::WarmStager;

use crate::conditions::{find_condition, is_condition_true, upsert_condition};
use crate::config::VmImportConfig;
use crate::mapper::{data_volume_names, Mapper, MapperContext};
use crate::provider::{Provider, ProviderFactory, VmPowerState};
use crate::resources::{
    normalize_name, Condition, ConditionReason, ConditionStatus, ConditionType, ConfigMap,
    DataVolume, DataVolumeItem, DataVolumePhase, InstancePhase, ObjectMeta, OwnerReference,
    Resource, ResourceMapping, Secret, VirtualMachine, VirtualMachineImport,
    VirtualMachineInstance, WarmImportStatus,
};
use crate::store::{ObjectStore, StoreError};
use crate::validation::{ValidationEngine, MESSAGE_SEPARATOR};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Key of the CA bundle in the transient ConfigMap.
pub const CA_CERT_KEY: &str = "ca.pem";

const PROGRESS_TARGET_CREATED: u8 = 10;
const PROGRESS_VOLUMES_CREATED: u8 = 30;
const PROGRESS_COPY_SPAN: f64 = 60.0;
const PROGRESS_DONE: u8 = 100;

/// Outcome of one reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing to do until the request or one of its objects changes
    Done,
    /// Reconcile again after the given delay
    Requeue(Duration),
}

/// Failure thresholds and pacing of warm imports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmSettings {
    pub max_failures: u32,
    pub max_consecutive_failures: u32,
    pub stage_interval: chrono::Duration,
}

impl WarmSettings {
    /// Whether the failure counters have crossed either threshold.
    pub fn threshold_exceeded(&self, status: &WarmImportStatus) -> bool {
        status.failures > self.max_failures
            || status.consecutive_failures > self.max_consecutive_failures
    }
}

impl Default for WarmSettings {
    fn default() -> Self {
        Self {
            max_failures: 10,
            max_consecutive_failures: 5,
            stage_interval: chrono::Duration::minutes(60),
        }
    }
}

/// Requeue delays and warm import settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileSettings {
    /// Delay when the next step is expected to be ready almost immediately
    pub requeue_fast: Duration,
    /// Delay while waiting on the volume importer or the VM runtime
    pub requeue_slow: Duration,
    pub warm: WarmSettings,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            requeue_fast: Duration::from_secs(5),
            requeue_slow: Duration::from_secs(30),
            warm: WarmSettings::default(),
        }
    }
}

impl ReconcileSettings {
    pub fn from_config(config: &VmImportConfig) -> Self {
        Self {
            requeue_fast: Duration::from_secs(config.controller.requeue_fast_seconds),
            requeue_slow: Duration::from_secs(config.controller.requeue_slow_seconds),
            warm: WarmSettings {
                max_failures: config.warm_import.max_failures,
                max_consecutive_failures: config.warm_import.max_consecutive_failures,
                stage_interval: chrono::Duration::minutes(
                    config.warm_import.stage_interval_minutes as i64,
                ),
            },
        }
    }
}

/// Reconciles `VirtualMachineImport` requests.
pub struct ImportReconciler {
    store: Arc<ObjectStore>,
    providers: Arc<dyn ProviderFactory>,
    validator: Arc<ValidationEngine>,
    clock: Arc<dyn Clock>,
    settings: ReconcileSettings,
}

impl ImportReconciler {
    pub fn new(
        store: Arc<ObjectStore>,
        providers: Arc<dyn ProviderFactory>,
        validator: Arc<ValidationEngine>,
        clock: Arc<dyn Clock>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            store,
            providers,
            validator,
            clock,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<ObjectStore> {
        &self.store
    }

    pub fn settings(&self) -> &ReconcileSettings {
        &self.settings
    }

    /// Reconcile the import request `namespace/name` once.
    ///
    /// # Errors
    ///
    /// Collaborator and store errors are returned for retry. Validation
    /// failures are recorded on the request and returned as the
    /// non-retryable `ReconcileError::ValidationFailed`.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Action, ReconcileError> {
        let start = Instant::now();
        let result = self.reconcile_request(namespace, name).await;

        let label = match &result {
            Ok(Action::Done) => "done",
            Ok(Action::Requeue(_)) => "requeue",
            Err(_) => "error",
        };
        metrics::counter!("vmimport_reconcile_total", "result" => label).increment(1);
        metrics::histogram!("vmimport_reconcile_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        result
    }

    async fn reconcile_request(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Action, ReconcileError> {
        let Some(mut request) = self.store.get::<VirtualMachineImport>(namespace, name)? else {
            tracing::debug!(namespace, name, "Import request not found, nothing to do");
            return Ok(Action::Done);
        };

        if find_condition(&request.status.conditions, ConditionType::Succeeded).is_some() {
            tracing::trace!(import = %request_key(&request), "Import request already finished");
            return Ok(Action::Done);
        }

        let provider = self.init_provider(&request).await?;

        if should_validate(&request) {
            self.validate(&mut request, provider.as_ref()).await?;
        }

        let warm = request.spec.warm && provider.supports_warm_migration();
        if request.spec.warm && !warm {
            tracing::warn!(
                import = %request_key(&request),
                source_type = %provider.source_type(),
                "Source platform does not support warm import, importing cold"
            );
        }
        if !warm {
            self.stop_source_vm(&request, provider.as_ref()).await?;
        }

        let mapper = provider.create_mapper(mapper_context(&request))?;
        let target = self
            .ensure_target(&mut request, provider.as_ref(), mapper.as_ref())
            .await?;

        if warm && !self.warm_finished(&request, mapper.as_ref(), &target)? {
            let stager = WarmStager::new(&self.store, self.clock.as_ref(), &self.settings);
            return stager
                .stage(&mut request, provider.as_ref(), mapper.as_ref(), &target)
                .await;
        }

        if let Some(action) = self
            .ensure_data_volumes(&mut request, provider.as_ref(), mapper.as_ref(), &target)
            .await?
        {
            return Ok(action);
        }

        if let Some(action) = self.ensure_vm_started(&mut request, &target)? {
            return Ok(action);
        }

        self.complete(&mut request, provider.as_ref()).await
    }

    // ========================================================================
    // Provider setup and validation
    // ========================================================================

    async fn init_provider(
        &self,
        request: &VirtualMachineImport,
    ) -> Result<Box<dyn Provider>, ReconcileError> {
        let namespace = &request.metadata.namespace;
        let (source_type, source) = request.spec.source.selected().ok_or_else(|| {
            ReconcileError::InvalidRequest("exactly one source platform must be set".to_string())
        })?;

        let secret_ref = &request.spec.provider_credentials_secret;
        let secret_namespace = secret_ref.namespace_or(namespace);
        let secret = self
            .store
            .get::<Secret>(secret_namespace, &secret_ref.name)?
            .ok_or_else(|| {
                ReconcileError::MissingCredentials(format!(
                    "{}/{}",
                    secret_namespace, secret_ref.name
                ))
            })?;

        let mut provider = self.providers.create(source_type)?;
        provider.connect(&secret).await?;
        provider.load_vm(source).await?;

        let external = match &request.spec.resource_mapping {
            Some(reference) => Some(self.store.get_required::<ResourceMapping>(
                reference.namespace_or(namespace),
                &reference.name,
            )?),
            None => None,
        };
        provider.prepare_resource_mapping(
            external.as_ref().map(|mapping| &mapping.spec),
            request.spec.source.mappings(),
        );

        tracing::debug!(
            import = %request_key(request),
            source_type = %source_type,
            "Provider initialized"
        );
        Ok(provider)
    }

    async fn validate(
        &self,
        request: &mut VirtualMachineImport,
        provider: &dyn Provider,
    ) -> Result<(), ReconcileError> {
        let conditions = provider
            .validate(
                &self.validator,
                &self.store,
                &request.metadata.namespace,
                self.clock.now(),
            )
            .await?;

        let failures: Vec<String> = conditions
            .iter()
            .filter(|c| c.is_false())
            .map(|c| c.message.clone())
            .collect();
        for condition in conditions {
            upsert_condition(&mut request.status.conditions, condition);
        }

        if failures.is_empty() {
            persist(&self.store, request)?;
            tracing::debug!(import = %request_key(request), "Import request validated");
            return Ok(());
        }

        let message = failures.join(MESSAGE_SEPARATOR);
        let now = self.clock.now();
        set_condition(
            request,
            ConditionType::Processing,
            ConditionStatus::False,
            ConditionReason::ValidationFailed,
            message.clone(),
            now,
        );
        persist(&self.store, request)?;

        tracing::info!(
            import = %request_key(request),
            reason = %message,
            "Import request failed validation"
        );
        Err(ReconcileError::ValidationFailed(message))
    }

    async fn stop_source_vm(
        &self,
        request: &VirtualMachineImport,
        provider: &dyn Provider,
    ) -> Result<(), ReconcileError> {
        if provider.vm_status().await? == VmPowerState::Up {
            tracing::info!(import = %request_key(request), "Stopping source VM");
            provider.stop_vm().await?;
        }
        Ok(())
    }

    // ========================================================================
    // Target objects
    // ========================================================================

    async fn ensure_target(
        &self,
        request: &mut VirtualMachineImport,
        provider: &dyn Provider,
        mapper: &dyn Mapper,
    ) -> Result<String, ReconcileError> {
        let target = match (&request.status.target_vm_name, &request.spec.target_vm_name) {
            (Some(name), _) | (None, Some(name)) => name.clone(),
            (None, None) => normalize_name(&provider.source_vm()?.name),
        };

        if let Err(err) = self
            .create_target_objects(request, provider, mapper, &target)
            .await
        {
            return Err(self.clean_up_after(request, provider, err).await);
        }

        if request.status.target_vm_name.as_deref() != Some(target.as_str()) {
            request.status.target_vm_name = Some(target.clone());
            request.status.progress = request.status.progress.max(PROGRESS_TARGET_CREATED);
            set_condition(
                request,
                ConditionType::Processing,
                ConditionStatus::True,
                ConditionReason::CreatingTargetVm,
                format!("Creating virtual machine {}", target),
                self.clock.now(),
            );
            persist(&self.store, request)?;
            tracing::info!(
                import = %request_key(request),
                target_vm = %target,
                "Target VM created"
            );
        }

        Ok(target)
    }

    async fn create_target_objects(
        &self,
        request: &VirtualMachineImport,
        provider: &dyn Provider,
        mapper: &dyn Mapper,
        target: &str,
    ) -> Result<(), ReconcileError> {
        let namespace = request.metadata.namespace.as_str();
        let owner = request.controller_reference();

        if !exists_owned::<VirtualMachine>(&self.store, namespace, target, &owner)? {
            let mut vm = mapper.map_vm(target)?;
            if let Some(template) = provider.find_template().await? {
                provider.process_template(&template, &mut vm);
            }
            vm.metadata.owner_references = vec![owner.clone()];
            create_owned(&self.store, &vm, &owner)?;
        }

        let secret_name = request.credentials_secret_name();
        if !exists_owned::<Secret>(&self.store, namespace, &secret_name, &owner)? {
            let secret = Secret {
                metadata: owned_metadata(namespace, &secret_name, &owner),
                string_data: provider.importer_credentials()?,
            };
            create_owned(&self.store, &secret, &owner)?;
        }

        let config_map_name = request.ca_config_map_name();
        if !exists_owned::<ConfigMap>(&self.store, namespace, &config_map_name, &owner)? {
            let config_map = ConfigMap {
                metadata: owned_metadata(namespace, &config_map_name, &owner),
                data: provider
                    .ca_certificate()
                    .map(|pem| BTreeMap::from([(CA_CERT_KEY.to_string(), pem)]))
                    .unwrap_or_default(),
            };
            create_owned(&self.store, &config_map, &owner)?;
        }

        Ok(())
    }

    /// Run provider cleanup after a failed creation and fold its outcome
    /// into the original error.
    async fn clean_up_after(
        &self,
        request: &VirtualMachineImport,
        provider: &dyn Provider,
        error: ReconcileError,
    ) -> ReconcileError {
        tracing::warn!(
            import = %request_key(request),
            error = %error,
            "Creating target objects failed, cleaning up"
        );
        match provider.clean_up(&self.store, request).await {
            Ok(()) => error,
            Err(cleanup) => ReconcileError::CleanupFailed {
                error: Box::new(error),
                cleanup: cleanup.to_string(),
            },
        }
    }

    fn warm_finished(
        &self,
        request: &VirtualMachineImport,
        mapper: &dyn Mapper,
        target: &str,
    ) -> Result<bool, ReconcileError> {
        let namespace = &request.metadata.namespace;
        let specs = mapper.map_data_volumes(target)?;
        for name in data_volume_names(target, specs.keys().map(String::as_str))?.values() {
            match self.store.get::<DataVolume>(namespace, name)? {
                Some(dv) if dv.spec.final_checkpoint => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    // ========================================================================
    // Data volumes
    // ========================================================================

    async fn ensure_data_volumes(
        &self,
        request: &mut VirtualMachineImport,
        provider: &dyn Provider,
        mapper: &dyn Mapper,
        target: &str,
    ) -> Result<Option<Action>, ReconcileError> {
        let names = match self.create_data_volumes(request, mapper, target) {
            Ok(names) => names,
            Err(err) => return Err(self.clean_up_after(request, provider, err).await),
        };
        let namespace = request.metadata.namespace.clone();

        let mut vm = self
            .store
            .get_required::<VirtualMachine>(&namespace, target)?;
        let wired = vm.spec.template.clone();
        mapper.map_disks(&mut vm, &names);
        if vm.spec.template != wired {
            self.store.update(&vm)?;
        }

        let items: Vec<DataVolumeItem> = names
            .values()
            .map(|name| DataVolumeItem { name: name.clone() })
            .collect();
        if request.status.data_volumes != items {
            request.status.data_volumes = items;
            request.status.progress = request.status.progress.max(PROGRESS_VOLUMES_CREATED);
            persist(&self.store, request)?;
        }

        let mut volumes = Vec::with_capacity(names.len());
        for name in names.values() {
            match self.store.get::<DataVolume>(&namespace, name)? {
                Some(dv) => volumes.push(dv),
                // Deleted since it was ensured; recreated on the next pass
                None => return Ok(Some(Action::Requeue(self.settings.requeue_fast))),
            }
        }

        let now = self.clock.now();
        if let Some(failed) = volumes
            .iter()
            .find(|dv| dv.phase() == DataVolumePhase::Failed)
        {
            let message = format!("Data volume {} failed to import", failed.metadata.name);
            set_condition(
                request,
                ConditionType::Succeeded,
                ConditionStatus::False,
                ConditionReason::DataVolumeCreationFailed,
                message.clone(),
                now,
            );
            set_condition(
                request,
                ConditionType::Processing,
                ConditionStatus::False,
                ConditionReason::DataVolumeCreationFailed,
                message.clone(),
                now,
            );
            persist(&self.store, request)?;
            tracing::warn!(import = %request_key(request), reason = %message, "Import failed");
            return Ok(Some(Action::Done));
        }

        if volumes
            .iter()
            .all(|dv| dv.phase() == DataVolumePhase::Succeeded)
        {
            return Ok(None);
        }

        request.status.progress = copy_progress(&volumes).max(request.status.progress);
        set_condition(
            request,
            ConditionType::Processing,
            ConditionStatus::True,
            ConditionReason::CopyingDisks,
            "Copying virtual machine disks",
            now,
        );
        persist(&self.store, request)?;
        Ok(Some(Action::Requeue(self.settings.requeue_slow)))
    }

    /// Ensure one data volume per mapped disk, returning disk id to volume name.
    fn create_data_volumes(
        &self,
        request: &VirtualMachineImport,
        mapper: &dyn Mapper,
        target: &str,
    ) -> Result<BTreeMap<String, String>, ReconcileError> {
        let namespace = request.metadata.namespace.as_str();
        let owner = request.controller_reference();
        let specs = mapper.map_data_volumes(target)?;
        let names = data_volume_names(target, specs.keys().map(String::as_str))?;

        for (disk_id, spec) in specs {
            let name = &names[&disk_id];
            if !exists_owned::<DataVolume>(&self.store, namespace, name, &owner)? {
                let dv = DataVolume {
                    metadata: owned_metadata(namespace, name, &owner),
                    spec,
                    status: Default::default(),
                };
                create_owned(&self.store, &dv, &owner)?;
                tracing::debug!(
                    import = %request_key(request),
                    data_volume = %name,
                    "Data volume created"
                );
            }
        }
        Ok(names)
    }

    // ========================================================================
    // Start and completion
    // ========================================================================

    fn ensure_vm_started(
        &self,
        request: &mut VirtualMachineImport,
        target: &str,
    ) -> Result<Option<Action>, ReconcileError> {
        if !request.should_start_vm() {
            return Ok(None);
        }
        let namespace = request.metadata.namespace.clone();

        let mut vm = self
            .store
            .get_required::<VirtualMachine>(&namespace, target)?;
        if !vm.spec.running {
            vm.spec.running = true;
            self.store.update(&vm)?;
            tracing::info!(
                import = %request_key(request),
                target_vm = %target,
                "Starting target VM"
            );
        }

        let phase = self
            .store
            .get::<VirtualMachineInstance>(&namespace, target)?
            .map(|vmi| vmi.status.phase);
        let now = self.clock.now();

        if phase == Some(InstancePhase::Running) {
            set_condition(
                request,
                ConditionType::VirtualMachineReady,
                ConditionStatus::True,
                ConditionReason::VirtualMachineRunning,
                "Virtual machine is running",
                now,
            );
            return Ok(None);
        }

        let message = match phase {
            Some(phase) => format!("Virtual machine instance is {:?}", phase),
            None => "Virtual machine instance not created yet".to_string(),
        };
        set_condition(
            request,
            ConditionType::VirtualMachineReady,
            ConditionStatus::False,
            ConditionReason::VirtualMachineStarting,
            message,
            now,
        );
        persist(&self.store, request)?;
        Ok(Some(Action::Requeue(self.settings.requeue_slow)))
    }

    async fn complete(
        &self,
        request: &mut VirtualMachineImport,
        provider: &dyn Provider,
    ) -> Result<Action, ReconcileError> {
        let now = self.clock.now();
        set_condition(
            request,
            ConditionType::Succeeded,
            ConditionStatus::True,
            ConditionReason::VirtualMachineReady,
            "Virtual machine import completed",
            now,
        );
        set_condition(
            request,
            ConditionType::Processing,
            ConditionStatus::False,
            ConditionReason::Completed,
            "Processing completed",
            now,
        );
        request.status.progress = PROGRESS_DONE;
        persist(&self.store, request)?;
        tracing::info!(import = %request_key(request), "Import succeeded");

        if let Err(e) = provider.clean_up(&self.store, request).await {
            tracing::warn!(
                import = %request_key(request),
                error = %e,
                "Removing transient import objects failed"
            );
        }
        Ok(Action::Done)
    }
}

/// Validation reruns until both validation conditions have passed once.
pub fn should_validate(request: &VirtualMachineImport) -> bool {
    let conditions = &request.status.conditions;
    !(is_condition_true(conditions, ConditionType::Valid)
        && is_condition_true(conditions, ConditionType::MappingRulesVerified))
}

/// Overall progress while disks copy: 30 to 90, scaled by mean volume progress.
pub fn copy_progress(volumes: &[DataVolume]) -> u8 {
    if volumes.is_empty() {
        return PROGRESS_VOLUMES_CREATED;
    }
    let mean = volumes
        .iter()
        .map(|dv| match dv.phase() {
            DataVolumePhase::Succeeded => 100.0,
            _ => dv.status.progress.unwrap_or(0.0).clamp(0.0, 100.0),
        })
        .sum::<f64>()
        / volumes.len() as f64;
    PROGRESS_VOLUMES_CREATED + (mean * PROGRESS_COPY_SPAN / 100.0).round() as u8
}

pub(crate) fn request_key(request: &VirtualMachineImport) -> String {
    format!("{}/{}", request.metadata.namespace, request.metadata.name)
}

fn mapper_context(request: &VirtualMachineImport) -> MapperContext {
    MapperContext {
        namespace: request.metadata.namespace.clone(),
        credentials_secret: request.credentials_secret_name(),
        ca_config_map: request.ca_config_map_name(),
    }
}

fn set_condition(
    request: &mut VirtualMachineImport,
    condition_type: ConditionType,
    status: ConditionStatus,
    reason: ConditionReason,
    message: impl Into<String>,
    now: chrono::DateTime<chrono::Utc>,
) {
    upsert_condition(
        &mut request.status.conditions,
        Condition::new(condition_type, status, reason, message, now),
    );
}

/// Write the request back, keeping the fresh resource version for later writes.
fn persist(store: &ObjectStore, request: &mut VirtualMachineImport) -> Result<(), StoreError> {
    *request = store.update(request)?;
    Ok(())
}

fn owned_metadata(namespace: &str, name: &str, owner: &OwnerReference) -> ObjectMeta {
    let mut metadata = ObjectMeta::new(namespace, name);
    metadata.owner_references = vec![owner.clone()];
    metadata
}

/// Whether `namespace/name` already exists under `owner`.
///
/// An object with that name held by another controller, or by none, is an
/// error rather than something to adopt.
fn exists_owned<R: Resource>(
    store: &ObjectStore,
    namespace: &str,
    name: &str,
    owner: &OwnerReference,
) -> Result<bool, ReconcileError> {
    match store.get::<R>(namespace, name)? {
        Some(existing) => check_owner(&existing, owner).map(|()| true),
        None => Ok(false),
    }
}

/// Create `object`, accepting a concurrent create by the same owner.
fn create_owned<R: Resource>(
    store: &ObjectStore,
    object: &R,
    owner: &OwnerReference,
) -> Result<(), ReconcileError> {
    match store.create(object) {
        Ok(_) => Ok(()),
        Err(e) if e.is_already_exists() => {
            let meta = object.metadata();
            match store.get::<R>(&meta.namespace, &meta.name)? {
                Some(existing) => check_owner(&existing, owner),
                None => Err(e.into()),
            }
        }
        Err(e) => Err(e.into()),
    }
}

fn check_owner<R: Resource>(existing: &R, owner: &OwnerReference) -> Result<(), ReconcileError> {
    let meta = existing.metadata();
    match meta.controller_owner() {
        Some(current) if current.uid == owner.uid => Ok(()),
        _ => Err(ReconcileError::NotOwned(format!(
            "{} {}/{}",
            R::KIND,
            meta.namespace,
            meta.name
        ))),
    }
}
