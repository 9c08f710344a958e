//! Warm import stager.
//!
//! A warm import copies disks while the source VM keeps running. Each round
//! takes a snapshot of the source VM and appends it to every data volume's
//! checkpoint chain; the importer copies the blocks changed since the
//! previous checkpoint and pauses the volume. Rounds repeat every stage
//! interval until the finalize date, when the source VM is stopped and one
//! last checkpoint is marked final.
//!
//! Failed rounds bump the failure counters on the request. Once a counter
//! crosses its threshold the import fails terminally without further calls
//! to the source platform.

use super::{
    check_owner, create_owned, owned_metadata, persist, request_key, set_condition, Action, Clock,
    ReconcileError, ReconcileSettings,
};
use crate::mapper::{data_volume_names, Mapper};
use crate::provider::{Provider, VmPowerState};
use crate::resources::{
    ConditionReason, ConditionStatus, ConditionType, DataVolume, DataVolumeCheckpoint,
    DataVolumeItem, DataVolumePhase, Resource, VirtualMachineImport,
};
use crate::store::ObjectStore;
use chrono::{DateTime, Utc};

/// Runs one warm import round per reconcile.
pub struct WarmStager<'a> {
    store: &'a ObjectStore,
    clock: &'a dyn Clock,
    settings: &'a ReconcileSettings,
}

impl<'a> WarmStager<'a> {
    pub fn new(
        store: &'a ObjectStore,
        clock: &'a dyn Clock,
        settings: &'a ReconcileSettings,
    ) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    /// Advance the warm import of `request` by one step.
    ///
    /// Any error other than a store conflict counts as a failed round and is
    /// persisted on the request before it is returned.
    pub async fn stage(
        &self,
        request: &mut VirtualMachineImport,
        provider: &dyn Provider,
        mapper: &dyn Mapper,
        target: &str,
    ) -> Result<Action, ReconcileError> {
        let now = self.clock.now();

        if self
            .settings
            .warm
            .threshold_exceeded(&request.status.warm_import)
        {
            return self.fail(request, now);
        }

        match self.run_round(request, provider, mapper, target, now).await {
            Ok(action) => Ok(action),
            Err(ReconcileError::Store(e)) if e.is_conflict() => Err(ReconcileError::Store(e)),
            Err(err) => {
                let warm = &mut request.status.warm_import;
                warm.failures += 1;
                warm.consecutive_failures += 1;
                tracing::warn!(
                    import = %request_key(request),
                    failures = request.status.warm_import.failures,
                    consecutive_failures = request.status.warm_import.consecutive_failures,
                    error = %err,
                    "Warm import round failed"
                );
                persist(self.store, request)?;
                Err(err)
            }
        }
    }

    fn fail(
        &self,
        request: &mut VirtualMachineImport,
        now: DateTime<Utc>,
    ) -> Result<Action, ReconcileError> {
        let warm = &request.status.warm_import;
        let message = format!(
            "Warm import failed {} times ({} consecutive)",
            warm.failures, warm.consecutive_failures
        );

        set_condition(
            request,
            ConditionType::Succeeded,
            ConditionStatus::False,
            ConditionReason::WarmImportFailed,
            message.clone(),
            now,
        );
        set_condition(
            request,
            ConditionType::Processing,
            ConditionStatus::False,
            ConditionReason::WarmImportFailed,
            message.clone(),
            now,
        );
        persist(self.store, request)?;

        tracing::warn!(import = %request_key(request), reason = %message, "Import failed");
        Ok(Action::Done)
    }

    async fn run_round(
        &self,
        request: &mut VirtualMachineImport,
        provider: &dyn Provider,
        mapper: &dyn Mapper,
        target: &str,
        now: DateTime<Utc>,
    ) -> Result<Action, ReconcileError> {
        let namespace = request.metadata.namespace.clone();

        // Every checkpoint chain starts at the root snapshot
        let root = match request.status.warm_import.root_snapshot.clone() {
            Some(snapshot) => snapshot,
            None => {
                let snapshot = provider.create_vm_snapshot().await?;
                request.status.warm_import.root_snapshot = Some(snapshot.clone());
                persist(self.store, request)?;
                tracing::debug!(
                    import = %request_key(request),
                    snapshot = %snapshot,
                    "Root snapshot created"
                );
                snapshot
            }
        };

        let specs = mapper.map_data_volumes(target)?;
        let mut names = data_volume_names(target, specs.keys().map(String::as_str))?;
        request.status.data_volumes = names
            .values()
            .map(|name| DataVolumeItem { name: name.clone() })
            .collect();

        let owner = request.controller_reference();
        let mut volumes = Vec::with_capacity(specs.len());
        let mut waiting = false;

        for (disk_id, mut spec) in specs {
            let Some(name) = names.remove(&disk_id) else {
                continue;
            };
            if let Some(dv) = self.store.get::<DataVolume>(&namespace, &name)? {
                check_owner(&dv, &owner)?;
                volumes.push(dv);
                continue;
            }

            waiting = true;
            if !provider.validate_disk_status(&disk_id).await? {
                tracing::debug!(
                    import = %request_key(request),
                    disk = %disk_id,
                    "Source disk not ready"
                );
                continue;
            }

            spec.checkpoints = vec![DataVolumeCheckpoint {
                previous: String::new(),
                current: root.clone(),
            }];
            spec.final_checkpoint = false;
            let dv = DataVolume {
                metadata: owned_metadata(&namespace, &name, &owner),
                spec,
                status: Default::default(),
            };
            create_owned(self.store, &dv, &owner)?;
            tracing::debug!(
                import = %request_key(request),
                data_volume = %name,
                "Warm data volume created"
            );
        }

        if waiting {
            set_condition(
                request,
                ConditionType::Processing,
                ConditionStatus::True,
                ConditionReason::WaitingForDataVolumes,
                "Waiting for data volumes to be created",
                now,
            );
            persist(self.store, request)?;
            return Ok(Action::Requeue(self.settings.requeue_fast));
        }

        if let Some(failed) = volumes
            .iter()
            .find(|dv| dv.phase() == DataVolumePhase::Failed)
        {
            return Err(ReconcileError::WarmStage(format!(
                "data volume {} failed to copy its checkpoint",
                failed.metadata.name
            )));
        }

        if !stage_complete(&volumes) {
            set_condition(
                request,
                ConditionType::Processing,
                ConditionStatus::True,
                ConditionReason::CopyingStage,
                "Copying disk checkpoint",
                now,
            );
            persist(self.store, request)?;
            return Ok(Action::Requeue(self.settings.requeue_slow));
        }

        let next_stage_time = match request.status.warm_import.next_stage_time {
            Some(at) => at,
            None => {
                let at = now + self.settings.warm.stage_interval;
                let warm = &mut request.status.warm_import;
                warm.next_stage_time = Some(at);
                warm.successes += 1;
                warm.consecutive_failures = 0;
                metrics::counter!("vmimport_warm_stages_total").increment(1);
                tracing::info!(
                    import = %request_key(request),
                    successes = request.status.warm_import.successes,
                    next_stage_time = %at,
                    "Warm import stage completed"
                );
                at
            }
        };

        let finalizing = request.finalize_due(now);
        if !finalizing && now < next_stage_time {
            set_condition(
                request,
                ConditionType::Processing,
                ConditionStatus::True,
                ConditionReason::CopyingPaused,
                format!("Next stage at {}", next_stage_time.to_rfc3339()),
                now,
            );
            persist(self.store, request)?;
            return Ok(Action::Requeue(pause_for(
                now,
                next_stage_time,
                self.settings.requeue_slow,
            )));
        }

        if finalizing && provider.vm_status().await? == VmPowerState::Up {
            tracing::info!(
                import = %request_key(request),
                "Stopping source VM for final checkpoint"
            );
            provider.stop_vm().await?;
        }

        let snapshot = provider.create_vm_snapshot().await?;
        for mut dv in volumes {
            if dv.spec.append_checkpoint(&snapshot, finalizing) {
                // The importer reports Paused or Succeeded again once this checkpoint is copied
                dv.status.phase = DataVolumePhase::ImportScheduled;
                self.store.update(&dv)?;
            }
        }

        request.status.warm_import.next_stage_time = None;
        let (reason, message) = if finalizing {
            (
                ConditionReason::FinalizingWarmImport,
                format!("Copying final checkpoint {}", snapshot),
            )
        } else {
            (
                ConditionReason::CopyingStage,
                format!("Copying checkpoint {}", snapshot),
            )
        };
        set_condition(
            request,
            ConditionType::Processing,
            ConditionStatus::True,
            reason,
            message,
            now,
        );
        persist(self.store, request)?;

        tracing::debug!(
            import = %request_key(request),
            snapshot = %snapshot,
            finalizing,
            "Warm import checkpoint appended"
        );
        Ok(Action::Requeue(self.settings.requeue_fast))
    }
}

/// A stage is complete once every volume has copied its current checkpoint.
pub fn stage_complete(volumes: &[DataVolume]) -> bool {
    volumes.iter().all(|dv| {
        matches!(
            dv.phase(),
            DataVolumePhase::Paused | DataVolumePhase::Succeeded
        )
    })
}

/// Time to wait before the next stage, capped at `max`.
pub fn pause_for(
    now: DateTime<Utc>,
    next_stage_time: DateTime<Utc>,
    max: std::time::Duration,
) -> std::time::Duration {
    (next_stage_time - now)
        .to_std()
        .unwrap_or_default()
        .min(max)
}
