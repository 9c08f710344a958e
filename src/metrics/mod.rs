//! # Metrics Collection Module
//!
//! Prometheus export of controller metrics.
//!
//! ## Metrics Tracked
//!
//! **Counters:**
//! - `vmimport_reconcile_total{result}` - Reconciles by outcome (done, requeue, error)
//! - `vmimport_warm_stages_total` - Completed warm import stages
//!
//! **Histograms:**
//! - `vmimport_reconcile_duration_seconds` - Duration of one reconcile
//!
//! **Gauges:**
//! - `vmimport_queue_depth` - Keys waiting in the work queue
//! - `vmimport_imports{phase}` - Import requests per phase, computed on scrape

pub mod handler;
pub mod types;

pub use types::ImportPhase;

pub use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resources::VirtualMachineImport;
use crate::store::ObjectStore;
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Computes store-derived gauges and renders the Prometheus registry.
pub struct MetricsCollector {
    store: Arc<ObjectStore>,
    /// Controller startup time for uptime calculation
    start_time: Instant,
    prometheus_handle: PrometheusHandle,
}

impl MetricsCollector {
    pub fn new(
        store: Arc<ObjectStore>,
        start_time: Instant,
        prometheus_handle: PrometheusHandle,
    ) -> Self {
        Self {
            store,
            start_time,
            prometheus_handle,
        }
    }

    /// Count import requests per phase and publish them as gauges.
    pub fn update_import_gauges(&self) -> HashMap<ImportPhase, usize> {
        let counts = self.import_counts();
        for phase in ImportPhase::ALL {
            let count = counts.get(&phase).copied().unwrap_or(0);
            metrics::gauge!("vmimport_imports", "phase" => phase.as_str()).set(count as f64);
        }
        counts
    }

    /// Import requests per phase.
    pub fn import_counts(&self) -> HashMap<ImportPhase, usize> {
        let mut counts = HashMap::new();
        match self.store.list::<VirtualMachineImport>(None) {
            Ok(requests) => {
                for request in &requests {
                    *counts.entry(ImportPhase::of(request)).or_insert(0) += 1;
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to list import requests for metrics"),
        }
        counts
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Render Prometheus metrics in text format.
    pub fn render_metrics(&self) -> String {
        self.prometheus_handle.render()
    }
}

/// Install the global Prometheus recorder.
///
/// Reconcile duration buckets range from 10ms (store-only reconciles) to
/// 2 minutes (slow source platform calls).
pub fn setup_metrics() -> Result<PrometheusHandle, Box<dyn std::error::Error>> {
    use metrics_exporter_prometheus::Matcher;

    let duration_buckets = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("vmimport_reconcile_duration_seconds".to_string()),
            duration_buckets,
        )?
        .install_recorder()?;

    Ok(handle)
}

/// Install the global recorder, or fall back to a detached one if a
/// recorder is already installed (tests, repeated startup in one process).
pub fn setup_metrics_or_detached() -> PrometheusHandle {
    setup_metrics().unwrap_or_else(|e| {
        tracing::debug!(error = %e, "Metrics recorder already installed, using a detached handle");
        PrometheusBuilder::new().build_recorder().handle()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{
        Condition, ConditionReason, ConditionStatus, ConditionType, ObjectMeta,
        VirtualMachineImportSpec,
    };

    fn detached_handle() -> PrometheusHandle {
        PrometheusBuilder::new().build_recorder().handle()
    }

    fn import(name: &str, succeeded: bool) -> VirtualMachineImport {
        let mut request = VirtualMachineImport::new(
            ObjectMeta::new("default", name),
            VirtualMachineImportSpec::default(),
        );
        if succeeded {
            request.status.conditions.push(Condition::new(
                ConditionType::Succeeded,
                ConditionStatus::True,
                ConditionReason::VirtualMachineReady,
                "",
                chrono::Utc::now(),
            ));
        }
        request
    }

    #[test]
    fn test_metrics_collector_construction() {
        let collector =
            MetricsCollector::new(Arc::new(ObjectStore::new()), Instant::now(), detached_handle());
        assert!(collector.uptime_seconds() < 1);
    }

    #[test]
    fn test_import_counts_by_phase() {
        let store = Arc::new(ObjectStore::new());
        store.create(&import("a", false)).unwrap();
        store.create(&import("b", true)).unwrap();
        store.create(&import("c", true)).unwrap();

        let collector = MetricsCollector::new(store, Instant::now(), detached_handle());
        let counts = collector.update_import_gauges();

        assert_eq!(counts.get(&ImportPhase::Pending), Some(&1));
        assert_eq!(counts.get(&ImportPhase::Succeeded), Some(&2));
        assert_eq!(counts.get(&ImportPhase::Failed), None);
    }
}
