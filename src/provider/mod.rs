//! Source platform providers.
//!
//! A `Provider` wraps one source virtualization platform: it connects with
//! the credentials from the import request, loads the source VM into the
//! normalized [`SourceVm`] model and performs the power and snapshot
//! operations the reconciler needs. One module per platform, selected by the
//! request's source type through a [`ProviderFactory`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

pub mod error;
pub mod factory;
pub mod ovirt;
mod source;
pub mod vmware;

pub use error::ProviderError;
pub use factory::{DefaultProviderFactory, ProviderFactory};
pub use source::*;

use crate::mapper::{Mapper, MapperContext};
use crate::mapping::merge_configuration;
use crate::resources::{
    ConfigMap, Condition, MappingConfiguration, PlatformSource, Secret, SourceType,
    VirtualMachine, VirtualMachineImport,
};
use crate::store::ObjectStore;
use crate::validation::ValidationEngine;

/// Power state of the source VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmPowerState {
    Up,
    Down,
}

/// Uniform interface over source virtualization platforms.
///
/// # Object Safety
///
/// This trait is object-safe and is used as `Box<dyn Provider>`; one instance
/// lives for the duration of a single reconcile.
#[async_trait]
pub trait Provider: Send + Sync {
    fn source_type(&self) -> SourceType;

    // ========================================================================
    // Setup
    // ========================================================================

    /// Authenticate against the platform with the request's credentials secret.
    async fn connect(&mut self, secret: &Secret) -> Result<(), ProviderError>;

    /// Fetch the source VM, its NICs and its disks.
    ///
    /// Looks the VM up by id when given, by name (and cluster) otherwise.
    async fn load_vm(&mut self, source: &PlatformSource) -> Result<(), ProviderError>;

    /// The loaded VM.
    ///
    /// Returns `ProviderError::NotConnected` before `load_vm` succeeded.
    fn source_vm(&self) -> Result<&SourceVm, ProviderError>;

    /// Merge the external mapping resource with the inline configuration.
    fn prepare_resource_mapping(
        &mut self,
        external: Option<&MappingConfiguration>,
        inline: Option<&MappingConfiguration>,
    );

    /// The mapping prepared by `prepare_resource_mapping`.
    fn resource_mapping(&self) -> &MappingConfiguration;

    /// Run mapping and attribute validation for the loaded VM.
    async fn validate(
        &self,
        engine: &ValidationEngine,
        store: &ObjectStore,
        namespace: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Condition>, ProviderError> {
        let vm = self.source_vm()?;
        let report = engine.validate(vm, self.resource_mapping(), store, namespace, now);
        Ok(report.into_conditions())
    }

    // ========================================================================
    // Power
    // ========================================================================

    async fn stop_vm(&self) -> Result<(), ProviderError>;

    async fn start_vm(&self) -> Result<(), ProviderError>;

    async fn vm_status(&self) -> Result<VmPowerState, ProviderError>;

    // ========================================================================
    // Target construction
    // ========================================================================

    /// Mapper translating the loaded VM into target objects.
    fn create_mapper(&self, context: MapperContext) -> Result<Box<dyn Mapper>, ProviderError>;

    /// Look up a matching target template. No platform ships templates yet.
    async fn find_template(&self) -> Result<Option<VirtualMachine>, ProviderError> {
        Ok(None)
    }

    /// Apply a found template to the mapped VM. No-op by default.
    fn process_template(&self, _template: &VirtualMachine, _vm: &mut VirtualMachine) {}

    /// Key/value pairs for the transient importer credentials Secret.
    fn importer_credentials(&self) -> Result<BTreeMap<String, String>, ProviderError>;

    /// PEM bundle for the transient CA ConfigMap, if the platform has one.
    fn ca_certificate(&self) -> Option<String>;

    /// Best-effort removal of the transient objects created for a request.
    ///
    /// Every step runs even if an earlier one fails; failures are folded into
    /// a single `ProviderError::Cleanup`.
    async fn clean_up(
        &self,
        store: &ObjectStore,
        request: &VirtualMachineImport,
    ) -> Result<(), ProviderError> {
        clean_up_transients(store, request, Vec::new())
    }

    // ========================================================================
    // Warm import (optional)
    // ========================================================================

    fn supports_warm_migration(&self) -> bool {
        false
    }

    /// Take a snapshot of the source VM and return its reference.
    async fn create_vm_snapshot(&self) -> Result<String, ProviderError> {
        Err(ProviderError::Unsupported("create_vm_snapshot"))
    }

    /// Whether the source disk is in a state that allows copying it.
    async fn validate_disk_status(&self, _disk_id: &str) -> Result<bool, ProviderError> {
        Err(ProviderError::Unsupported("validate_disk_status"))
    }
}

/// Delete the transient Secret and ConfigMap of a request.
///
/// `errors` carries failures from platform-specific cleanup steps that ran
/// before; they are reported together with any store failures. Objects that
/// are already gone count as cleaned up.
pub fn clean_up_transients(
    store: &ObjectStore,
    request: &VirtualMachineImport,
    mut errors: Vec<String>,
) -> Result<(), ProviderError> {
    let namespace = &request.metadata.namespace;

    if let Err(e) = store.delete::<Secret>(namespace, &request.credentials_secret_name()) {
        if !e.is_not_found() {
            errors.push(e.to_string());
        }
    }
    if let Err(e) = store.delete::<ConfigMap>(namespace, &request.ca_config_map_name()) {
        if !e.is_not_found() {
            errors.push(e.to_string());
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ProviderError::Cleanup(errors.join("; ")))
    }
}

/// Map a non-success HTTP status to a `ProviderError`.
pub(crate) async fn check_status(
    response: reqwest::Response,
    path: &str,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(match status {
        reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
            ProviderError::Authentication(format!("{} returned {}", path, status))
        }
        reqwest::StatusCode::NOT_FOUND => ProviderError::NotFound(path.to_string()),
        _ => ProviderError::Upstream {
            status: status.as_u16(),
            message,
        },
    })
}

/// API credentials read from the request's credentials secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_url: String,
    pub username: String,
    pub password: String,
    pub ca_cert: Option<String>,
    pub thumbprint: Option<String>,
}

impl Credentials {
    pub const API_URL: &'static str = "apiUrl";
    pub const USERNAME: &'static str = "username";
    pub const PASSWORD: &'static str = "password";
    pub const CA_CERT: &'static str = "caCert";
    pub const THUMBPRINT: &'static str = "thumbprint";

    /// Parse credentials from a secret.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Configuration` naming the first missing key.
    pub fn from_secret(secret: &Secret) -> Result<Self, ProviderError> {
        let required = |key: &str| {
            secret
                .string_data
                .get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| {
                    ProviderError::Configuration(format!(
                        "secret {} is missing key '{}'",
                        secret.metadata.name, key
                    ))
                })
        };

        Ok(Self {
            api_url: required(Self::API_URL)?.trim_end_matches('/').to_string(),
            username: required(Self::USERNAME)?,
            password: required(Self::PASSWORD)?,
            ca_cert: secret.string_data.get(Self::CA_CERT).cloned(),
            thumbprint: secret.string_data.get(Self::THUMBPRINT).cloned(),
        })
    }

    /// Credentials in the shape the disk importer expects.
    pub fn importer_data(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("accessKeyId".to_string(), self.username.clone()),
            ("secretKey".to_string(), self.password.clone()),
        ])
    }
}

/// Connection, loaded VM and prepared mapping shared by every provider.
#[derive(Debug, Default)]
pub(crate) struct ProviderState {
    pub credentials: Option<Credentials>,
    pub vm: Option<SourceVm>,
    pub mapping: MappingConfiguration,
}

impl ProviderState {
    pub fn credentials(&self) -> Result<&Credentials, ProviderError> {
        self.credentials
            .as_ref()
            .ok_or(ProviderError::NotConnected("connect must be called first"))
    }

    pub fn vm(&self) -> Result<&SourceVm, ProviderError> {
        self.vm
            .as_ref()
            .ok_or(ProviderError::NotConnected("load_vm must be called first"))
    }

    pub fn prepare_mapping(
        &mut self,
        external: Option<&MappingConfiguration>,
        inline: Option<&MappingConfiguration>,
    ) {
        self.mapping = merge_configuration(inline, external);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{ObjectMeta, VirtualMachineImportSpec};

    fn secret(pairs: &[(&str, &str)]) -> Secret {
        Secret {
            metadata: ObjectMeta::new("default", "creds"),
            string_data: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_credentials_from_secret() {
        let creds = Credentials::from_secret(&secret(&[
            ("apiUrl", "https://engine/api/"),
            ("username", "admin@internal"),
            ("password", "secret"),
            ("caCert", "PEM"),
        ]))
        .unwrap();

        assert_eq!(creds.api_url, "https://engine/api");
        assert_eq!(creds.ca_cert.as_deref(), Some("PEM"));
        assert!(creds.thumbprint.is_none());
        assert_eq!(creds.importer_data()["accessKeyId"], "admin@internal");
    }

    #[test]
    fn test_credentials_missing_key() {
        let result = Credentials::from_secret(&secret(&[("apiUrl", "https://engine/api")]));
        assert!(
            matches!(result, Err(ProviderError::Configuration(ref msg)) if msg.contains("username"))
        );
    }

    #[test]
    fn test_state_requires_connect_and_load() {
        let state = ProviderState::default();
        assert!(matches!(
            state.credentials(),
            Err(ProviderError::NotConnected(_))
        ));
        assert!(matches!(state.vm(), Err(ProviderError::NotConnected(_))));
    }

    #[test]
    fn test_clean_up_transients_tolerates_missing_objects() {
        let store = ObjectStore::new();
        let request = VirtualMachineImport::new(
            ObjectMeta::new("default", "import-1"),
            VirtualMachineImportSpec {
                source: Default::default(),
                provider_credentials_secret: Default::default(),
                target_vm_name: None,
                resource_mapping: None,
                start_vm: None,
                warm: false,
                finalize_date: None,
            },
        );
        store
            .create(&Secret {
                metadata: ObjectMeta::new("default", request.credentials_secret_name()),
                string_data: BTreeMap::new(),
            })
            .unwrap();

        clean_up_transients(&store, &request, Vec::new()).unwrap();
        assert!(store.is_empty());

        let err = clean_up_transients(&store, &request, vec!["snapshot gone".to_string()])
            .unwrap_err();
        assert_eq!(err.to_string(), "Cleanup failed: snapshot gone");
    }
}
