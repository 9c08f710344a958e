//! Provider factory selecting the platform implementation by source type.

use super::{ovirt::OvirtProvider, vmware::VmwareProvider, Provider, ProviderError};
use crate::resources::SourceType;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// Builds a fresh provider for each reconcile.
///
/// The reconciler only depends on this trait, so tests can substitute
/// providers that never touch the network.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, source_type: SourceType) -> Result<Box<dyn Provider>, ProviderError>;
}

/// Factory for the built-in oVirt and VMware providers.
///
/// All providers share one HTTP client for connection pooling.
///
/// # Examples
///
/// ```
/// use vmimport::provider::{DefaultProviderFactory, ProviderFactory};
/// use vmimport::resources::SourceType;
/// use std::time::Duration;
///
/// let factory = DefaultProviderFactory::new(Duration::from_secs(30)).unwrap();
/// let provider = factory.create(SourceType::Vmware).unwrap();
/// assert!(provider.supports_warm_migration());
/// ```
#[derive(Clone)]
pub struct DefaultProviderFactory {
    client: Arc<Client>,
    timeout: Duration,
}

impl DefaultProviderFactory {
    /// Create a factory with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Configuration` if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| {
                ProviderError::Configuration(format!("Failed to build HTTP client: {}", e))
            })?;
        Ok(Self::with_client(Arc::new(client), timeout))
    }

    /// Create a factory around an existing client.
    pub fn with_client(client: Arc<Client>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl ProviderFactory for DefaultProviderFactory {
    fn create(&self, source_type: SourceType) -> Result<Box<dyn Provider>, ProviderError> {
        tracing::trace!(source_type = %source_type, "Creating provider");
        Ok(match source_type {
            SourceType::Ovirt => Box::new(OvirtProvider::new(self.client.clone(), self.timeout)),
            SourceType::Vmware => Box::new(VmwareProvider::new(self.client.clone(), self.timeout)),
        })
    }
}
