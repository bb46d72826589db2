//! Provider - Trait abstracting resource operations
//!
//! A Provider turns existence checks and creations into calls against a cloud
//! control-plane API. Provisioning never updates or deletes, so the trait only
//! reads and creates.

use std::future::Future;
use std::pin::Pin;

use crate::resource::{Resource, ResourceId, State};

/// Error type for Provider operations
#[derive(Debug)]
pub struct ProviderError {
    pub message: String,
    pub resource_id: Option<ResourceId>,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref id) = self.resource_id {
            write!(f, "[{}] {}", id, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &dyn std::error::Error)
    }
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            resource_id: None,
            cause: None,
        }
    }

    pub fn for_resource(mut self, id: ResourceId) -> Self {
        self.resource_id = Some(id);
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Error for a required attribute missing from a desired resource
    pub fn missing_attribute(resource: &Resource, key: &str) -> Self {
        Self::new(format!("attribute '{}' is required", key)).for_resource(resource.id.clone())
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Return type for async operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Terminal statuses of a resource type that provisions asynchronously
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifecycle {
    /// Status reached when the resource is ready
    pub success: &'static str,
    /// Statuses after which the resource will not become ready
    pub failures: &'static [&'static str],
}

/// Definition of resource types that a Provider can handle
pub trait ResourceType: Send + Sync {
    /// Resource type name (e.g., "eks_cluster")
    fn name(&self) -> &'static str;

    /// Terminal statuses, for types that are polled until ready
    fn lifecycle(&self) -> Option<Lifecycle> {
        None
    }
}

/// Define a unit struct implementing [`ResourceType`]
#[macro_export]
macro_rules! define_resource_type {
    ($name:ident, $type_name:expr) => {
        pub struct $name;
        impl $crate::provider::ResourceType for $name {
            fn name(&self) -> &'static str {
                $type_name
            }
        }
    };
    ($name:ident, $type_name:expr, ready = $success:expr, failed = [$($failure:expr),* $(,)?]) => {
        pub struct $name;
        impl $crate::provider::ResourceType for $name {
            fn name(&self) -> &'static str {
                $type_name
            }
            fn lifecycle(&self) -> Option<$crate::provider::Lifecycle> {
                Some($crate::provider::Lifecycle {
                    success: $success,
                    failures: &[$($failure),*],
                })
            }
        }
    };
}

/// Result of a read-only permission probe
#[derive(Debug, Clone, PartialEq)]
pub struct Probe {
    /// Service probed (e.g., "eks")
    pub service: String,
    pub ok: bool,
    /// Error message when the probe failed
    pub detail: Option<String>,
}

impl Probe {
    pub fn passed(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ok: true,
            detail: None,
        }
    }

    pub fn failed(service: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ok: false,
            detail: Some(detail.into()),
        }
    }
}

/// Caller identity and permission probes gathered before provisioning
#[derive(Debug, Clone, PartialEq)]
pub struct Preflight {
    pub account: String,
    pub arn: String,
    pub probes: Vec<Probe>,
}

impl Preflight {
    pub fn passed(&self) -> bool {
        self.probes.iter().all(|p| p.ok)
    }
}

/// Main Provider trait
pub trait Provider: Send + Sync {
    /// Name of this Provider (e.g., "aws")
    fn name(&self) -> &'static str;

    /// List of resource types this Provider can handle
    fn resource_types(&self) -> Vec<Box<dyn ResourceType>>;

    /// Look up a resource by its deterministic name.
    ///
    /// Returns `State::not_found()` if the resource does not exist; absence is
    /// never an error.
    fn read(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>>;

    /// Create a resource
    ///
    /// Returns State with the identifier assigned by the provider
    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>>;

    /// Verify credentials and minimal read access
    fn preflight(&self) -> BoxFuture<'_, ProviderResult<Preflight>>;

    fn supports(&self, resource_type: &str) -> bool {
        self.resource_types()
            .iter()
            .any(|t| t.name() == resource_type)
    }

    fn lifecycle(&self, resource_type: &str) -> Option<Lifecycle> {
        self.resource_types()
            .iter()
            .find(|t| t.name() == resource_type)
            .and_then(|t| t.lifecycle())
    }
}

/// Provider implementation for Box<dyn Provider>
/// This enables dynamic dispatch for Providers
impl Provider for Box<dyn Provider> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        (**self).resource_types()
    }

    fn read(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).read(resource)
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).create(resource)
    }

    fn preflight(&self) -> BoxFuture<'_, ProviderResult<Preflight>> {
        (**self).preflight()
    }
}
