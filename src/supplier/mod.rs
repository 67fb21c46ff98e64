//! Sources of candidate instances for a logical service.

use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::common::types::ServiceInstance;

mod static_supplier;

pub use static_supplier::StaticSupplier;

/// Produces the current candidate list for a service.
///
/// Each call returns a snapshot; the selector reads it once per choice and
/// never holds a lock across the call.
pub trait InstanceSupplier: Send + Sync {
    /// Current candidates for `service_id`, possibly empty.
    fn instances(&self, service_id: &str) -> Vec<Arc<ServiceInstance>>;

    /// Called after the selector settles on `instance`.
    fn selected(&self, _instance: &ServiceInstance) {}
}

impl<S: InstanceSupplier + ?Sized> InstanceSupplier for Arc<S> {
    fn instances(&self, service_id: &str) -> Vec<Arc<ServiceInstance>> {
        (**self).instances(service_id)
    }

    fn selected(&self, instance: &ServiceInstance) {
        (**self).selected(instance)
    }
}

#[derive(Debug, Error)]
pub enum SupplierError {
    #[error("discovery backend unavailable: {0}")]
    Unavailable(String),
    #[error("invalid instance data for service {service_id}: {reason}")]
    Invalid { service_id: String, reason: String },
}

/// A discovery source that can fail.
pub trait FallibleSupplier: Send + Sync {
    fn try_instances(&self, service_id: &str) -> Result<Vec<Arc<ServiceInstance>>, SupplierError>;
}

/// Turns a [`FallibleSupplier`] into an [`InstanceSupplier`] by reporting
/// failures as an empty candidate list.
pub struct CollapseFailures<S>(S);

impl<S: FallibleSupplier> CollapseFailures<S> {
    pub fn new(inner: S) -> Self {
        Self(inner)
    }

    pub fn into_inner(self) -> S {
        self.0
    }
}

impl<S: FallibleSupplier> InstanceSupplier for CollapseFailures<S> {
    fn instances(&self, service_id: &str) -> Vec<Arc<ServiceInstance>> {
        match self.0.try_instances(service_id) {
            Ok(instances) => instances,
            Err(e) => {
                warn!(service_id, error = %e, "Instance lookup failed, treating as empty");
                Vec::new()
            }
        }
    }
}
