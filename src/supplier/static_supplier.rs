use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use super::InstanceSupplier;
use crate::common::types::ServiceInstance;

type InstanceMap = HashMap<String, Vec<Arc<ServiceInstance>>>;

/// Fixed instance lists per service, swappable as a whole.
///
/// Readers load the current map without locking; [`StaticSupplier::replace`]
/// publishes a new one for subsequent reads.
#[derive(Debug, Default)]
pub struct StaticSupplier {
    services: ArcSwap<InstanceMap>,
}

impl StaticSupplier {
    pub fn new(services: HashMap<String, Vec<ServiceInstance>>) -> Self {
        Self {
            services: ArcSwap::from_pointee(wrap(services)),
        }
    }

    pub fn single(service_id: impl Into<String>, instances: Vec<ServiceInstance>) -> Self {
        Self::new(HashMap::from([(service_id.into(), instances)]))
    }

    pub fn replace(&self, services: HashMap<String, Vec<ServiceInstance>>) {
        self.services.store(Arc::new(wrap(services)));
    }

    pub fn service_ids(&self) -> Vec<String> {
        self.services.load().keys().cloned().collect()
    }
}

fn wrap(services: HashMap<String, Vec<ServiceInstance>>) -> InstanceMap {
    services
        .into_iter()
        .map(|(id, instances)| (id, instances.into_iter().map(Arc::new).collect()))
        .collect()
}

impl InstanceSupplier for StaticSupplier {
    fn instances(&self, service_id: &str) -> Vec<Arc<ServiceInstance>> {
        self.services
            .load()
            .get(service_id)
            .cloned()
            .unwrap_or_default()
    }
}
