//! Strategies for picking one cluster service among several, plus the
//! lookup helpers features use to resolve their service.

use std::sync::Arc;

use crate::cluster::error::ClusterError;
use crate::cluster::service::{ClusterService, ClusterServiceRegistry};

/// Picks at most one service out of the registered set.
///
/// Selection is deterministic: given the same registration snapshot, a
/// selector always picks the same service or none.
pub trait ServiceSelector: Send + Sync {
    fn select(&self, services: &[Arc<dyn ClusterService>]) -> Option<Arc<dyn ClusterService>>;
}

/// Default strategy: selects only when exactly one service is registered.
pub struct SelectSingle;

impl ServiceSelector for SelectSingle {
    fn select(&self, services: &[Arc<dyn ClusterService>]) -> Option<Arc<dyn ClusterService>> {
        match services {
            [service] => Some(Arc::clone(service)),
            _ => None,
        }
    }
}

/// Selects the first registered service, however many there are.
pub struct SelectFirst;

impl ServiceSelector for SelectFirst {
    fn select(&self, services: &[Arc<dyn ClusterService>]) -> Option<Arc<dyn ClusterService>> {
        services.first().cloned()
    }
}

/// Selects the service with the unique lowest `order()`; ambiguity selects
/// none.
pub struct SelectByOrder;

impl ServiceSelector for SelectByOrder {
    fn select(&self, services: &[Arc<dyn ClusterService>]) -> Option<Arc<dyn ClusterService>> {
        let lowest = services.iter().map(|service| service.order()).min()?;
        let mut at_lowest = services.iter().filter(|service| service.order() == lowest);
        match (at_lowest.next(), at_lowest.next()) {
            (Some(service), None) => Some(Arc::clone(service)),
            _ => None,
        }
    }
}

/// Selects the single service carrying the given attribute value; zero or
/// several matches select none.
pub struct SelectByAttribute {
    key: String,
    value: String,
}

impl SelectByAttribute {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl ServiceSelector for SelectByAttribute {
    fn select(&self, services: &[Arc<dyn ClusterService>]) -> Option<Arc<dyn ClusterService>> {
        let mut matching = services
            .iter()
            .filter(|service| service.attributes().get(&self.key) == Some(&self.value));
        match (matching.next(), matching.next()) {
            (Some(service), None) => Some(Arc::clone(service)),
            _ => None,
        }
    }
}

/// Look up a service with the default [`SelectSingle`] strategy.
pub fn lookup_service(registry: &ClusterServiceRegistry) -> Option<Arc<dyn ClusterService>> {
    lookup_service_with(registry, &SelectSingle)
}

/// Look up a service with an explicit selection strategy.
pub fn lookup_service_with(
    registry: &ClusterServiceRegistry,
    selector: &dyn ServiceSelector,
) -> Option<Arc<dyn ClusterService>> {
    selector.select(&registry.services())
}

/// As [`lookup_service`], but a missing match is a fatal configuration
/// error.
pub fn mandatory_lookup_service(
    registry: &ClusterServiceRegistry,
) -> Result<Arc<dyn ClusterService>, ClusterError> {
    mandatory_lookup_service_with(registry, &SelectSingle)
}

/// As [`lookup_service_with`], but a missing match is a fatal configuration
/// error.
pub fn mandatory_lookup_service_with(
    registry: &ClusterServiceRegistry,
    selector: &dyn ServiceSelector,
) -> Result<Arc<dyn ClusterService>, ClusterError> {
    lookup_service_with(registry, selector).ok_or_else(|| {
        ClusterError::NoServiceAvailable(
            "no cluster service registered, or the selector matched none".to_string(),
        )
    })
}
