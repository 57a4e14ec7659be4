//! Cluster service surface and the registry of service instances.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::cluster::error::ClusterError;
use crate::cluster::view::ClusterView;

/// A named cluster backend exposing reference-counted views per namespace.
///
/// Several unrelated features may hold views from the same service at once;
/// the service's internal reference counts decide when a view may stop, and
/// no holder may assume exclusive ownership.
#[async_trait]
pub trait ClusterService: Send + Sync + 'static {
    /// Unique id of this service instance.
    fn id(&self) -> &str;

    /// Relative priority when several services are registered; lower wins.
    fn order(&self) -> i32 {
        0
    }

    /// Free-form metadata used by attribute-based selection.
    fn attributes(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    /// Start the service, starting every view held at this point.
    async fn start(&self) -> Result<(), ClusterError>;

    /// Stop the service and every view it is holding.
    async fn stop(&self) -> Result<(), ClusterError>;

    /// Retain the view for `namespace`, creating it on first request.
    async fn get_view(&self, namespace: &str) -> Result<Arc<dyn ClusterView>, ClusterError>;

    /// Release one retain of `view`; the last release stops it.
    async fn release_view(&self, view: Arc<dyn ClusterView>) -> Result<(), ClusterError>;

    /// Every namespace requested so far, held or not.
    async fn namespaces(&self) -> Vec<String>;

    /// Force-start the view for `namespace`, bypassing the reference count.
    async fn start_view(&self, namespace: &str) -> Result<(), ClusterError>;

    /// Force-stop the view for `namespace`, bypassing the reference count.
    async fn stop_view(&self, namespace: &str) -> Result<(), ClusterError>;

    /// Whether the local member currently leads `namespace`.
    async fn is_leader(&self, namespace: &str) -> bool;
}

/// Shared, clonable list of registered cluster services.
///
/// Stands in for the hosting context's service registry: features that need
/// a cluster service look one up here through a selector.
#[derive(Clone, Default)]
pub struct ClusterServiceRegistry {
    inner: Arc<RwLock<Vec<Arc<dyn ClusterService>>>>,
}

impl ClusterServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service instance, replacing any previous one with the
    /// same id.
    pub fn register(&self, service: Arc<dyn ClusterService>) {
        let mut services = self.inner.write().unwrap();
        services.retain(|registered| registered.id() != service.id());
        services.push(service);
    }

    /// Remove the service with the given id, if registered.
    pub fn unregister(&self, id: &str) {
        self.inner
            .write()
            .unwrap()
            .retain(|registered| registered.id() != id);
    }

    /// Snapshot of the registered services, in registration order.
    pub fn services(&self) -> Vec<Arc<dyn ClusterService>> {
        self.inner.read().unwrap().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::MemoryClusterService;
    use slog::Logger;

    fn create_logger() -> Logger {
        use slog::Drain;
        let decorator = slog_term::PlainDecorator::new(std::io::stdout());
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        let drain = slog_async::Async::new(drain).build().fuse();
        Logger::root(drain, slog::o!())
    }

    #[test]
    fn test_register_replaces_same_id() {
        let logger = create_logger();
        let registry = ClusterServiceRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(MemoryClusterService::new("svc", logger.clone())));
        registry.register(Arc::new(
            MemoryClusterService::new("svc", logger).with_order(7),
        ));

        let services = registry.services();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].order(), 7);
    }

    #[test]
    fn test_unregister_removes_by_id() {
        let logger = create_logger();
        let registry = ClusterServiceRegistry::new();
        registry.register(Arc::new(MemoryClusterService::new("svc-1", logger.clone())));
        registry.register(Arc::new(MemoryClusterService::new("svc-2", logger)));

        registry.unregister("svc-1");
        let services = registry.services();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].id(), "svc-2");

        registry.unregister("svc-2");
        assert!(registry.is_empty());
    }
}
